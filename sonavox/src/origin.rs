//! World-to-device coordinate recentering.

use crate::math::{DVec3, Vec3, relative_to};

/// The point subtracted from every world position before it reaches the device.
///
/// Positions are `f64` in the world and `f32` on the device, so the origin
/// follows the listener around to keep device coordinates small.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpatialOrigin {
    origin: DVec3,
}

impl SpatialOrigin {
    pub fn get(&self) -> DVec3 {
        self.origin
    }

    pub fn to_device(&self, world: DVec3) -> Vec3 {
        relative_to(world, self.origin)
    }

    /// Moves the origin onto the listener when it has drifted far enough.
    ///
    /// Beyond `threshold_sq` the move only happens while nothing is playing,
    /// so audible voices do not jump; beyond `force_threshold_sq` it happens
    /// regardless. Returns whether the origin moved.
    pub fn maybe_recenter(
        &mut self,
        listener: DVec3,
        any_playing: bool,
        threshold_sq: f64,
        force_threshold_sq: f64,
    ) -> bool {
        let distance_sq = self.origin.distance_squared(listener);
        if distance_sq > threshold_sq && (distance_sq > force_threshold_sq || !any_playing) {
            self.origin = listener;
            true
        } else {
            false
        }
    }
}
