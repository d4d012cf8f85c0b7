//! Math types for Sonavox

pub use glam::{DVec3, Quat, Vec3};

/// Position, orientation and velocity of the listener in world space.
///
/// The position is kept in double precision; it only becomes `f32` after the
/// spatial origin has been subtracted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenerState {
    pub position: DVec3,
    pub rotation: Quat,
    pub velocity: Vec3,
}

impl ListenerState {
    pub fn new(position: DVec3, rotation: Quat, velocity: Vec3) -> Self {
        Self {
            position,
            rotation,
            velocity,
        }
    }

    pub fn identity() -> Self {
        Self {
            position: DVec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
        }
    }

    pub fn from_position(position: DVec3) -> Self {
        Self {
            position,
            ..Self::identity()
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * (-Vec3::Z)
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn distance(&self, point: DVec3) -> f64 {
        self.position.distance(point)
    }
}

impl Default for ListenerState {
    fn default() -> Self {
        Self::identity()
    }
}

/// Converts a world position to the `f32` frame handed to the device.
pub fn relative_to(world: DVec3, origin: DVec3) -> Vec3 {
    (world - origin).as_vec3()
}
