use crate::math::{DVec3, Vec3};
use std::fmt;
use std::sync::Arc;

/// Logical routing bus ("music", "sfx", ...) used for volume lookup and bulk stop.
///
/// Not to be confused with the PCM channel count of a buffer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(Arc<str>);

impl ChannelId {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-channel volume lookup, called every tick for every active entity.
pub type VolumeFn = Arc<dyn Fn(&ChannelId) -> f64 + Send + Sync>;

/// Where a sound lives
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Placement {
    /// Plays relative to the listener with no distance attenuation
    #[default]
    Ambient,
    /// Plays from a world-space position
    Spatial {
        /// World position, kept in double precision
        position: DVec3,
        /// Velocity in world units per second
        velocity: Vec3,
    },
}

impl Placement {
    pub fn is_spatial(&self) -> bool {
        matches!(self, Self::Spatial { .. })
    }

    pub fn position(&self) -> Option<DVec3> {
        match self {
            Self::Spatial { position, .. } => Some(*position),
            Self::Ambient => None,
        }
    }
}

/// Playback parameters shared by effects, static sources and streams.
#[derive(Debug, Clone)]
pub struct SoundParams {
    pub channel: ChannelId,
    pub gain: f32,
    pub pitch: f32,
    pub reference_distance: f32,
    pub rolloff: f32,
    pub placement: Placement,
}

impl SoundParams {
    pub fn new(channel: impl Into<ChannelId>) -> Self {
        Self {
            channel: channel.into(),
            gain: 1.0,
            pitch: 1.0,
            reference_distance: 1.0,
            rolloff: 1.0,
            placement: Placement::Ambient,
        }
    }

    pub fn gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn pitch(mut self, pitch: f32) -> Self {
        self.pitch = pitch;
        self
    }

    pub fn reference_distance(mut self, distance: f32) -> Self {
        self.reference_distance = distance;
        self
    }

    pub fn rolloff(mut self, rolloff: f32) -> Self {
        self.rolloff = rolloff;
        self
    }

    pub fn spatial(mut self, position: DVec3) -> Self {
        self.placement = Placement::Spatial {
            position,
            velocity: Vec3::ZERO,
        };
        self
    }

    pub fn spatial_with_velocity(mut self, position: DVec3, velocity: Vec3) -> Self {
        self.placement = Placement::Spatial { position, velocity };
        self
    }

    pub fn is_spatial(&self) -> bool {
        self.placement.is_spatial()
    }
}
