//! Event types for Sonavox

use crate::config::ChannelId;
use crate::math::DVec3;

#[derive(Debug, Clone, PartialEq)]
pub enum SonavoxEvent {
    /// A one-shot effect got a voice and started playing.
    EffectFired {
        channel: ChannelId,
    },
    /// A one-shot effect found no free voice and was discarded.
    EffectDropped {
        channel: ChannelId,
    },
    StaticStarted {
        channel: ChannelId,
    },
    StreamStarted {
        channel: ChannelId,
    },
    StreamEnded {
        channel: ChannelId,
    },
    DecodeFailed {
        asset: String,
        error: String,
    },
    /// The spatial origin moved to the listener position.
    Recentered {
        origin: DVec3,
    },
    EngineStopped,
    EngineError {
        error: String,
    },
}

impl SonavoxEvent {
    pub fn channel(&self) -> Option<&ChannelId> {
        match self {
            Self::EffectFired { channel }
            | Self::EffectDropped { channel }
            | Self::StaticStarted { channel }
            | Self::StreamStarted { channel }
            | Self::StreamEnded { channel } => Some(channel),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::DecodeFailed { .. } | Self::EngineError { .. })
    }
}
