//! Per-request playback state machines, polled once per engine tick.

mod effect;
mod static_audio;
mod stream;

pub use static_audio::StaticAudioHandle;

#[cfg(test)]
pub(crate) use static_audio::StaticState;
#[cfg(test)]
pub(crate) use stream::StreamState;

pub(crate) use effect::EffectAudio;
pub(crate) use static_audio::StaticAudio;
pub(crate) use stream::StreamAudio;

use crate::backend::{AudioDevice, DistanceModel, VoiceHandle};
use crate::cache::AudioCache;
use crate::codec::Codec;
use crate::config::{ChannelId, Placement, SoundParams, SonavoxEngineDesc, VolumeFn};
use crate::events::SonavoxEvent;
use crate::math::{ListenerState, Vec3};
use crate::origin::SpatialOrigin;
use crate::voice_pool::VoicePool;
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollStatus {
    Continue,
    Finished,
}

/// Everything an entity may touch while being polled. Borrowed from the
/// engine for the duration of one tick.
pub(crate) struct TickContext<'a> {
    pub device: &'a mut dyn AudioDevice,
    pub pool: &'a mut VoicePool,
    pub cache: &'a mut AudioCache,
    pub codec: &'a Arc<dyn Codec>,
    pub volume: &'a VolumeFn,
    pub desc: &'a SonavoxEngineDesc,
    pub events: &'a Sender<SonavoxEvent>,
    pub listener: &'a ListenerState,
    pub origin: SpatialOrigin,
    pub now: Instant,
    /// Time since the previous tick
    pub delta: Duration,
}

impl TickContext<'_> {
    /// Channel volume clamped into `[0, 1]`.
    pub fn channel_volume(&self, channel: &ChannelId) -> f32 {
        let volume = (self.volume)(channel);
        if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0) as f32
        }
    }

    pub fn emit(&self, event: SonavoxEvent) {
        let _ = self.events.send(event);
    }

    /// Applies placement, distance model, gain and pitch to a voice.
    pub fn configure_voice(&mut self, voice: VoiceHandle, params: &SoundParams, gain: f32, pitch: f32) {
        match params.placement {
            Placement::Spatial { position, velocity } => {
                self.device.set_relative(voice, false);
                self.device.set_position(voice, self.origin.to_device(position));
                self.device.set_velocity(voice, velocity);
                self.device.set_distance_model(
                    voice,
                    DistanceModel {
                        reference_distance: params.reference_distance,
                        rolloff: params.rolloff,
                        max_distance: self.desc.max_distance,
                    },
                );
            }
            Placement::Ambient => {
                self.device.set_relative(voice, true);
                self.device.set_position(voice, Vec3::ZERO);
                self.device.set_velocity(voice, Vec3::ZERO);
                self.device.set_distance_model(
                    voice,
                    DistanceModel {
                        reference_distance: params.reference_distance,
                        rolloff: 0.0,
                        max_distance: self.desc.max_distance,
                    },
                );
            }
        }
        self.device.set_gain(voice, gain);
        self.device.set_pitch(voice, pitch);
    }
}

/// One live play request.
pub(crate) enum ActiveAudioEntity {
    Effect(EffectAudio),
    Static(StaticAudio),
    Stream(StreamAudio),
}

impl ActiveAudioEntity {
    pub fn poll(&mut self, ctx: &mut TickContext<'_>) -> PollStatus {
        match self {
            Self::Effect(effect) => effect.poll(ctx),
            Self::Static(source) => source.poll(ctx),
            Self::Stream(stream) => stream.poll(ctx),
        }
    }

    /// Whether a channel stop addresses this entity. One-shot effects never match.
    pub fn is_playing_on(&self, channel: &ChannelId) -> bool {
        match self {
            Self::Effect(_) => false,
            Self::Static(source) => source.channel() == channel,
            Self::Stream(stream) => stream.channel() == channel,
        }
    }

    /// Tears the entity down immediately, releasing its voice.
    pub fn stop(&mut self, device: &mut dyn AudioDevice, pool: &mut VoicePool) {
        match self {
            Self::Effect(_) => {}
            Self::Static(source) => source.stop(device, pool),
            Self::Stream(stream) => stream.stop(device, pool),
        }
    }

    /// The voice this entity holds on to. Fired effects are not tracked.
    pub fn voice(&self) -> Option<VoiceHandle> {
        match self {
            Self::Effect(_) => None,
            Self::Static(source) => source.voice(),
            Self::Stream(stream) => stream.voice(),
        }
    }

    fn placement(&self) -> Placement {
        match self {
            Self::Effect(effect) => effect.placement(),
            Self::Static(source) => source.placement(),
            Self::Stream(stream) => stream.placement(),
        }
    }

    /// Re-sends the device position of a spatial voice after the origin moved.
    pub fn apply_origin(&self, device: &mut dyn AudioDevice, origin: &SpatialOrigin) {
        if let (Some(voice), Placement::Spatial { position, .. }) = (self.voice(), self.placement()) {
            device.set_position(voice, origin.to_device(position));
        }
    }
}
