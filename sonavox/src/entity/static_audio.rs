use super::{PollStatus, TickContext};
use crate::asset::AssetKey;
use crate::backend::{AudioDevice, VoiceHandle, VoiceState};
use crate::cache::{CacheLookup, CachedAudio};
use crate::config::{ChannelId, Placement, SoundParams};
use crate::events::SonavoxEvent;
use crate::voice_pool::VoicePool;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

struct StaticControl {
    gain: AtomicU32,
    pitch: AtomicU32,
    disposed: AtomicBool,
}

/// Caller-side control of a static audio source.
///
/// Clones share the same source. Writes are picked up on the next tick.
#[derive(Clone)]
pub struct StaticAudioHandle {
    inner: Arc<StaticControl>,
}

impl StaticAudioHandle {
    pub(crate) fn new(gain: f32, pitch: f32) -> Self {
        Self {
            inner: Arc::new(StaticControl {
                gain: AtomicU32::new(gain.to_bits()),
                pitch: AtomicU32::new(pitch.to_bits()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Sets the source gain. A gain near zero gives the voice back to the pool
    /// until it rises again.
    pub fn set_gain(&self, gain: f32) {
        self.inner.gain.store(gain.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.inner.gain.load(Ordering::Relaxed))
    }

    pub fn set_pitch(&self, pitch: f32) {
        self.inner.pitch.store(pitch.to_bits(), Ordering::Relaxed);
    }

    pub fn pitch(&self) -> f32 {
        f32::from_bits(self.inner.pitch.load(Ordering::Relaxed))
    }

    /// Stops and removes the source on the next tick. Idempotent.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::Release);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for StaticAudioHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticAudioHandle")
            .field("gain", &self.gain())
            .field("pitch", &self.pitch())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Lifecycle of a static source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StaticState {
    Idle,
    /// Waiting for the decode cache
    Loading,
    Playing,
    /// Gain is below the epsilon, or no voice was free; holds no voice
    Paused,
    Disposed,
}

pub(crate) struct StaticAudio {
    asset: AssetKey,
    params: SoundParams,
    looping: bool,
    handle: StaticAudioHandle,
    state: StaticState,
    voice: Option<VoiceHandle>,
    /// Uploaded audio plus the cache generation it belongs to
    audio: Option<(CachedAudio, u64)>,
    announced: bool,
}

impl StaticAudio {
    pub fn new(asset: AssetKey, params: SoundParams, looping: bool, handle: StaticAudioHandle) -> Self {
        Self {
            asset,
            params,
            looping,
            handle,
            state: StaticState::Idle,
            voice: None,
            audio: None,
            announced: false,
        }
    }

    pub fn channel(&self) -> &ChannelId {
        &self.params.channel
    }

    pub fn placement(&self) -> Placement {
        self.params.placement
    }

    pub fn voice(&self) -> Option<VoiceHandle> {
        self.voice
    }

    #[cfg(test)]
    pub fn state(&self) -> StaticState {
        self.state
    }

    pub fn poll(&mut self, ctx: &mut TickContext<'_>) -> PollStatus {
        if self.state == StaticState::Disposed {
            return PollStatus::Finished;
        }
        if self.handle.is_disposed() {
            self.teardown(ctx.device, ctx.pool);
            return PollStatus::Finished;
        }

        let volume = ctx.channel_volume(&self.params.channel);

        // A cache clear deleted the buffer we were bound to.
        if let Some((_, generation)) = self.audio {
            if generation != ctx.cache.generation() {
                self.release_voice(ctx.device, ctx.pool);
                self.audio = None;
                self.state = StaticState::Idle;
            }
        }

        if self.state == StaticState::Idle {
            self.state = StaticState::Loading;
        }

        let audio = match self.audio {
            Some((audio, _)) => audio,
            None => match ctx.cache.get(&self.asset, &mut *ctx.device) {
                CacheLookup::Ready(audio) => {
                    self.audio = Some((audio, ctx.cache.generation()));
                    self.state = StaticState::Paused;
                    audio
                }
                CacheLookup::Pending => return PollStatus::Continue,
                CacheLookup::Failed(error) => {
                    ctx.emit(SonavoxEvent::DecodeFailed {
                        asset: self.asset.describe(),
                        error,
                    });
                    self.teardown(ctx.device, ctx.pool);
                    return PollStatus::Finished;
                }
            },
        };

        let gain = self.handle.gain() * volume;
        let pitch = self.handle.pitch();

        if gain < ctx.desc.static_gain_epsilon {
            if self.voice.is_some() {
                log::debug!("Static source on {} went silent, releasing voice", self.params.channel);
                self.release_voice(ctx.device, ctx.pool);
            }
            self.state = StaticState::Paused;
            return PollStatus::Continue;
        }

        match self.voice {
            Some(voice) => {
                if !self.looping && ctx.device.voice_state(voice) == VoiceState::Stopped {
                    log::debug!("Static source on {} finished", self.params.channel);
                    self.teardown(ctx.device, ctx.pool);
                    return PollStatus::Finished;
                }
                ctx.device.set_gain(voice, gain);
                ctx.device.set_pitch(voice, pitch);
            }
            None => {
                // Pool exhausted: stay paused and try again next tick.
                let Some(voice) = ctx.pool.free_voice(&*ctx.device) else {
                    return PollStatus::Continue;
                };
                ctx.pool.reserve(voice);
                ctx.device.bind_buffer(voice, Some(audio.buffer));
                ctx.device.set_looping(voice, self.looping);
                ctx.configure_voice(voice, &self.params, gain, pitch);
                ctx.device.play(voice);
                self.voice = Some(voice);
                self.state = StaticState::Playing;

                if !self.announced {
                    self.announced = true;
                    ctx.emit(SonavoxEvent::StaticStarted {
                        channel: self.params.channel.clone(),
                    });
                }
            }
        }

        PollStatus::Continue
    }

    pub fn stop(&mut self, device: &mut dyn AudioDevice, pool: &mut VoicePool) {
        self.teardown(device, pool);
    }

    fn release_voice(&mut self, device: &mut dyn AudioDevice, pool: &mut VoicePool) {
        if let Some(voice) = self.voice.take() {
            pool.release(device, voice);
        }
    }

    fn teardown(&mut self, device: &mut dyn AudioDevice, pool: &mut VoicePool) {
        self.release_voice(device, pool);
        self.handle.dispose();
        self.state = StaticState::Disposed;
    }
}
