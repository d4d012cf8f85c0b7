use super::{PollStatus, TickContext};
use crate::asset::AssetKey;
use crate::cache::CacheLookup;
use crate::config::{Placement, SoundParams};
use crate::events::SonavoxEvent;
use std::time::Instant;

/// Lifecycle of a one-shot effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EffectState {
    /// Waiting for propagation delay or decode
    Scheduled,
    /// Handed to a voice
    Fired,
    /// No voice was free, or the asset failed to decode
    Dropped,
}

/// A one-shot sound. Fires at most once and is never addressable afterwards.
pub(crate) struct EffectAudio {
    asset: AssetKey,
    params: SoundParams,
    created_at: Instant,
    state: EffectState,
}

impl EffectAudio {
    pub fn new(asset: AssetKey, params: SoundParams, created_at: Instant) -> Self {
        Self {
            asset,
            params,
            created_at,
            state: EffectState::Scheduled,
        }
    }

    pub fn placement(&self) -> Placement {
        self.params.placement
    }

    pub fn poll(&mut self, ctx: &mut TickContext<'_>) -> PollStatus {
        if self.state != EffectState::Scheduled {
            return PollStatus::Finished;
        }

        let volume = ctx.channel_volume(&self.params.channel);

        if let Some(position) = self.params.placement.position() {
            // Sound travels; far effects start late.
            let delay = ctx.listener.distance(position) / ctx.desc.speed_of_sound as f64
                - ctx.delta.as_secs_f64() * 0.5;
            let elapsed = ctx.now.saturating_duration_since(self.created_at).as_secs_f64();
            if elapsed < delay {
                return PollStatus::Continue;
            }
        }

        let audio = match ctx.cache.get(&self.asset, &mut *ctx.device) {
            CacheLookup::Ready(audio) => audio,
            CacheLookup::Pending => return PollStatus::Continue,
            CacheLookup::Failed(error) => {
                ctx.emit(SonavoxEvent::DecodeFailed {
                    asset: self.asset.describe(),
                    error,
                });
                self.state = EffectState::Dropped;
                return PollStatus::Finished;
            }
        };

        let Some(voice) = ctx.pool.free_voice(&*ctx.device) else {
            log::warn!(
                "No free voice, dropping effect {} on channel {}",
                self.asset.describe(),
                self.params.channel
            );
            ctx.emit(SonavoxEvent::EffectDropped {
                channel: self.params.channel.clone(),
            });
            self.state = EffectState::Dropped;
            return PollStatus::Finished;
        };

        ctx.device.bind_buffer(voice, Some(audio.buffer));
        ctx.device.set_looping(voice, false);
        ctx.configure_voice(voice, &self.params, self.params.gain * volume, self.params.pitch);
        ctx.device.play(voice);

        log::debug!(
            "Fired effect {} on voice {}",
            self.asset.describe(),
            voice.raw()
        );
        ctx.emit(SonavoxEvent::EffectFired {
            channel: self.params.channel.clone(),
        });
        self.state = EffectState::Fired;
        PollStatus::Finished
    }
}
