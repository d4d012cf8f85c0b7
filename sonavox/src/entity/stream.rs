use super::{PollStatus, TickContext};
use crate::asset::AssetKey;
use crate::backend::{AudioDevice, BufferHandle, VoiceHandle, VoiceState};
use crate::config::{ChannelId, Placement, SoundParams};
use crate::error::Result;
use crate::events::SonavoxEvent;
use crate::pipeline::StreamPipeline;
use crate::voice_pool::VoicePool;

/// Lifecycle of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamState {
    /// Waiting for a voice
    Uninitialized,
    /// Decode task running, nothing audible yet
    Initializing,
    Streaming,
    Stopped,
}

/// Music or ambience decoded incrementally by a background task.
pub(crate) struct StreamAudio {
    asset: AssetKey,
    params: SoundParams,
    looping: bool,
    state: StreamState,
    voice: Option<VoiceHandle>,
    pipeline: Option<StreamPipeline>,
    /// Hardware buffers this stream owns, idle ones in `free_buffers`
    buffers: Vec<BufferHandle>,
    free_buffers: Vec<BufferHandle>,
}

impl StreamAudio {
    pub fn new(asset: AssetKey, params: SoundParams, looping: bool) -> Self {
        Self {
            asset,
            params,
            looping,
            state: StreamState::Uninitialized,
            voice: None,
            pipeline: None,
            buffers: Vec::new(),
            free_buffers: Vec::new(),
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
    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn poll(&mut self, ctx: &mut TickContext<'_>) -> PollStatus {
        let volume = ctx.channel_volume(&self.params.channel);
        let gain = self.params.gain * volume;

        match self.state {
            StreamState::Stopped => PollStatus::Finished,
            StreamState::Uninitialized => {
                // No voice free: retry next tick.
                let Some(voice) = ctx.pool.free_voice(&*ctx.device) else {
                    return PollStatus::Continue;
                };
                let pipeline = match StreamPipeline::spawn(
                    self.asset.clone(),
                    ctx.codec.clone(),
                    self.looping,
                    ctx.desc.stream_block_frames,
                    ctx.desc.stream_queue_depth,
                    ctx.events.clone(),
                ) {
                    Ok(pipeline) => pipeline,
                    Err(e) => {
                        log::error!("Failed to start stream {}: {}", self.asset.describe(), e);
                        self.state = StreamState::Stopped;
                        return PollStatus::Finished;
                    }
                };

                ctx.pool.reserve(voice);
                ctx.device.bind_buffer(voice, None);
                ctx.device.set_looping(voice, false);
                ctx.configure_voice(voice, &self.params, gain, self.params.pitch);
                self.voice = Some(voice);
                self.pipeline = Some(pipeline);
                self.state = StreamState::Initializing;
                log::debug!(
                    "Stream {} initializing on voice {}",
                    self.asset.describe(),
                    voice.raw()
                );
                self.pump(ctx, voice, gain)
            }
            StreamState::Initializing | StreamState::Streaming => match self.voice {
                Some(voice) => self.pump(ctx, voice, gain),
                None => {
                    self.state = StreamState::Stopped;
                    PollStatus::Finished
                }
            },
        }
    }

    /// One round of buffer exchange between the decode task and the voice.
    fn pump(&mut self, ctx: &mut TickContext<'_>, voice: VoiceHandle, gain: f32) -> PollStatus {
        let Some(pipeline) = self.pipeline.as_mut() else {
            self.state = StreamState::Stopped;
            return PollStatus::Finished;
        };

        // Reclaim what the voice has played.
        while let Some(buffer) = ctx.device.unqueue_processed(voice) {
            self.free_buffers.push(buffer);
        }

        while ctx.device.queued_buffers(voice) < ctx.desc.stream_queue_depth {
            let Some(block) = pipeline.try_next() else {
                break;
            };
            if let Some(format) = block.format() {
                if !block.is_empty() {
                    let buffer = match self.free_buffers.pop() {
                        Some(buffer) => Ok(buffer),
                        None => new_buffer(ctx.device, &mut self.buffers),
                    };
                    match buffer {
                        Ok(buffer) => {
                            ctx.device.upload_buffer(buffer, format, block.samples());
                            ctx.device.queue_buffer(voice, buffer);
                        }
                        Err(e) => log::error!("Failed to create stream buffer: {}", e),
                    }
                }
            }
            pipeline.recycle(block);
        }

        ctx.device.set_gain(voice, gain);

        let pending = ctx
            .device
            .queued_buffers(voice)
            .saturating_sub(ctx.device.processed_buffers(voice));
        let voice_state = ctx.device.voice_state(voice);
        if pending > 0 && voice_state != VoiceState::Playing {
            if self.state == StreamState::Streaming {
                log::debug!("Stream {} underran, restarting", self.asset.describe());
            }
            ctx.device.play(voice);
            if self.state == StreamState::Initializing {
                self.state = StreamState::Streaming;
                ctx.emit(SonavoxEvent::StreamStarted {
                    channel: self.params.channel.clone(),
                });
            }
            return PollStatus::Continue;
        }

        if pipeline.is_finished() && pending == 0 && voice_state.is_idle() {
            log::debug!("Stream {} ended", self.asset.describe());
            self.teardown(ctx.device, ctx.pool);
            ctx.emit(SonavoxEvent::StreamEnded {
                channel: self.params.channel.clone(),
            });
            return PollStatus::Finished;
        }

        PollStatus::Continue
    }

    pub fn stop(&mut self, device: &mut dyn AudioDevice, pool: &mut VoicePool) {
        self.teardown(device, pool);
    }

    fn teardown(&mut self, device: &mut dyn AudioDevice, pool: &mut VoicePool) {
        // Closes the request channel; the decode task exits on its own.
        self.pipeline = None;
        if let Some(voice) = self.voice.take() {
            pool.release(device, voice);
        }
        for buffer in self.buffers.drain(..) {
            device.delete_buffer(buffer);
        }
        self.free_buffers.clear();
        self.state = StreamState::Stopped;
    }
}

fn new_buffer(device: &mut dyn AudioDevice, owned: &mut Vec<BufferHandle>) -> Result<BufferHandle> {
    let buffer = device.create_buffer()?;
    owned.push(buffer);
    Ok(buffer)
}
