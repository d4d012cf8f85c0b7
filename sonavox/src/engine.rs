use crate::asset::AssetKey;
use crate::backend::{AudioDevice, Orientation};
use crate::cache::AudioCache;
use crate::codec::Codec;
use crate::command::EngineCommand;
use crate::config::{ChannelId, SonavoxEngineDesc, SoundParams, VolumeFn};
use crate::entity::{
    ActiveAudioEntity, EffectAudio, PollStatus, StaticAudio, StaticAudioHandle, StreamAudio,
    TickContext,
};
use crate::error::{Result, SonavoxError};
use crate::events::SonavoxEvent;
use crate::math::ListenerState;
use crate::origin::SpatialOrigin;
use crate::voice_pool::VoicePool;
use crossbeam_channel::{
    Receiver, RecvTimeoutError, Sender, TrySendError, bounded, unbounded,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// State owned by the engine thread. Nothing in here crosses threads.
pub(crate) struct EngineCore {
    desc: SonavoxEngineDesc,
    device: Box<dyn AudioDevice>,
    pool: VoicePool,
    cache: AudioCache,
    codec: Arc<dyn Codec>,
    volume: VolumeFn,
    events: Sender<SonavoxEvent>,
    entities: Vec<ActiveAudioEntity>,
    listener: ListenerState,
    origin: SpatialOrigin,
    last_tick: Option<Instant>,
}

impl EngineCore {
    pub fn new(
        desc: SonavoxEngineDesc,
        mut device: Box<dyn AudioDevice>,
        codec: Arc<dyn Codec>,
        volume: VolumeFn,
        events: Sender<SonavoxEvent>,
    ) -> Result<Self> {
        device.set_speed_of_sound(desc.speed_of_sound);
        let pool = VoicePool::new(&mut *device, desc.voice_count)?;

        Ok(Self {
            cache: AudioCache::new(codec.clone()),
            desc,
            device,
            pool,
            codec,
            volume,
            events,
            entities: Vec::new(),
            listener: ListenerState::default(),
            origin: SpatialOrigin::default(),
            last_tick: None,
        })
    }

    /// Applies one command. Returns `false` once shutdown was requested.
    pub fn apply(&mut self, command: EngineCommand) -> bool {
        log::trace!("Applying {}", command.name());
        match command {
            EngineCommand::PlayEffect {
                asset,
                params,
                created_at,
            } => self
                .entities
                .push(ActiveAudioEntity::Effect(EffectAudio::new(asset, params, created_at))),
            EngineCommand::PlayStatic {
                asset,
                params,
                looping,
                handle,
            } => self.entities.push(ActiveAudioEntity::Static(StaticAudio::new(
                asset, params, looping, handle,
            ))),
            EngineCommand::PlayStream {
                asset,
                params,
                looping,
            } => self
                .entities
                .push(ActiveAudioEntity::Stream(StreamAudio::new(asset, params, looping))),
            EngineCommand::Stop(channel) => self.stop_channel(&channel),
            EngineCommand::SetListener(listener) => self.listener = listener,
            EngineCommand::Enable => {
                if let Err(e) = self.device.resume_device() {
                    self.report_device_error(e);
                }
            }
            EngineCommand::Disable => {
                if let Err(e) = self.device.pause_device() {
                    self.report_device_error(e);
                }
            }
            EngineCommand::ClearCache => self.cache.clear(&mut *self.device, &mut self.pool),
            EngineCommand::Shutdown => return false,
        }
        true
    }

    /// Polls every entity once, then updates the listener and the origin.
    /// Returns whether any entity is still active.
    pub fn tick(&mut self, now: Instant) -> bool {
        // Idle periods are not ticked, so the gap is capped at one period.
        let delta = self
            .last_tick
            .map(|last| now.saturating_duration_since(last).min(self.desc.tick_period))
            .unwrap_or(self.desc.tick_period);
        self.last_tick = Some(now);

        let mut ctx = TickContext {
            device: &mut *self.device,
            pool: &mut self.pool,
            cache: &mut self.cache,
            codec: &self.codec,
            volume: &self.volume,
            desc: &self.desc,
            events: &self.events,
            listener: &self.listener,
            origin: self.origin,
            now,
            delta,
        };
        self.entities
            .retain_mut(|entity| entity.poll(&mut ctx) == PollStatus::Continue);

        self.push_listener();

        let any_playing = self.pool.any_playing(&*self.device);
        if self.origin.maybe_recenter(
            self.listener.position,
            any_playing,
            self.desc.recenter_threshold_sq,
            self.desc.recenter_force_threshold_sq,
        ) {
            for entity in &self.entities {
                entity.apply_origin(&mut *self.device, &self.origin);
            }
            self.push_listener();
            log::debug!("Recentered spatial origin to {:?}", self.origin.get());
            let _ = self.events.send(SonavoxEvent::Recentered {
                origin: self.origin.get(),
            });
        }

        !self.entities.is_empty()
    }

    /// Stops everything and frees every hardware resource.
    pub fn shutdown(&mut self) {
        for entity in &mut self.entities {
            entity.stop(&mut *self.device, &mut self.pool);
        }
        self.entities.clear();
        self.cache.clear(&mut *self.device, &mut self.pool);
        self.pool.destroy(&mut *self.device);
        let _ = self.events.send(SonavoxEvent::EngineStopped);
    }

    fn stop_channel(&mut self, channel: &ChannelId) {
        let device = &mut *self.device;
        let pool = &mut self.pool;
        let before = self.entities.len();
        self.entities.retain_mut(|entity| {
            if entity.is_playing_on(channel) {
                entity.stop(device, pool);
                false
            } else {
                true
            }
        });
        log::debug!(
            "Stopped {} entities on channel {}",
            before - self.entities.len(),
            channel
        );
    }

    fn push_listener(&mut self) {
        let orientation = Orientation {
            forward: self.listener.forward(),
            up: self.listener.up(),
        };
        self.device.set_listener(
            self.origin.to_device(self.listener.position),
            orientation,
            self.listener.velocity,
        );
    }

    fn report_device_error(&self, error: SonavoxError) {
        log::error!("Audio device error: {}", error);
        let _ = self.events.send(SonavoxEvent::EngineError {
            error: error.to_string(),
        });
    }

    #[cfg(test)]
    pub(crate) fn entities(&self) -> &[ActiveAudioEntity] {
        &self.entities
    }
}

fn run(mut core: EngineCore, commands: Receiver<EngineCommand>) {
    let tick_period = core.desc.tick_period;
    let mut active = false;
    let mut next_tick = Instant::now() + tick_period;

    'run: loop {
        let first = if active {
            match commands.recv_deadline(next_tick) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            }
        };

        // Only what is queued now; later arrivals wait for the next tick.
        let queued = commands.len();
        let drained = first.is_some();
        for command in first.into_iter().chain(commands.try_iter().take(queued)) {
            if !core.apply(command) {
                break 'run;
            }
        }

        let now = Instant::now();
        let busy = core.tick(now);
        active = busy || drained;
        if now >= next_tick {
            next_tick = now + tick_period;
        }
    }

    for command in commands.try_iter() {
        discard(command);
    }
    core.shutdown();
}

/// Drops a command queued behind shutdown. Static handles are still marked
/// finished so callers polling them see the source end.
fn discard(command: EngineCommand) {
    log::debug!("Discarding {} queued after shutdown", command.name());
    if let EngineCommand::PlayStatic { handle, .. } = command {
        handle.dispose();
    }
}

/// Handle to the audio engine thread.
///
/// Every command method enqueues and returns immediately. Only
/// [`dispose`](Self::dispose) waits for the engine.
pub struct SonavoxEngine {
    commands: Sender<EngineCommand>,
    events: Receiver<SonavoxEvent>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SonavoxEngine {
    /// Starts the engine thread.
    ///
    /// `device_factory` runs on the engine thread, so the device itself does not
    /// have to be `Send`. If it fails, the error is returned here.
    pub fn spawn<D, F>(
        desc: SonavoxEngineDesc,
        device_factory: F,
        codec: Arc<dyn Codec>,
        volume: VolumeFn,
    ) -> Result<Self>
    where
        D: AudioDevice + 'static,
        F: FnOnce() -> Result<D> + Send + 'static,
    {
        desc.validate()?;

        let (commands, command_rx) = bounded(desc.command_queue_capacity);
        let (event_tx, events) = unbounded();
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

        let thread = thread::Builder::new()
            .name("sonavox-engine".to_string())
            .spawn(move || {
                let core = device_factory().and_then(|device| {
                    EngineCore::new(desc, Box::new(device), codec, volume, event_tx.clone())
                });
                match core {
                    Ok(core) => {
                        log::info!("Sonavox engine started");
                        let _ = ready_tx.send(Ok(()));
                        run(core, command_rx);
                        log::info!("Sonavox engine stopped");
                    }
                    Err(e) => {
                        log::error!("Failed to start audio engine: {}", e);
                        let _ = event_tx.send(SonavoxEvent::EngineError {
                            error: e.to_string(),
                        });
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| SonavoxError::Engine(format!("Failed to spawn engine thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                commands,
                events,
                thread: Mutex::new(Some(thread)),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(SonavoxError::Engine(
                    "engine thread exited during startup".to_string(),
                ))
            }
        }
    }

    pub fn set_listener(&self, listener: ListenerState) -> Result<()> {
        self.send(EngineCommand::SetListener(listener))
    }

    /// Streams `asset` through a background decode task.
    pub fn play_music(&self, asset: &AssetKey, params: SoundParams, looping: bool) -> Result<()> {
        self.send(EngineCommand::PlayStream {
            asset: asset.clone(),
            params,
            looping,
        })
    }

    /// Plays a one-shot effect. Spatial effects are delayed by their travel
    /// time from the moment of this call.
    pub fn play_sound(&self, asset: &AssetKey, params: SoundParams) -> Result<()> {
        self.send(EngineCommand::PlayEffect {
            asset: asset.clone(),
            params,
            created_at: Instant::now(),
        })
    }

    /// Starts a persistent source and returns its control handle.
    pub fn play_static_audio(
        &self,
        asset: &AssetKey,
        params: SoundParams,
        looping: bool,
    ) -> Result<StaticAudioHandle> {
        let handle = StaticAudioHandle::new(params.gain, params.pitch);
        self.send(EngineCommand::PlayStatic {
            asset: asset.clone(),
            params,
            looping,
            handle: handle.clone(),
        })?;
        Ok(handle)
    }

    /// Stops every static source and stream on `channel`. Effects are not affected.
    pub fn stop(&self, channel: impl Into<ChannelId>) -> Result<()> {
        self.send(EngineCommand::Stop(channel.into()))
    }

    pub fn enable(&self) -> Result<()> {
        self.send(EngineCommand::Enable)
    }

    pub fn disable(&self) -> Result<()> {
        self.send(EngineCommand::Disable)
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.send(EngineCommand::ClearCache)
    }

    /// Shuts the engine down and waits for its thread to exit.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub fn dispose(&self) -> Result<()> {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };

        // Blocks while the queue is full; fails only if the thread is already gone.
        let _ = self.commands.send(EngineCommand::Shutdown);
        handle
            .join()
            .map_err(|_| SonavoxError::Engine("engine thread panicked".to_string()))
    }

    pub fn poll_events(&self) -> Vec<SonavoxEvent> {
        self.events.try_iter().collect()
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn send(&self, command: EngineCommand) -> Result<()> {
        match self.commands.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(command)) => {
                log::error!(
                    "Engine command queue is full, rejected {}",
                    command.name()
                );
                Err(SonavoxError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(SonavoxError::Engine(
                "engine thread is not running".to_string(),
            )),
        }
    }
}

impl Drop for SonavoxEngine {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            log::error!("Failed to dispose audio engine: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SoftwareDevice, SoftwareMixer, VoiceState};
    use crate::entity::{StaticState, StreamState};
    use crate::math::{DVec3, Vec3};
    use crate::test_support::{FailingCodec, ToneCodec, memory_key, wait_until};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn full_volume() -> VolumeFn {
        Arc::new(|_: &ChannelId| 1.0)
    }

    fn core_with(
        desc: SonavoxEngineDesc,
        codec: Arc<dyn Codec>,
    ) -> (EngineCore, SoftwareMixer, Receiver<SonavoxEvent>) {
        let device = SoftwareDevice::headless(48000);
        let mixer = device.mixer().clone();
        let (events, event_rx) = unbounded();
        let core = EngineCore::new(desc, Box::new(device), codec, full_volume(), events).unwrap();
        (core, mixer, event_rx)
    }

    /// Ticks until `condition` holds, giving decode threads time to finish.
    fn tick_until(core: &mut EngineCore, mut condition: impl FnMut(&EngineCore) -> bool) -> bool {
        wait_until(Duration::from_secs(5), || {
            core.tick(Instant::now());
            condition(core)
        })
    }

    fn static_states(core: &EngineCore) -> Vec<StaticState> {
        core.entities()
            .iter()
            .filter_map(|entity| match entity {
                ActiveAudioEntity::Static(source) => Some(source.state()),
                _ => None,
            })
            .collect()
    }

    fn play_static(
        core: &mut EngineCore,
        asset: &AssetKey,
        params: SoundParams,
        looping: bool,
    ) -> StaticAudioHandle {
        let handle = StaticAudioHandle::new(params.gain, params.pitch);
        core.apply(EngineCommand::PlayStatic {
            asset: asset.clone(),
            params,
            looping,
            handle: handle.clone(),
        });
        handle
    }

    #[test]
    fn test_effect_drop_under_saturation() {
        let _ = env_logger::builder().is_test(true).try_init();
        let desc = SonavoxEngineDesc::default().voice_count(2);
        let (mut core, mixer, events) = core_with(desc, Arc::new(ToneCodec::new(48000)));
        let asset = memory_key();

        let now = Instant::now();
        for _ in 0..3 {
            core.apply(EngineCommand::PlayEffect {
                asset: asset.clone(),
                params: SoundParams::new("sfx").spatial(DVec3::ZERO),
                created_at: now,
            });
        }
        assert!(tick_until(&mut core, |core| core.entities().is_empty()));

        let events: Vec<_> = events.try_iter().collect();
        let fired = events
            .iter()
            .filter(|e| matches!(e, SonavoxEvent::EffectFired { .. }))
            .count();
        let dropped = events
            .iter()
            .filter(|e| matches!(e, SonavoxEvent::EffectDropped { .. }))
            .count();
        assert_eq!((fired, dropped), (2, 1));
        assert_eq!(mixer.bound_voices(), 2);
        assert_eq!(mixer.playing_voices(), 2);
    }

    #[test]
    fn test_effect_waits_for_propagation_delay() {
        let codec = ToneCodec::new(100);
        let opens = codec.opens.clone();
        let (mut core, mixer, _events) = core_with(SonavoxEngineDesc::default(), Arc::new(codec));

        // One second of travel at the default speed of sound.
        let created_at = Instant::now();
        core.apply(EngineCommand::PlayEffect {
            asset: memory_key(),
            params: SoundParams::new("sfx").spatial(DVec3::new(343.3, 0.0, 0.0)),
            created_at,
        });

        core.tick(created_at + Duration::from_millis(100));
        assert_eq!(core.entities().len(), 1);
        assert_eq!(opens.load(Ordering::SeqCst), 0);

        let later = created_at + Duration::from_secs(2);
        let mut step = 0;
        assert!(wait_until(Duration::from_secs(5), || {
            step += 1;
            core.tick(later + Duration::from_millis(step));
            core.entities().is_empty()
        }));
        assert_eq!(mixer.playing_voices(), 1);
    }

    #[test]
    fn test_idle_gap_does_not_shorten_propagation_delay() {
        let (mut core, mixer, _events) =
            core_with(SonavoxEngineDesc::default(), Arc::new(ToneCodec::new(48000)));
        let asset = memory_key();

        // Warm the cache with an effect at the listener.
        core.apply(EngineCommand::PlayEffect {
            asset: asset.clone(),
            params: SoundParams::new("sfx").spatial(DVec3::ZERO),
            created_at: Instant::now(),
        });
        assert!(tick_until(&mut core, |core| core.entities().is_empty()));
        let playing = mixer.playing_voices();
        assert_eq!(playing, 1);

        // Ten seconds without a tick, then an effect one second away.
        let created_at = Instant::now() + Duration::from_secs(10);
        core.apply(EngineCommand::PlayEffect {
            asset,
            params: SoundParams::new("sfx").spatial(DVec3::new(343.3, 0.0, 0.0)),
            created_at,
        });
        core.tick(created_at + Duration::from_millis(1));

        assert_eq!(core.entities().len(), 1);
        assert_eq!(mixer.playing_voices(), playing);
    }

    #[test]
    fn test_static_sources_share_cached_buffer() {
        let codec = ToneCodec::new(4800).with_open_delay(Duration::from_millis(20));
        let opens = codec.opens.clone();
        let (mut core, mixer, events) = core_with(SonavoxEngineDesc::default(), Arc::new(codec));
        let asset = memory_key();

        play_static(&mut core, &asset, SoundParams::new("ambience"), true);
        play_static(&mut core, &asset, SoundParams::new("wind"), true);
        assert!(tick_until(&mut core, |core| {
            static_states(core) == vec![StaticState::Playing, StaticState::Playing]
        }));

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        let bound: Vec<_> = mixer
            .voices()
            .into_iter()
            .filter_map(|(_, voice)| voice.bound)
            .collect();
        assert_eq!(bound.len(), 2);
        assert_eq!(bound[0], bound[1]);
        assert_eq!(
            events
                .try_iter()
                .filter(|e| matches!(e, SonavoxEvent::StaticStarted { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn test_stop_by_channel() {
        let (mut core, _mixer, _events) =
            core_with(SonavoxEngineDesc::default(), Arc::new(ToneCodec::new(48000)));
        let asset = memory_key();

        let music = play_static(&mut core, &asset, SoundParams::new("music"), true);
        core.apply(EngineCommand::PlayStream {
            asset: asset.clone(),
            params: SoundParams::new("music"),
            looping: true,
        });
        let sfx = play_static(&mut core, &asset, SoundParams::new("sfx"), true);
        core.tick(Instant::now());
        assert_eq!(core.entities().len(), 3);

        core.apply(EngineCommand::Stop("music".into()));
        core.tick(Instant::now());

        assert_eq!(core.entities().len(), 1);
        assert!(core.entities()[0].is_playing_on(&"sfx".into()));
        assert!(music.is_disposed());
        assert!(!sfx.is_disposed());
    }

    #[test]
    fn test_silent_static_gives_voice_back() {
        let desc = SonavoxEngineDesc::default().voice_count(1);
        let (mut core, mixer, _events) = core_with(desc, Arc::new(ToneCodec::new(4800)));
        let handle = play_static(&mut core, &memory_key(), SoundParams::new("ambience"), true);
        assert!(tick_until(&mut core, |core| {
            static_states(core) == vec![StaticState::Playing]
        }));
        assert_eq!(mixer.bound_voices(), 1);

        handle.set_gain(0.0);
        core.tick(Instant::now());
        assert_eq!(static_states(&core), vec![StaticState::Paused]);
        assert_eq!(mixer.bound_voices(), 0);

        handle.set_gain(0.8);
        core.tick(Instant::now());
        assert_eq!(static_states(&core), vec![StaticState::Playing]);
        let (_, voice) = mixer.voices().into_iter().next().unwrap();
        assert_eq!(voice.gain, 0.8);
        assert_eq!(voice.state, VoiceState::Playing);
    }

    #[test]
    fn test_disposed_static_is_removed_on_next_tick() {
        let (mut core, mixer, _events) =
            core_with(SonavoxEngineDesc::default(), Arc::new(ToneCodec::new(4800)));
        let handle = play_static(&mut core, &memory_key(), SoundParams::new("ambience"), true);
        assert!(tick_until(&mut core, |core| {
            static_states(core) == vec![StaticState::Playing]
        }));

        handle.dispose();
        handle.dispose();
        assert_eq!(core.entities().len(), 1);
        core.tick(Instant::now());
        assert!(core.entities().is_empty());
        assert_eq!(mixer.bound_voices(), 0);
    }

    #[test]
    fn test_one_shot_static_finishes() {
        let (mut core, mixer, _events) =
            core_with(SonavoxEngineDesc::default(), Arc::new(ToneCodec::new(100)));
        let handle = play_static(&mut core, &memory_key(), SoundParams::new("ui"), false);
        assert!(tick_until(&mut core, |core| {
            static_states(core) == vec![StaticState::Playing]
        }));

        let mut out = vec![0.0f32; 400];
        mixer.render(&mut out, 2);
        core.tick(Instant::now());
        assert!(core.entities().is_empty());
        assert!(handle.is_disposed());
    }

    #[test]
    fn test_clear_cache_refetches_static_buffer() {
        let codec = ToneCodec::new(4800);
        let opens = codec.opens.clone();
        let (mut core, mixer, _events) = core_with(SonavoxEngineDesc::default(), Arc::new(codec));
        play_static(&mut core, &memory_key(), SoundParams::new("ambience"), true);
        assert!(tick_until(&mut core, |core| {
            static_states(core) == vec![StaticState::Playing]
        }));

        core.apply(EngineCommand::ClearCache);
        assert_eq!(mixer.bound_voices(), 0);
        assert_eq!(mixer.buffer_count(), 0);

        core.tick(Instant::now());
        assert_eq!(static_states(&core), vec![StaticState::Loading]);
        assert!(tick_until(&mut core, |core| {
            static_states(core) == vec![StaticState::Playing]
        }));
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert_eq!(mixer.bound_voices(), 1);
    }

    #[test]
    fn test_decode_failure_reports_and_finishes() {
        let (mut core, _mixer, events) =
            core_with(SonavoxEngineDesc::default(), Arc::new(FailingCodec::default()));
        let handle = play_static(&mut core, &memory_key(), SoundParams::new("ambience"), true);
        assert!(tick_until(&mut core, |core| core.entities().is_empty()));
        assert!(handle.is_disposed());
        assert!(
            events
                .try_iter()
                .any(|e| matches!(e, SonavoxEvent::DecodeFailed { .. }))
        );
    }

    #[test]
    fn test_stream_plays_to_end() {
        let desc = SonavoxEngineDesc::default().stream_block_frames(1000);
        let (mut core, mixer, events) = core_with(desc, Arc::new(ToneCodec::new(2500)));
        core.apply(EngineCommand::PlayStream {
            asset: memory_key(),
            params: SoundParams::new("music"),
            looping: false,
        });

        let mut out = vec![0.0f32; 1200];
        let mut saw_streaming = false;
        assert!(wait_until(Duration::from_secs(5), || {
            core.tick(Instant::now());
            if let Some(ActiveAudioEntity::Stream(stream)) = core.entities().first() {
                saw_streaming |= stream.state() == StreamState::Streaming;
            }
            mixer.render(&mut out, 1);
            core.entities().is_empty()
        }));

        assert!(saw_streaming);
        let events: Vec<_> = events.try_iter().collect();
        assert!(events.contains(&SonavoxEvent::StreamStarted {
            channel: "music".into()
        }));
        assert!(events.contains(&SonavoxEvent::StreamEnded {
            channel: "music".into()
        }));
        assert_eq!(mixer.buffer_count(), 0);
        assert_eq!(mixer.bound_voices(), 0);
    }

    #[test]
    fn test_stream_keeps_queue_depth() {
        let desc = SonavoxEngineDesc::default()
            .stream_block_frames(256)
            .stream_queue_depth(3);
        let (mut core, mixer, _events) = core_with(desc, Arc::new(ToneCodec::new(1_000_000)));
        core.apply(EngineCommand::PlayStream {
            asset: memory_key(),
            params: SoundParams::new("music"),
            looping: false,
        });

        assert!(tick_until(&mut core, |_| {
            mixer.voices().iter().any(|(_, voice)| voice.queued == 3)
        }));
        // Nothing consumed: the queue stays at its depth.
        for _ in 0..5 {
            core.tick(Instant::now());
            thread::sleep(Duration::from_millis(5));
        }
        assert!(mixer.voices().iter().all(|(_, voice)| voice.queued <= 3));
        assert!(mixer.buffer_count() <= 3);
    }

    #[test]
    fn test_stream_restarts_after_underrun() {
        let desc = SonavoxEngineDesc::default()
            .stream_block_frames(256)
            .stream_queue_depth(3);
        let (mut core, mixer, _events) = core_with(desc, Arc::new(ToneCodec::new(1_000_000)));
        core.apply(EngineCommand::PlayStream {
            asset: memory_key(),
            params: SoundParams::new("music"),
            looping: false,
        });

        assert!(tick_until(&mut core, |_| {
            mixer
                .voices()
                .iter()
                .any(|(_, voice)| voice.queued == 3 && voice.state == VoiceState::Playing)
        }));
        let voice = core.entities()[0].voice().unwrap();

        // Play through everything queued before the engine gets to refill.
        let mut out = vec![0.0f32; 256 * 3 * 4];
        mixer.render(&mut out, 1);
        assert_eq!(mixer.voice(voice).unwrap().state, VoiceState::Stopped);

        assert!(tick_until(&mut core, |_| {
            mixer
                .voice(voice)
                .is_some_and(|snapshot| snapshot.state == VoiceState::Playing)
        }));
        assert_eq!(core.entities().len(), 1);
        let ActiveAudioEntity::Stream(stream) = &core.entities()[0] else {
            panic!("expected the stream to stay active");
        };
        assert_eq!(stream.state(), StreamState::Streaming);
    }

    #[test]
    fn test_recenter_reapplies_voice_positions() {
        let (mut core, mixer, events) =
            core_with(SonavoxEngineDesc::default(), Arc::new(ToneCodec::new(4800)));
        let source = DVec3::new(1000.0, 0.0, 0.0);
        play_static(&mut core, &memory_key(), SoundParams::new("ambience").spatial(source), true);
        assert!(tick_until(&mut core, |core| {
            static_states(core) == vec![StaticState::Playing]
        }));
        let voice = core.entities()[0].voice().unwrap();
        assert_eq!(mixer.voice(voice).unwrap().position, Vec3::new(1000.0, 0.0, 0.0));

        core.apply(EngineCommand::SetListener(ListenerState::from_position(
            DVec3::new(1000.0, 0.0, 5.0),
        )));
        core.tick(Instant::now());

        assert_eq!(mixer.voice(voice).unwrap().position, Vec3::new(0.0, 0.0, -5.0));
        assert_eq!(mixer.listener_position(), Vec3::ZERO);
        assert!(events.try_iter().any(|e| e
            == SonavoxEvent::Recentered {
                origin: DVec3::new(1000.0, 0.0, 5.0)
            }));
    }

    #[test]
    fn test_small_moves_do_not_recenter() {
        let (mut core, mixer, events) =
            core_with(SonavoxEngineDesc::default(), Arc::new(ToneCodec::new(100)));
        core.apply(EngineCommand::SetListener(ListenerState::from_position(DVec3::new(
            10.0, 0.0, 0.0,
        ))));
        core.tick(Instant::now());
        assert_eq!(mixer.listener_position(), Vec3::new(10.0, 0.0, 0.0));
        assert!(events.try_iter().next().is_none());
    }

    #[test]
    fn test_disable_pauses_device() {
        let (mut core, mixer, _events) =
            core_with(SonavoxEngineDesc::default(), Arc::new(ToneCodec::new(100)));
        core.apply(EngineCommand::Disable);
        assert!(mixer.is_paused());
        core.apply(EngineCommand::Enable);
        assert!(!mixer.is_paused());
    }

    #[test]
    fn test_shutdown_frees_everything() {
        let (mut core, mixer, events) =
            core_with(SonavoxEngineDesc::default().voice_count(4), Arc::new(ToneCodec::new(4800)));
        let handle = play_static(&mut core, &memory_key(), SoundParams::new("ambience"), true);
        assert!(tick_until(&mut core, |core| {
            static_states(core) == vec![StaticState::Playing]
        }));

        assert!(!core.apply(EngineCommand::Shutdown));
        core.shutdown();
        assert!(handle.is_disposed());
        assert_eq!(mixer.voice_count(), 0);
        assert_eq!(mixer.buffer_count(), 0);
        assert!(events.try_iter().any(|e| e == SonavoxEvent::EngineStopped));
    }

    #[test]
    fn test_commands_behind_shutdown_dispose_static_handles() {
        let (core, mixer, events) =
            core_with(SonavoxEngineDesc::default(), Arc::new(ToneCodec::new(4800)));
        let (commands, command_rx) = bounded(4);
        let handle = StaticAudioHandle::new(1.0, 1.0);
        commands.send(EngineCommand::Shutdown).unwrap();
        commands
            .send(EngineCommand::PlayStatic {
                asset: memory_key(),
                params: SoundParams::new("ambience"),
                looping: true,
                handle: handle.clone(),
            })
            .unwrap();

        run(core, command_rx);

        assert!(handle.is_disposed());
        assert_eq!(mixer.voice_count(), 0);
        assert!(events.try_iter().any(|e| e == SonavoxEvent::EngineStopped));
    }

    fn spawn_headless(desc: SonavoxEngineDesc, volume: VolumeFn) -> (SonavoxEngine, SoftwareMixer) {
        let mixer = SoftwareMixer::new(48000);
        let device_mixer = mixer.clone();
        let engine = SonavoxEngine::spawn(
            desc,
            move || Ok(SoftwareDevice::with_mixer(device_mixer)),
            Arc::new(ToneCodec::new(4800)),
            volume,
        )
        .unwrap();
        (engine, mixer)
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (engine, mixer) = spawn_headless(SonavoxEngineDesc::default(), full_volume());
        let handle = engine
            .play_static_audio(&memory_key(), SoundParams::new("ambience"), true)
            .unwrap();
        assert!(wait_until(Duration::from_secs(5), || mixer.bound_voices() == 1));
        assert!(engine.is_running());

        engine.dispose().unwrap();
        engine.dispose().unwrap();

        assert!(!engine.is_running());
        assert!(handle.is_disposed());
        assert_eq!(mixer.voice_count(), 0);
        assert_eq!(mixer.bound_voices(), 0);
        let events = engine.poll_events();
        assert!(events.contains(&SonavoxEvent::StaticStarted {
            channel: "ambience".into()
        }));
        assert!(events.contains(&SonavoxEvent::EngineStopped));

        assert!(matches!(engine.enable(), Err(SonavoxError::Engine(_))));
    }

    #[test]
    fn test_full_queue_is_reported() {
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let volume: VolumeFn = Arc::new(move |channel: &ChannelId| {
            if channel.as_str() == "stall" {
                // Blocks the engine thread until the test drops the gate.
                let _ = gate_rx.recv();
            }
            1.0
        });
        let desc = SonavoxEngineDesc::default().command_queue_capacity(2);
        let (engine, _mixer) = spawn_headless(desc, volume);

        engine.play_sound(&memory_key(), SoundParams::new("stall")).unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            matches!(engine.enable(), Err(SonavoxError::QueueFull))
        }));

        drop(gate_tx);
        engine.dispose().unwrap();
        assert!(!engine.is_running());
    }

    #[test]
    fn test_device_factory_failure_is_returned() {
        let result = SonavoxEngine::spawn(
            SonavoxEngineDesc::default(),
            || -> Result<SoftwareDevice> {
                Err(SonavoxError::AudioDevice("no output device".to_string()))
            },
            Arc::new(ToneCodec::new(100)),
            full_volume(),
        );
        assert!(matches!(result, Err(SonavoxError::AudioDevice(_))));
    }

    #[test]
    fn test_invalid_desc_is_rejected() {
        let result = SonavoxEngine::spawn(
            SonavoxEngineDesc::default().voice_count(0),
            || Ok(SoftwareDevice::headless(48000)),
            Arc::new(ToneCodec::new(100)),
            full_volume(),
        );
        assert!(matches!(result, Err(SonavoxError::Configuration(_))));
    }
}
