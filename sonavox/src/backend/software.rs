use super::{
    AudioDevice, BufferHandle, DistanceModel, Orientation, PcmFormat, VoiceHandle, VoiceState,
};
use crate::error::{Result, SonavoxError};
use crate::math::Vec3;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use std::collections::{HashMap, VecDeque};
use std::f32::consts::FRAC_PI_4;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const I16_SCALE: f32 = 1.0 / 32768.0;

struct PcmData {
    format: PcmFormat,
    samples: Vec<i16>,
}

impl PcmData {
    fn frames(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }

    fn frame(&self, index: usize) -> (f32, f32) {
        let channels = self.format.channels.max(1) as usize;
        let base = index * channels;
        let left = self.samples[base] as f32 * I16_SCALE;
        let right = if channels > 1 {
            self.samples[base + 1] as f32 * I16_SCALE
        } else {
            left
        };
        (left, right)
    }
}

struct Voice {
    state: VoiceState,
    bound: Option<u32>,
    queue: VecDeque<u32>,
    processed: usize,
    /// Fractional frame position inside the current buffer
    cursor: f64,
    gain: f32,
    pitch: f32,
    position: Vec3,
    velocity: Vec3,
    relative: bool,
    distance: DistanceModel,
    looping: bool,
}

impl Voice {
    fn new() -> Self {
        Self {
            state: VoiceState::Initial,
            bound: None,
            queue: VecDeque::new(),
            processed: 0,
            cursor: 0.0,
            gain: 1.0,
            pitch: 1.0,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            relative: false,
            distance: DistanceModel {
                reference_distance: 1.0,
                rolloff: 1.0,
                max_distance: f32::MAX,
            },
            looping: false,
        }
    }

    fn current_buffer(&self) -> Option<u32> {
        match self.bound {
            Some(buffer) => Some(buffer),
            None => self.queue.get(self.processed).copied(),
        }
    }

    fn halt(&mut self) {
        self.state = VoiceState::Stopped;
        self.cursor = 0.0;
    }
}

struct ListenerPose {
    position: Vec3,
    orientation: Orientation,
    velocity: Vec3,
}

struct MixerState {
    sample_rate: u32,
    voices: HashMap<u32, Voice>,
    buffers: HashMap<u32, PcmData>,
    listener: ListenerPose,
    speed_of_sound: f32,
    paused: bool,
    next_voice: u32,
    next_buffer: u32,
}

/// Read-only view of one voice, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSnapshot {
    pub state: VoiceState,
    pub bound: Option<BufferHandle>,
    pub queued: usize,
    pub processed: usize,
    pub gain: f32,
    pub pitch: f32,
    pub position: Vec3,
    pub relative: bool,
    pub looping: bool,
}

/// Shared state of the software voice renderer.
///
/// Cloning is cheap and every clone sees the same voices; the engine thread
/// mutates it through [`SoftwareDevice`] while an output callback (or a test)
/// renders from it.
#[derive(Clone)]
pub struct SoftwareMixer {
    state: Arc<Mutex<MixerState>>,
}

impl SoftwareMixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(MixerState {
                sample_rate,
                voices: HashMap::new(),
                buffers: HashMap::new(),
                listener: ListenerPose {
                    position: Vec3::ZERO,
                    orientation: Orientation {
                        forward: -Vec3::Z,
                        up: Vec3::Y,
                    },
                    velocity: Vec3::ZERO,
                },
                speed_of_sound: 343.3,
                paused: false,
                next_voice: 1,
                next_buffer: 1,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MixerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sample_rate(&self) -> u32 {
        self.state().sample_rate
    }

    /// Renders interleaved output, overwriting `out`. Returns the frame count.
    pub fn render(&self, out: &mut [f32], channels: u16) -> usize {
        let mut state = self.state();
        render_into(&mut state, out, channels)
    }

    /// Like [`render`](Self::render) but gives up instead of waiting for the lock.
    /// Used from the real-time output callback.
    pub fn try_render(&self, out: &mut [f32], channels: u16) -> bool {
        match self.state.try_lock() {
            Ok(mut state) => {
                render_into(&mut state, out, channels);
                true
            }
            Err(_) => false,
        }
    }

    pub fn voice_count(&self) -> usize {
        self.state().voices.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.state().buffers.len()
    }

    pub fn playing_voices(&self) -> usize {
        self.state()
            .voices
            .values()
            .filter(|voice| voice.state == VoiceState::Playing)
            .count()
    }

    /// Voices holding a buffer, either bound or queued.
    pub fn bound_voices(&self) -> usize {
        self.state()
            .voices
            .values()
            .filter(|voice| voice.bound.is_some() || !voice.queue.is_empty())
            .count()
    }

    pub fn voice(&self, voice: VoiceHandle) -> Option<VoiceSnapshot> {
        self.state().voices.get(&voice.0).map(|v| VoiceSnapshot {
            state: v.state,
            bound: v.bound.map(BufferHandle),
            queued: v.queue.len(),
            processed: v.processed,
            gain: v.gain,
            pitch: v.pitch,
            position: v.position,
            relative: v.relative,
            looping: v.looping,
        })
    }

    pub fn voices(&self) -> Vec<(VoiceHandle, VoiceSnapshot)> {
        let handles: Vec<u32> = self.state().voices.keys().copied().collect();
        handles
            .into_iter()
            .filter_map(|id| {
                let handle = VoiceHandle(id);
                self.voice(handle).map(|snapshot| (handle, snapshot))
            })
            .collect()
    }

    pub fn listener_position(&self) -> Vec3 {
        self.state().listener.position
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }
}

fn render_into(state: &mut MixerState, out: &mut [f32], channels: u16) -> usize {
    out.fill(0.0);
    let channels = channels.max(1) as usize;
    let frames = out.len() / channels;
    if state.paused {
        return frames;
    }

    let MixerState {
        sample_rate,
        voices,
        buffers,
        listener,
        speed_of_sound,
        ..
    } = state;

    for voice in voices.values_mut() {
        if voice.state != VoiceState::Playing {
            continue;
        }
        let mono = voice
            .current_buffer()
            .and_then(|id| buffers.get(&id))
            .map(|pcm| pcm.format.channels == 1)
            .unwrap_or(true);
        let mix = voice_mix(voice, listener, mono, *speed_of_sound);

        for frame in 0..frames {
            let Some((left, right)) = next_frame(voice, buffers, *sample_rate, mix.doppler) else {
                break;
            };
            let base = frame * channels;
            if channels == 1 {
                out[base] += 0.5 * (left * mix.left + right * mix.right);
            } else {
                out[base] += left * mix.left;
                out[base + 1] += right * mix.right;
            }
        }
    }

    frames
}

/// Pulls one frame from the voice and advances its cursor, handling looping
/// and buffer queues. Returns `None` once the voice has stopped.
fn next_frame(
    voice: &mut Voice,
    buffers: &HashMap<u32, PcmData>,
    output_rate: u32,
    doppler: f32,
) -> Option<(f32, f32)> {
    loop {
        let Some(pcm) = voice.current_buffer().and_then(|id| buffers.get(&id)) else {
            voice.halt();
            return None;
        };
        let total = pcm.frames();
        let index = voice.cursor as usize;
        if index < total {
            let step = pcm.format.sample_rate as f64 / output_rate.max(1) as f64
                * (voice.pitch * doppler).max(0.01) as f64;
            voice.cursor += step;
            return Some(pcm.frame(index));
        }

        voice.cursor = (voice.cursor - total as f64).max(0.0);
        if voice.bound.is_some() {
            if !voice.looping || total == 0 {
                voice.halt();
                return None;
            }
        } else {
            voice.processed += 1;
            if voice.processed >= voice.queue.len() {
                voice.halt();
                return None;
            }
        }
    }
}

struct VoiceMix {
    left: f32,
    right: f32,
    doppler: f32,
}

fn voice_mix(voice: &Voice, listener: &ListenerPose, mono: bool, speed_of_sound: f32) -> VoiceMix {
    if !mono {
        return VoiceMix {
            left: voice.gain,
            right: voice.gain,
            doppler: 1.0,
        };
    }

    let (local, relative_velocity) = if voice.relative {
        (voice.position, voice.velocity)
    } else {
        (
            voice.position - listener.position,
            voice.velocity - listener.velocity,
        )
    };
    let distance = local.length();
    let model = voice.distance;
    let clamped = distance.clamp(
        model.reference_distance,
        model.max_distance.max(model.reference_distance),
    );
    let denominator =
        model.reference_distance + model.rolloff * (clamped - model.reference_distance);
    let attenuation = if denominator > 0.0 {
        (model.reference_distance / denominator).min(1.0)
    } else {
        1.0
    };

    let right_axis = listener
        .orientation
        .forward
        .cross(listener.orientation.up)
        .normalize_or_zero();
    let (pan, doppler) = if distance > 1e-6 {
        let direction = local / distance;
        // Positive closing speed raises the pitch.
        let receding = relative_velocity.dot(direction);
        let doppler = speed_of_sound / (speed_of_sound + receding).max(speed_of_sound * 0.5);
        (direction.dot(right_axis).clamp(-1.0, 1.0), doppler)
    } else {
        (0.0, 1.0)
    };
    let angle = (pan + 1.0) * FRAC_PI_4;
    let gain = voice.gain * attenuation;
    VoiceMix {
        left: gain * angle.cos(),
        right: gain * angle.sin(),
        doppler,
    }
}

/// [`AudioDevice`] backed by a [`SoftwareMixer`], optionally feeding a cpal output stream.
pub struct SoftwareDevice {
    mixer: SoftwareMixer,
    output: Option<cpal::Stream>,
}

impl SoftwareDevice {
    /// A device with no audio output; render it manually through its mixer.
    pub fn headless(sample_rate: u32) -> Self {
        Self::with_mixer(SoftwareMixer::new(sample_rate))
    }

    pub fn with_mixer(mixer: SoftwareMixer) -> Self {
        Self {
            mixer,
            output: None,
        }
    }

    /// Opens the default output device and starts rendering into it.
    pub fn open_default_output() -> Result<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            SonavoxError::AudioDevice("No default output device available".into())
        })?;

        let default_config = device.default_output_config().map_err(|e| {
            SonavoxError::AudioDevice(format!("Failed to get default config: {}", e))
        })?;
        let config = default_config.config();
        let mixer = SoftwareMixer::new(config.sample_rate.0);

        log::info!(
            "Opening output device {:?} ({} Hz, {} channels, {:?})",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            config.sample_rate.0,
            config.channels,
            default_config.sample_format()
        );

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => create_stream::<f32>(&device, &config, mixer.clone())?,
            cpal::SampleFormat::I16 => create_stream::<i16>(&device, &config, mixer.clone())?,
            cpal::SampleFormat::U16 => create_stream::<u16>(&device, &config, mixer.clone())?,
            _ => {
                return Err(SonavoxError::AudioFormat(
                    "Unsupported sample format".into(),
                ));
            }
        };

        stream.play().map_err(|e| {
            SonavoxError::AudioDevice(format!("Failed to start stream: {}", e))
        })?;

        Ok(Self {
            mixer,
            output: Some(stream),
        })
    }

    pub fn mixer(&self) -> &SoftwareMixer {
        &self.mixer
    }

    fn with_voice(&mut self, voice: VoiceHandle, f: impl FnOnce(&mut Voice)) {
        if let Some(v) = self.mixer.state().voices.get_mut(&voice.0) {
            f(v);
        }
    }

    fn read_voice<T>(&self, voice: VoiceHandle, default: T, f: impl FnOnce(&Voice) -> T) -> T {
        self.mixer.state().voices.get(&voice.0).map(f).unwrap_or(default)
    }
}

fn create_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: SoftwareMixer,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels;
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                if !mixer.try_render(&mut scratch, channels) {
                    // Engine thread holds the lock; emit silence this period.
                    scratch.fill(0.0);
                }
                for (sample, value) in data.iter_mut().zip(scratch.iter()) {
                    *sample = T::from_sample(*value);
                }
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| SonavoxError::AudioDevice(format!("Failed to build stream: {}", e)))
}

impl AudioDevice for SoftwareDevice {
    fn create_voice(&mut self) -> Result<VoiceHandle> {
        let mut state = self.mixer.state();
        let id = state.next_voice;
        state.next_voice += 1;
        state.voices.insert(id, Voice::new());
        Ok(VoiceHandle(id))
    }

    fn delete_voice(&mut self, voice: VoiceHandle) {
        self.mixer.state().voices.remove(&voice.0);
    }

    fn create_buffer(&mut self) -> Result<BufferHandle> {
        let mut state = self.mixer.state();
        let id = state.next_buffer;
        state.next_buffer += 1;
        let format = PcmFormat {
            channels: 1,
            sample_rate: state.sample_rate,
        };
        state.buffers.insert(
            id,
            PcmData {
                format,
                samples: Vec::new(),
            },
        );
        Ok(BufferHandle(id))
    }

    fn upload_buffer(&mut self, buffer: BufferHandle, format: PcmFormat, samples: &[i16]) {
        if let Some(pcm) = self.mixer.state().buffers.get_mut(&buffer.0) {
            pcm.format = format;
            pcm.samples.clear();
            pcm.samples.extend_from_slice(samples);
        }
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        self.mixer.state().buffers.remove(&buffer.0);
    }

    fn bind_buffer(&mut self, voice: VoiceHandle, buffer: Option<BufferHandle>) {
        self.with_voice(voice, |v| {
            v.queue.clear();
            v.processed = 0;
            v.cursor = 0.0;
            v.bound = buffer.map(|b| b.0);
        });
    }

    fn bound_buffer(&self, voice: VoiceHandle) -> Option<BufferHandle> {
        self.read_voice(voice, None, |v| v.bound.map(BufferHandle))
    }

    fn queue_buffer(&mut self, voice: VoiceHandle, buffer: BufferHandle) {
        self.with_voice(voice, |v| {
            if v.bound.take().is_some() {
                v.cursor = 0.0;
            }
            v.queue.push_back(buffer.0);
        });
    }

    fn unqueue_processed(&mut self, voice: VoiceHandle) -> Option<BufferHandle> {
        let mut unqueued = None;
        self.with_voice(voice, |v| {
            if v.processed > 0 {
                v.processed -= 1;
                unqueued = v.queue.pop_front().map(BufferHandle);
            }
        });
        unqueued
    }

    fn queued_buffers(&self, voice: VoiceHandle) -> usize {
        self.read_voice(voice, 0, |v| v.queue.len())
    }

    fn processed_buffers(&self, voice: VoiceHandle) -> usize {
        self.read_voice(voice, 0, |v| v.processed)
    }

    fn set_gain(&mut self, voice: VoiceHandle, gain: f32) {
        self.with_voice(voice, |v| v.gain = gain.max(0.0));
    }

    fn set_pitch(&mut self, voice: VoiceHandle, pitch: f32) {
        self.with_voice(voice, |v| v.pitch = pitch);
    }

    fn set_position(&mut self, voice: VoiceHandle, position: Vec3) {
        self.with_voice(voice, |v| v.position = position);
    }

    fn set_velocity(&mut self, voice: VoiceHandle, velocity: Vec3) {
        self.with_voice(voice, |v| v.velocity = velocity);
    }

    fn set_relative(&mut self, voice: VoiceHandle, relative: bool) {
        self.with_voice(voice, |v| v.relative = relative);
    }

    fn set_distance_model(&mut self, voice: VoiceHandle, model: DistanceModel) {
        self.with_voice(voice, |v| v.distance = model);
    }

    fn set_looping(&mut self, voice: VoiceHandle, looping: bool) {
        self.with_voice(voice, |v| v.looping = looping);
    }

    fn play(&mut self, voice: VoiceHandle) {
        self.with_voice(voice, |v| {
            if v.state.is_idle() {
                v.cursor = 0.0;
                v.processed = 0;
            }
            v.state = VoiceState::Playing;
        });
    }

    fn stop(&mut self, voice: VoiceHandle) {
        self.with_voice(voice, |v| {
            v.halt();
            v.processed = v.queue.len();
        });
    }

    fn voice_state(&self, voice: VoiceHandle) -> VoiceState {
        self.read_voice(voice, VoiceState::Stopped, |v| v.state)
    }

    fn set_listener(&mut self, position: Vec3, orientation: Orientation, velocity: Vec3) {
        self.mixer.state().listener = ListenerPose {
            position,
            orientation,
            velocity,
        };
    }

    fn set_speed_of_sound(&mut self, speed: f32) {
        self.mixer.state().speed_of_sound = speed;
    }

    fn pause_device(&mut self) -> Result<()> {
        if let Some(stream) = &self.output {
            stream.pause().map_err(|e| {
                SonavoxError::AudioDevice(format!("Failed to pause stream: {}", e))
            })?;
        }
        self.mixer.state().paused = true;
        Ok(())
    }

    fn resume_device(&mut self) -> Result<()> {
        self.mixer.state().paused = false;
        if let Some(stream) = &self.output {
            stream.play().map_err(|e| {
                SonavoxError::AudioDevice(format!("Failed to resume stream: {}", e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono(rate: u32) -> PcmFormat {
        PcmFormat {
            channels: 1,
            sample_rate: rate,
        }
    }

    #[test]
    fn test_bound_voice_stops_at_end() {
        let mut device = SoftwareDevice::headless(100);
        let voice = device.create_voice().unwrap();
        let buffer = device.create_buffer().unwrap();
        device.upload_buffer(buffer, mono(100), &[i16::MAX; 10]);
        device.set_relative(voice, true);
        device.bind_buffer(voice, Some(buffer));
        device.play(voice);

        let mut out = vec![0.0f32; 8];
        device.mixer().render(&mut out, 1);
        assert_eq!(device.voice_state(voice), VoiceState::Playing);
        assert!(out.iter().all(|s| *s > 0.5));

        device.mixer().render(&mut out, 1);
        assert_eq!(device.voice_state(voice), VoiceState::Stopped);
        assert!(out[2..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_looping_voice_keeps_playing() {
        let mut device = SoftwareDevice::headless(100);
        let voice = device.create_voice().unwrap();
        let buffer = device.create_buffer().unwrap();
        device.upload_buffer(buffer, mono(100), &[1000; 4]);
        device.bind_buffer(voice, Some(buffer));
        device.set_looping(voice, true);
        device.play(voice);

        let mut out = vec![0.0f32; 64];
        device.mixer().render(&mut out, 1);
        assert_eq!(device.voice_state(voice), VoiceState::Playing);
    }

    #[test]
    fn test_queue_marks_buffers_processed() {
        let mut device = SoftwareDevice::headless(100);
        let voice = device.create_voice().unwrap();
        let first = device.create_buffer().unwrap();
        let second = device.create_buffer().unwrap();
        device.upload_buffer(first, mono(100), &[1; 4]);
        device.upload_buffer(second, mono(100), &[2; 4]);
        device.queue_buffer(voice, first);
        device.queue_buffer(voice, second);
        device.play(voice);

        let mut out = vec![0.0f32; 6];
        device.mixer().render(&mut out, 1);
        assert_eq!(device.processed_buffers(voice), 1);
        assert_eq!(device.unqueue_processed(voice), Some(first));
        assert_eq!(device.unqueue_processed(voice), None);
        assert_eq!(device.queued_buffers(voice), 1);

        device.mixer().render(&mut out, 1);
        // Underrun: everything consumed, voice stops on its own.
        assert_eq!(device.voice_state(voice), VoiceState::Stopped);
        assert_eq!(device.processed_buffers(voice), 1);
    }

    #[test]
    fn test_distance_attenuation_and_pan() {
        let mut device = SoftwareDevice::headless(100);
        let voice = device.create_voice().unwrap();
        let buffer = device.create_buffer().unwrap();
        device.upload_buffer(buffer, mono(100), &[i16::MAX; 16]);
        device.bind_buffer(voice, Some(buffer));
        device.set_position(voice, Vec3::new(4.0, 0.0, 0.0));
        device.set_distance_model(
            voice,
            DistanceModel {
                reference_distance: 1.0,
                rolloff: 1.0,
                max_distance: f32::MAX,
            },
        );
        device.play(voice);

        let mut out = vec![0.0f32; 4];
        device.mixer().render(&mut out, 2);
        let (left, right) = (out[0], out[1]);
        // Hard right at a quarter of the reference gain.
        assert!(left.abs() < 1e-3);
        assert!((right - 0.25).abs() < 1e-2);
    }

    #[test]
    fn test_paused_device_renders_silence() {
        let mut device = SoftwareDevice::headless(100);
        let voice = device.create_voice().unwrap();
        let buffer = device.create_buffer().unwrap();
        device.upload_buffer(buffer, mono(100), &[i16::MAX; 16]);
        device.bind_buffer(voice, Some(buffer));
        device.set_relative(voice, true);
        device.play(voice);
        device.pause_device().unwrap();

        let mut out = vec![1.0f32; 4];
        device.mixer().render(&mut out, 1);
        assert!(out.iter().all(|s| *s == 0.0));

        device.resume_device().unwrap();
        device.mixer().render(&mut out, 1);
        assert!(out.iter().all(|s| *s > 0.5));
    }
}
