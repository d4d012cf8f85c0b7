//! Abstract voice/device API the engine drives.
//!
//! Everything here is called from the engine thread only, so implementations
//! do not need to be `Send` or `Sync`. [`SoftwareDevice`] is the implementation
//! shipped with the crate.

mod software;

pub use software::{SoftwareDevice, SoftwareMixer, VoiceSnapshot};

use crate::error::Result;
use crate::math::Vec3;

/// Opaque identifier of one hardware playback voice.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct VoiceHandle(pub(crate) u32);

/// Opaque identifier of one hardware PCM buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u32);

impl VoiceHandle {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl BufferHandle {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Hardware playback state of a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Never played since creation or since the last rewind
    Initial,
    Playing,
    Paused,
    Stopped,
}

impl VoiceState {
    /// Initial and Stopped voices are free for reuse.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Initial | Self::Stopped)
    }
}

/// Layout of 16-bit interleaved PCM handed to [`AudioDevice::upload_buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub channels: u16,
    pub sample_rate: u32,
}

/// Distance model parameters of a voice (inverse distance, clamped).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceModel {
    pub reference_distance: f32,
    pub rolloff: f32,
    pub max_distance: f32,
}

/// Orientation of the listener as "forward" and "up" vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    pub forward: Vec3,
    pub up: Vec3,
}

/// The hardware voice API.
pub trait AudioDevice {
    fn create_voice(&mut self) -> Result<VoiceHandle>;
    fn delete_voice(&mut self, voice: VoiceHandle);

    fn create_buffer(&mut self) -> Result<BufferHandle>;
    fn upload_buffer(&mut self, buffer: BufferHandle, format: PcmFormat, samples: &[i16]);
    fn delete_buffer(&mut self, buffer: BufferHandle);

    /// Binds a single buffer to the voice (static playback), or unbinds with `None`.
    /// Binding also clears the voice's buffer queue.
    fn bind_buffer(&mut self, voice: VoiceHandle, buffer: Option<BufferHandle>);
    fn bound_buffer(&self, voice: VoiceHandle) -> Option<BufferHandle>;
    fn queue_buffer(&mut self, voice: VoiceHandle, buffer: BufferHandle);
    /// Removes one processed buffer from the front of the voice queue.
    fn unqueue_processed(&mut self, voice: VoiceHandle) -> Option<BufferHandle>;
    fn queued_buffers(&self, voice: VoiceHandle) -> usize;
    fn processed_buffers(&self, voice: VoiceHandle) -> usize;

    fn set_gain(&mut self, voice: VoiceHandle, gain: f32);
    fn set_pitch(&mut self, voice: VoiceHandle, pitch: f32);
    fn set_position(&mut self, voice: VoiceHandle, position: Vec3);
    fn set_velocity(&mut self, voice: VoiceHandle, velocity: Vec3);
    /// Relative voices are positioned in listener space.
    fn set_relative(&mut self, voice: VoiceHandle, relative: bool);
    fn set_distance_model(&mut self, voice: VoiceHandle, model: DistanceModel);
    fn set_looping(&mut self, voice: VoiceHandle, looping: bool);

    fn play(&mut self, voice: VoiceHandle);
    fn stop(&mut self, voice: VoiceHandle);
    fn voice_state(&self, voice: VoiceHandle) -> VoiceState;

    fn set_listener(&mut self, position: Vec3, orientation: Orientation, velocity: Vec3);
    fn set_speed_of_sound(&mut self, speed: f32);

    fn pause_device(&mut self) -> Result<()>;
    fn resume_device(&mut self) -> Result<()>;
}
