//! Fixed table of hardware voices shared by every active entity.

use crate::backend::{AudioDevice, BufferHandle, VoiceHandle, VoiceState};
use crate::error::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// The engine's voice table. Created once at startup and never resized.
///
/// Effects borrow voices for as long as the hardware keeps them playing.
/// Static sources and streams additionally reserve their voice so that a
/// momentarily stopped voice (e.g. a stream underrun) is not handed out again.
pub struct VoicePool {
    voices: Vec<VoiceHandle>,
    reserved: Vec<bool>,
    rng: StdRng,
}

impl VoicePool {
    pub fn new(device: &mut dyn AudioDevice, count: usize) -> Result<Self> {
        Self::with_rng(device, count, StdRng::from_entropy())
    }

    pub fn with_rng(device: &mut dyn AudioDevice, count: usize, rng: StdRng) -> Result<Self> {
        let mut voices = Vec::with_capacity(count);
        for _ in 0..count {
            match device.create_voice() {
                Ok(voice) => voices.push(voice),
                Err(e) => {
                    for voice in voices {
                        device.delete_voice(voice);
                    }
                    return Err(e);
                }
            }
        }
        log::debug!("Created {} voices", count);

        Ok(Self {
            reserved: vec![false; voices.len()],
            voices,
            rng,
        })
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// Returns an idle, unreserved voice or `None` when every voice is busy.
    ///
    /// The scan starts at a random slot and wraps, so load spreads over the
    /// whole table instead of piling onto the low indices.
    pub fn free_voice(&mut self, device: &dyn AudioDevice) -> Option<VoiceHandle> {
        let len = self.voices.len();
        if len == 0 {
            return None;
        }
        let start = self.rng.gen_range(0..len);
        (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&i| !self.reserved[i] && device.voice_state(self.voices[i]).is_idle())
            .map(|i| self.voices[i])
    }

    /// Marks `voice` as owned by a long-lived entity.
    pub fn reserve(&mut self, voice: VoiceHandle) {
        if let Some(i) = self.index_of(voice) {
            self.reserved[i] = true;
        }
    }

    /// Stops and unbinds `voice` and makes it available again.
    pub fn release(&mut self, device: &mut dyn AudioDevice, voice: VoiceHandle) {
        device.stop(voice);
        device.bind_buffer(voice, None);
        device.set_looping(voice, false);
        if let Some(i) = self.index_of(voice) {
            self.reserved[i] = false;
        }
    }

    /// Stops and unbinds every voice currently bound to `buffer`.
    pub fn detach_buffer(&mut self, device: &mut dyn AudioDevice, buffer: BufferHandle) {
        for &voice in &self.voices {
            if device.bound_buffer(voice) == Some(buffer) {
                device.stop(voice);
                device.bind_buffer(voice, None);
            }
        }
    }

    pub fn any_playing(&self, device: &dyn AudioDevice) -> bool {
        self.voices
            .iter()
            .any(|&voice| device.voice_state(voice) == VoiceState::Playing)
    }

    pub fn reserved_count(&self) -> usize {
        self.reserved.iter().filter(|r| **r).count()
    }

    /// Stops and deletes every voice.
    pub fn destroy(&mut self, device: &mut dyn AudioDevice) {
        for voice in self.voices.drain(..) {
            device.stop(voice);
            device.bind_buffer(voice, None);
            device.delete_voice(voice);
        }
        self.reserved.clear();
    }

    fn index_of(&self, voice: VoiceHandle) -> Option<usize> {
        self.voices.iter().position(|&v| v == voice)
    }
}
