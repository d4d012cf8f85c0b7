//! Pull-based decoding of compressed audio into 16-bit interleaved PCM.

mod symphonia_codec;

pub use symphonia_codec::SymphoniaCodec;

use crate::asset::ByteStream;
use crate::backend::PcmFormat;
use crate::error::{Result, SonavoxError};

/// Outcome of one [`Decoder::pull`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullStatus {
    /// Some frames were appended and the block still has room; pull again.
    Yield,
    /// The block is full.
    BufferFull,
    /// No more audio. The block may still hold a partial fill.
    EndOfStream,
}

/// Turns byte streams into decoders. Shared by every decode task.
pub trait Codec: Send + Sync {
    fn open(&self, stream: ByteStream, hint: Option<&str>) -> Result<Box<dyn Decoder>>;
}

pub trait Decoder {
    /// Appends decoded frames to `block` until it is full or the decoder needs
    /// to be called again.
    fn pull(&mut self, block: &mut PcmBlock) -> Result<PullStatus>;

    /// PCM channel count, once known.
    fn channels(&self) -> Option<u16>;

    /// Sample rate in Hz, once known.
    fn rate(&self) -> Option<u32>;
}

/// A reusable block of interleaved 16-bit PCM with a fixed frame capacity.
#[derive(Debug, Clone)]
pub struct PcmBlock {
    samples: Vec<i16>,
    capacity_frames: usize,
    format: Option<PcmFormat>,
    last: bool,
}

impl PcmBlock {
    pub fn new(capacity_frames: usize) -> Self {
        Self {
            samples: Vec::new(),
            capacity_frames: capacity_frames.max(1),
            format: None,
            last: false,
        }
    }

    /// Empties the block for reuse, keeping its allocation.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.format = None;
        self.last = false;
    }

    pub fn format(&self) -> Option<PcmFormat> {
        self.format
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    pub fn frames(&self) -> usize {
        match self.format {
            Some(format) => self.samples.len() / format.channels.max(1) as usize,
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames() >= self.capacity_frames
    }

    /// Whether this is the final block of a stream.
    pub fn is_last(&self) -> bool {
        self.last
    }

    pub fn mark_last(&mut self) {
        self.last = true;
    }

    /// Appends whole frames from `interleaved` until the block is full.
    ///
    /// Returns how many samples were taken. Fails if `format` differs from the
    /// format of frames already in the block.
    pub fn append(&mut self, format: PcmFormat, interleaved: &[i16]) -> Result<usize> {
        match self.format {
            Some(existing) if existing != format => {
                return Err(SonavoxError::AudioFormat(format!(
                    "PCM format changed inside a block: {:?} -> {:?}",
                    existing, format
                )));
            }
            Some(_) => {}
            None => self.format = Some(format),
        }

        let channels = format.channels.max(1) as usize;
        let room = self.capacity_frames.saturating_sub(self.frames()) * channels;
        let whole = interleaved.len() - interleaved.len() % channels;
        let take = room.min(whole);
        if self.samples.capacity() == 0 {
            self.samples.reserve_exact(self.capacity_frames * channels);
        }
        self.samples.extend_from_slice(&interleaved[..take]);
        Ok(take)
    }
}

/// Decodes a whole stream into memory.
pub(crate) fn decode_to_end(
    decoder: &mut dyn Decoder,
    block_frames: usize,
    cancelled: impl Fn() -> bool,
) -> Result<(PcmFormat, Vec<i16>)> {
    let mut block = PcmBlock::new(block_frames);
    let mut samples = Vec::new();
    let mut format = None;

    loop {
        if cancelled() {
            return Err(SonavoxError::AudioLoading("decode cancelled".to_string()));
        }
        let status = decoder.pull(&mut block)?;
        if let Some(block_format) = block.format() {
            match format {
                Some(existing) if existing != block_format => {
                    return Err(SonavoxError::AudioFormat(format!(
                        "PCM format changed mid-stream: {:?} -> {:?}",
                        existing, block_format
                    )));
                }
                _ => format = Some(block_format),
            }
        }
        match status {
            PullStatus::Yield => {}
            PullStatus::BufferFull => {
                samples.extend_from_slice(block.samples());
                block.reset();
            }
            PullStatus::EndOfStream => {
                samples.extend_from_slice(block.samples());
                break;
            }
        }
    }

    let format = format.or_else(|| match (decoder.channels(), decoder.rate()) {
        (Some(channels), Some(sample_rate)) => Some(PcmFormat {
            channels,
            sample_rate,
        }),
        _ => None,
    });
    let format = format.ok_or_else(|| {
        SonavoxError::AudioFormat("stream ended before its format was known".to_string())
    })?;
    Ok((format, samples))
}
