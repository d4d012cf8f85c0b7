//! Shared fixtures for unit tests.

use crate::asset::{AssetKey, ByteStream, MemoryAsset};
use crate::backend::PcmFormat;
use crate::codec::{Codec, Decoder, PcmBlock, PullStatus};
use crate::error::{Result, SonavoxError};
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const TONE_CHUNK_FRAMES: usize = 256;

/// Codec that ignores its input and produces a fixed number of mono frames,
/// counting how often it is opened and how many frames it has produced.
pub(crate) struct ToneCodec {
    pub opens: Arc<AtomicUsize>,
    pub frames_decoded: Arc<AtomicUsize>,
    frames: usize,
    format: PcmFormat,
    open_delay: Duration,
}

impl ToneCodec {
    pub fn new(frames: usize) -> Self {
        Self {
            opens: Arc::new(AtomicUsize::new(0)),
            frames_decoded: Arc::new(AtomicUsize::new(0)),
            frames,
            format: PcmFormat {
                channels: 1,
                sample_rate: 48000,
            },
            open_delay: Duration::ZERO,
        }
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }
}

impl Codec for ToneCodec {
    fn open(&self, mut stream: ByteStream, _hint: Option<&str>) -> Result<Box<dyn Decoder>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let mut sink = Vec::new();
        stream.read_to_end(&mut sink)?;
        if !self.open_delay.is_zero() {
            thread::sleep(self.open_delay);
        }
        Ok(Box::new(ToneDecoder {
            remaining: self.frames,
            format: self.format,
            produced: self.frames_decoded.clone(),
        }))
    }
}

struct ToneDecoder {
    remaining: usize,
    format: PcmFormat,
    produced: Arc<AtomicUsize>,
}

impl Decoder for ToneDecoder {
    fn pull(&mut self, block: &mut PcmBlock) -> Result<PullStatus> {
        if self.remaining == 0 {
            return Ok(PullStatus::EndOfStream);
        }
        let frames = self.remaining.min(TONE_CHUNK_FRAMES);
        let samples = vec![1000i16; frames * self.format.channels as usize];
        let taken = block.append(self.format, &samples)? / self.format.channels as usize;
        self.remaining -= taken;
        self.produced.fetch_add(taken, Ordering::SeqCst);
        if block.is_full() {
            Ok(PullStatus::BufferFull)
        } else {
            Ok(PullStatus::Yield)
        }
    }

    fn channels(&self) -> Option<u16> {
        Some(self.format.channels)
    }

    fn rate(&self) -> Option<u32> {
        Some(self.format.sample_rate)
    }
}

/// Codec whose every open fails.
#[derive(Default)]
pub(crate) struct FailingCodec {
    pub opens: Arc<AtomicUsize>,
}

impl Codec for FailingCodec {
    fn open(&self, _stream: ByteStream, _hint: Option<&str>) -> Result<Box<dyn Decoder>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Err(SonavoxError::AudioLoading("unsupported test asset".to_string()))
    }
}

/// A fresh in-memory asset key. Its bytes are irrelevant to the test codecs.
pub(crate) fn memory_key() -> AssetKey {
    AssetKey::new(MemoryAsset::new(vec![0u8; 16], Some("raw")))
}

/// Polls `condition` until it holds or `timeout` elapses.
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}
