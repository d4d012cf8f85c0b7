//! Asset to uploaded-PCM cache, populated by background decode tasks.

use crate::asset::AssetKey;
use crate::backend::{AudioDevice, BufferHandle, PcmFormat};
use crate::codec::{Codec, decode_to_end};
use crate::error::{Result, SonavoxError};
use crate::voice_pool::VoicePool;
use crossbeam_channel::{Receiver, TryRecvError, bounded};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

const DECODE_BLOCK_FRAMES: usize = 4096;

/// A decoded sound uploaded into one hardware buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedAudio {
    pub buffer: BufferHandle,
    pub format: PcmFormat,
}

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Ready(CachedAudio),
    /// Decode in flight; ask again on a later tick.
    Pending,
    /// The decode failed. The entry is gone, so the next lookup starts over.
    Failed(String),
}

struct DecodedPcm {
    format: PcmFormat,
    samples: Vec<i16>,
}

struct PendingDecode {
    result: Receiver<Result<DecodedPcm>>,
    cancel: Arc<AtomicBool>,
}

enum CacheEntry {
    Pending(PendingDecode),
    Ready(CachedAudio),
}

/// Engine-thread cache of fully decoded sounds.
///
/// At most one decode task per key is in flight at a time, no matter how many
/// entities ask for it.
pub struct AudioCache {
    codec: Arc<dyn Codec>,
    entries: HashMap<AssetKey, CacheEntry>,
    generation: u64,
}

impl AudioCache {
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self {
            codec,
            entries: HashMap::new(),
            generation: 0,
        }
    }

    /// Bumped by every [`clear`](Self::clear). Buffers handed out under an
    /// older generation have been deleted.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, key: &AssetKey, device: &mut dyn AudioDevice) -> CacheLookup {
        let decoded = match self.entries.get(key) {
            Some(CacheEntry::Ready(audio)) => return CacheLookup::Ready(*audio),
            Some(CacheEntry::Pending(pending)) => match pending.result.try_recv() {
                Err(TryRecvError::Empty) => return CacheLookup::Pending,
                Ok(result) => result,
                Err(TryRecvError::Disconnected) => Err(SonavoxError::AudioLoading(
                    "decode task exited without a result".to_string(),
                )),
            },
            None => {
                return match self.start_decode(key) {
                    Ok(pending) => {
                        self.entries.insert(key.clone(), CacheEntry::Pending(pending));
                        CacheLookup::Pending
                    }
                    Err(e) => CacheLookup::Failed(e.to_string()),
                };
            }
        };

        let outcome = decoded.and_then(|pcm| upload(device, pcm));

        match outcome {
            Ok(audio) => {
                log::debug!(
                    "Cached {} ({} ch @ {} Hz) in buffer {}",
                    key.describe(),
                    audio.format.channels,
                    audio.format.sample_rate,
                    audio.buffer.raw()
                );
                self.entries.insert(key.clone(), CacheEntry::Ready(audio));
                CacheLookup::Ready(audio)
            }
            Err(e) => {
                log::warn!("Failed to decode {}: {}", key.describe(), e);
                self.entries.remove(key);
                CacheLookup::Failed(e.to_string())
            }
        }
    }

    /// Deletes every uploaded buffer (detaching it from voices first) and
    /// cancels in-flight decodes without waiting for them.
    pub fn clear(&mut self, device: &mut dyn AudioDevice, pool: &mut VoicePool) {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            match entry {
                CacheEntry::Ready(audio) => {
                    pool.detach_buffer(device, audio.buffer);
                    device.delete_buffer(audio.buffer);
                }
                CacheEntry::Pending(pending) => {
                    pending.cancel.store(true, Ordering::Relaxed);
                }
            }
        }
        self.generation += 1;
        log::debug!("Cleared {} cache entries", count);
    }

    fn start_decode(&self, key: &AssetKey) -> Result<PendingDecode> {
        let (tx, rx) = bounded(1);
        let cancel = Arc::new(AtomicBool::new(false));

        let codec = self.codec.clone();
        let key = key.clone();
        let cancelled = cancel.clone();
        thread::Builder::new()
            .name("sonavox-decode".to_string())
            .spawn(move || {
                let result = decode_asset(codec.as_ref(), &key, &cancelled);
                // The cache may have been cleared meanwhile.
                let _ = tx.send(result);
            })
            .map_err(|e| SonavoxError::Engine(format!("Failed to spawn decode task: {}", e)))?;

        Ok(PendingDecode { result: rx, cancel })
    }
}

fn decode_asset(codec: &dyn Codec, key: &AssetKey, cancel: &AtomicBool) -> Result<DecodedPcm> {
    let stream = key.open_byte_stream()?;
    let mut decoder = codec.open(stream, key.type_hint())?;
    let (format, samples) = decode_to_end(decoder.as_mut(), DECODE_BLOCK_FRAMES, || {
        cancel.load(Ordering::Relaxed)
    })?;
    if format.channels == 0 || format.sample_rate == 0 {
        return Err(SonavoxError::AudioFormat(format!(
            "unplayable PCM layout: {} ch @ {} Hz",
            format.channels, format.sample_rate
        )));
    }
    Ok(DecodedPcm { format, samples })
}

fn upload(device: &mut dyn AudioDevice, pcm: DecodedPcm) -> Result<CachedAudio> {
    let buffer = device.create_buffer()?;
    device.upload_buffer(buffer, pcm.format, &pcm.samples);
    Ok(CachedAudio {
        buffer,
        format: pcm.format,
    })
}
