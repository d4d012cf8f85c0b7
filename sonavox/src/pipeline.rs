//! Producer/consumer pipeline feeding a stream's decode task into the engine.
//!
//! Exactly one [`PcmBlock`] circulates per stream: the engine seeds it into the
//! request channel, the decode task fills it and sends it back over the result
//! channel, and the engine returns it as soon as it has uploaded the samples.
//! The decode task therefore never runs more than one block ahead of playback.

use crate::asset::AssetKey;
use crate::codec::{Codec, Decoder, PcmBlock, PullStatus};
use crate::error::{Result, SonavoxError};
use crate::events::SonavoxEvent;
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use std::sync::Arc;
use std::thread;

/// Engine-side end of one stream's decode pipeline.
///
/// Dropping it closes the request channel, which makes the decode task exit
/// on its next receive. The task is never joined.
pub struct StreamPipeline {
    requests: Sender<PcmBlock>,
    results: Receiver<PcmBlock>,
    finished: bool,
}

impl StreamPipeline {
    pub fn spawn(
        asset: AssetKey,
        codec: Arc<dyn Codec>,
        looping: bool,
        block_frames: usize,
        result_capacity: usize,
        events: Sender<SonavoxEvent>,
    ) -> Result<Self> {
        let (requests, request_rx) = bounded::<PcmBlock>(1);
        let (result_tx, results) = bounded::<PcmBlock>(result_capacity.max(1));

        // Seed the loop with the single block this stream will ever use.
        requests
            .send(PcmBlock::new(block_frames))
            .map_err(|_| SonavoxError::Engine("stream request channel closed".to_string()))?;

        thread::Builder::new()
            .name("sonavox-stream".to_string())
            .spawn(move || {
                let task = DecodeTask {
                    asset,
                    codec,
                    looping,
                    events,
                };
                task.run(request_rx, result_tx);
            })
            .map_err(|e| SonavoxError::Engine(format!("Failed to spawn stream task: {}", e)))?;

        Ok(Self {
            requests,
            results,
            finished: false,
        })
    }

    /// Takes the next filled block, if the decode task has produced one.
    pub fn try_next(&mut self) -> Option<PcmBlock> {
        if self.finished {
            return None;
        }
        match self.results.try_recv() {
            Ok(block) => {
                if block.is_last() {
                    self.finished = true;
                }
                Some(block)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.finished = true;
                None
            }
        }
    }

    /// Hands an emptied block back to the decode task.
    pub fn recycle(&self, mut block: PcmBlock) {
        if self.finished {
            return;
        }
        block.reset();
        // Only one block circulates, so the capacity-1 channel always has room.
        let _ = self.requests.try_send(block);
    }

    /// Whether the decode task has delivered its final block.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

struct DecodeTask {
    asset: AssetKey,
    codec: Arc<dyn Codec>,
    looping: bool,
    events: Sender<SonavoxEvent>,
}

impl DecodeTask {
    fn run(&self, requests: Receiver<PcmBlock>, results: Sender<PcmBlock>) {
        let mut decoder = match self.open() {
            Ok(decoder) => Some(decoder),
            Err(e) => {
                self.report(&e);
                None
            }
        };
        let mut produced_since_open = false;

        while let Ok(mut block) = requests.recv() {
            loop {
                let Some(active) = decoder.as_mut() else {
                    block.mark_last();
                    break;
                };

                let before = block.frames();
                let status = active.pull(&mut block);
                if block.frames() > before {
                    produced_since_open = true;
                }

                match status {
                    Ok(PullStatus::Yield) => continue,
                    Ok(PullStatus::BufferFull) => break,
                    // An empty asset would otherwise spin here forever.
                    Ok(PullStatus::EndOfStream) if self.looping && produced_since_open => {
                        produced_since_open = false;
                        decoder = match self.open() {
                            Ok(decoder) => Some(decoder),
                            Err(e) => {
                                self.report(&e);
                                None
                            }
                        };
                        if block.is_full() {
                            break;
                        }
                    }
                    Ok(PullStatus::EndOfStream) => {
                        block.mark_last();
                        break;
                    }
                    Err(e) => {
                        self.report(&e);
                        block.mark_last();
                        break;
                    }
                }
            }

            let last = block.is_last();
            if results.send(block).is_err() || last {
                break;
            }
        }

        log::debug!("Stream decode task for {} exited", self.asset.describe());
    }

    fn open(&self) -> Result<Box<dyn Decoder>> {
        let stream = self.asset.open_byte_stream()?;
        self.codec.open(stream, self.asset.type_hint())
    }

    fn report(&self, error: &SonavoxError) {
        log::warn!("Stream decode failed for {}: {}", self.asset.describe(), error);
        let _ = self.events.send(SonavoxEvent::DecodeFailed {
            asset: self.asset.describe(),
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingCodec, ToneCodec, memory_key, wait_until};
    use crossbeam_channel::unbounded;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn drain(pipeline: &mut StreamPipeline) -> usize {
        let mut frames = 0;
        while !pipeline.is_finished() {
            let mut received = None;
            wait_until(Duration::from_secs(5), || {
                received = pipeline.try_next();
                received.is_some() || pipeline.is_finished()
            });
            if let Some(block) = received {
                frames += block.frames();
                pipeline.recycle(block);
            }
        }
        frames
    }

    #[test]
    fn test_stream_delivers_all_frames() {
        let (events, _rx) = unbounded();
        let mut pipeline =
            StreamPipeline::spawn(memory_key(), Arc::new(ToneCodec::new(2500)), false, 1000, 3, events)
                .unwrap();
        assert_eq!(drain(&mut pipeline), 2500);
        assert!(pipeline.try_next().is_none());
    }

    #[test]
    fn test_stalled_consumer_stalls_decoding() {
        let codec = ToneCodec::new(1_000_000);
        let decoded = codec.frames_decoded.clone();
        let (events, _rx) = unbounded();
        let mut pipeline =
            StreamPipeline::spawn(memory_key(), Arc::new(codec), false, 512, 3, events).unwrap();

        let mut first = None;
        assert!(wait_until(Duration::from_secs(5), || {
            first = pipeline.try_next();
            first.is_some()
        }));
        assert_eq!(first.as_ref().map(|b| b.frames()), Some(512));

        // Hold on to the block: the task has nothing to fill.
        thread::sleep(Duration::from_millis(50));
        assert!(pipeline.try_next().is_none());
        assert_eq!(decoded.load(Ordering::SeqCst), 512);

        pipeline.recycle(first.take().unwrap());
        assert!(wait_until(Duration::from_secs(5), || pipeline.try_next().is_some()));
        assert_eq!(decoded.load(Ordering::SeqCst), 1024);
    }

    #[test]
    fn test_looping_stream_reopens_asset() {
        let codec = ToneCodec::new(300);
        let opens = codec.opens.clone();
        let (events, _rx) = unbounded();
        let mut pipeline =
            StreamPipeline::spawn(memory_key(), Arc::new(codec), true, 1000, 3, events).unwrap();

        let mut received = None;
        assert!(wait_until(Duration::from_secs(5), || {
            received = pipeline.try_next();
            received.is_some()
        }));
        let block = received.unwrap();
        assert!(block.is_full());
        assert!(!block.is_last());
        assert!(opens.load(Ordering::SeqCst) >= 4);
    }

    #[test]
    fn test_open_failure_ends_stream_and_reports() {
        let (events, event_rx) = unbounded();
        let mut pipeline =
            StreamPipeline::spawn(memory_key(), Arc::new(FailingCodec::default()), true, 256, 3, events)
                .unwrap();

        assert_eq!(drain(&mut pipeline), 0);
        assert!(matches!(
            event_rx.try_recv(),
            Ok(SonavoxEvent::DecodeFailed { .. })
        ));
    }

    #[test]
    fn test_dropping_pipeline_stops_task() {
        let codec = ToneCodec::new(usize::MAX);
        let decoded = codec.frames_decoded.clone();
        let (events, _rx) = unbounded();
        let mut pipeline =
            StreamPipeline::spawn(memory_key(), Arc::new(codec), true, 256, 3, events).unwrap();
        assert!(wait_until(Duration::from_secs(5), || pipeline.try_next().is_some()));
        drop(pipeline);

        thread::sleep(Duration::from_millis(20));
        let settled = decoded.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(decoded.load(Ordering::SeqCst), settled);
    }
}
