use super::{Codec, Decoder, PcmBlock, PullStatus};
use crate::asset::ByteStream;
use crate::backend::PcmFormat;
use crate::error::{Result, SonavoxError};
use symphonia::{
    core::{
        audio::SampleBuffer,
        codecs::{Decoder as SymphoniaDecoderImpl, DecoderOptions},
        errors::Error,
        formats::{FormatOptions, FormatReader},
        io::{MediaSourceStream, ReadOnlySource},
        meta::MetadataOptions,
        probe::Hint,
    },
    default::{get_codecs, get_probe},
};

/// Default codec, backed by the Symphonia decoder library.
///
/// Supports the formats enabled in Symphonia's default feature set plus MP3.
/// Output is always 16-bit interleaved PCM regardless of the source bit depth.
pub struct SymphoniaCodec;

impl Codec for SymphoniaCodec {
    fn open(&self, stream: ByteStream, hint: Option<&str>) -> Result<Box<dyn Decoder>> {
        let mss = MediaSourceStream::new(Box::new(ReadOnlySource::new(stream)), Default::default());

        let mut probe_hint = Hint::new();
        match hint {
            Some(h) if h.contains('/') => {
                probe_hint.mime_type(h);
            }
            Some(h) => {
                probe_hint.with_extension(h);
            }
            None => {}
        }

        let probed = get_probe()
            .format(
                &probe_hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                SonavoxError::AudioLoading(format!("Failed to probe audio format: {:?}", e))
            })?;

        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| SonavoxError::AudioLoading("No default audio track found".to_string()))?;
        let track_id = track.id;

        let pcm_format = match (track.codec_params.channels, track.codec_params.sample_rate) {
            (Some(channels), Some(sample_rate)) => Some(PcmFormat {
                channels: channels.count() as u16,
                sample_rate,
            }),
            _ => None,
        };

        let decoder = get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| {
                SonavoxError::AudioLoading(format!("Failed to create decoder: {:?}", e))
            })?;

        Ok(Box::new(SymphoniaDecoder {
            format,
            decoder,
            track_id,
            pcm_format,
            pending: Vec::new(),
            pending_offset: 0,
            finished: false,
        }))
    }
}

struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn SymphoniaDecoderImpl>,
    track_id: u32,
    pcm_format: Option<PcmFormat>,
    /// Samples of the last packet that did not fit in the caller's block
    pending: Vec<i16>,
    pending_offset: usize,
    finished: bool,
}

impl SymphoniaDecoder {
    /// Decodes the next packet of our track into `pending`.
    /// Returns `false` at end of stream.
    fn decode_next_packet(&mut self) -> Result<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(_)) => return Ok(false), // end-of-file
                Err(e) => {
                    return Err(SonavoxError::AudioLoading(format!(
                        "Error reading packet: {:?}",
                        e
                    )));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(Error::IoError(_)) => return Ok(false), // also EOF in some formats
                Err(Error::DecodeError(e)) => {
                    log::debug!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => {
                    return Err(SonavoxError::AudioLoading(format!(
                        "Error decoding packet: {:?}",
                        e
                    )));
                }
            };

            let spec = *decoded.spec();
            let format = PcmFormat {
                channels: spec.channels.count() as u16,
                sample_rate: spec.rate,
            };
            match self.pcm_format {
                Some(existing) if existing != format => {
                    return Err(SonavoxError::AudioFormat(format!(
                        "Stream format changed mid-stream: {} ch @ {} Hz -> {} ch @ {} Hz",
                        existing.channels, existing.sample_rate, format.channels, format.sample_rate
                    )));
                }
                _ => self.pcm_format = Some(format),
            }

            let mut tmp = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
            tmp.copy_interleaved_ref(decoded);

            self.pending.clear();
            self.pending.extend_from_slice(tmp.samples());
            self.pending_offset = 0;
            return Ok(true);
        }
    }
}

impl Decoder for SymphoniaDecoder {
    fn pull(&mut self, block: &mut PcmBlock) -> Result<PullStatus> {
        if self.pending_offset >= self.pending.len() {
            if self.finished || !self.decode_next_packet()? {
                self.finished = true;
                return Ok(PullStatus::EndOfStream);
            }
        }

        let Some(format) = self.pcm_format else {
            return Ok(PullStatus::Yield);
        };
        let taken = block.append(format, &self.pending[self.pending_offset..])?;
        self.pending_offset += taken;

        if block.is_full() {
            Ok(PullStatus::BufferFull)
        } else {
            Ok(PullStatus::Yield)
        }
    }

    fn channels(&self) -> Option<u16> {
        self.pcm_format.map(|f| f.channels)
    }

    fn rate(&self) -> Option<u32> {
        self.pcm_format.map(|f| f.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{AssetKey, MemoryAsset};
    use crate::codec::decode_to_end;

    /// Builds a minimal 16-bit PCM WAV file in memory.
    fn wav_bytes(channels: u16, sample_rate: u32, samples: &[i16]) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let block_align = channels * 2;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_decodes_wav_to_i16() {
        let samples: Vec<i16> = (0..2000).map(|i| (i % 200) as i16 * 100).collect();
        let key = AssetKey::new(MemoryAsset::new(wav_bytes(2, 22050, &samples), Some("wav")));

        let mut decoder = SymphoniaCodec
            .open(key.open_byte_stream().unwrap(), key.type_hint())
            .unwrap();
        let (format, decoded) = decode_to_end(decoder.as_mut(), 256, || false).unwrap();

        assert_eq!(format.channels, 2);
        assert_eq!(format.sample_rate, 22050);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_pull_respects_block_capacity() {
        let samples = vec![1i16; 1000];
        let key = AssetKey::new(MemoryAsset::new(wav_bytes(1, 8000, &samples), Some("audio/wav")));
        let mut decoder = SymphoniaCodec
            .open(key.open_byte_stream().unwrap(), key.type_hint())
            .unwrap();

        let mut block = PcmBlock::new(300);
        let mut total = 0;
        loop {
            let status = decoder.pull(&mut block).unwrap();
            assert!(block.frames() <= 300);
            match status {
                PullStatus::Yield => {}
                PullStatus::BufferFull => {
                    total += block.frames();
                    block.reset();
                }
                PullStatus::EndOfStream => {
                    total += block.frames();
                    break;
                }
            }
        }
        assert_eq!(total, 1000);
        assert_eq!(decoder.channels(), Some(1));
        assert_eq!(decoder.rate(), Some(8000));
    }

    #[test]
    fn test_garbage_fails_to_probe() {
        let key = AssetKey::new(MemoryAsset::new(vec![0u8; 64], None));
        let result = SymphoniaCodec.open(key.open_byte_stream().unwrap(), None);
        assert!(matches!(result, Err(SonavoxError::AudioLoading(_))));
    }
}
