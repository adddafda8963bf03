//! WAV file loading.
//!
//! Samples are decoded with `hound` and written back out as the raw
//! little-endian frame bytes the file carries, so downstream chunking sees
//! the same bytes a plain frame reader would.

use std::io::Read;
use std::path::Path;

use bytes::Bytes;
use hound::{SampleFormat, WavReader};

use super::chunker::PcmFormat;
use crate::core::session::{SessionError, SessionResult};

/// Most bytes reserved up front from a header's declared length (16 MiB).
const MAX_PREALLOC: usize = 16 * 1024 * 1024;

/// Raw interleaved PCM with its format.
#[derive(Debug, Clone)]
pub struct PcmAudio {
    pub format: PcmFormat,
    pub data: Bytes,
}

impl PcmAudio {
    pub fn new(format: PcmFormat, data: impl Into<Bytes>) -> Self {
        Self {
            format,
            data: data.into(),
        }
    }

    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        let frame_bytes = self.format.frame_bytes();
        if frame_bytes == 0 || self.format.sample_rate == 0 {
            return 0.0;
        }
        (self.data.len() / frame_bytes) as f64 / self.format.sample_rate as f64
    }
}

/// Read a WAV file from disk.
pub fn read_wav_file(path: &Path) -> SessionResult<PcmAudio> {
    let reader = WavReader::open(path)
        .map_err(|e| SessionError::Audio(format!("Failed to open {}: {e}", path.display())))?;
    decode_wav(reader)
}

/// Read WAV data from any reader.
pub fn read_wav<R: Read>(source: R) -> SessionResult<PcmAudio> {
    let reader = WavReader::new(source)
        .map_err(|e| SessionError::Audio(format!("Failed to parse WAV header: {e}")))?;
    decode_wav(reader)
}

fn decode_wav<R: Read>(reader: WavReader<R>) -> SessionResult<PcmAudio> {
    let spec = reader.spec();
    let sample_width = spec.bits_per_sample.div_ceil(8);
    let mut data = Vec::with_capacity(preallocation(reader.len(), sample_width));

    match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 8) => {
            // hound centres 8-bit samples on zero; the file stores them unsigned
            for sample in reader.into_samples::<i8>() {
                let sample = sample.map_err(audio_err)?;
                data.push((sample as i16 + 128) as u8);
            }
        }
        (SampleFormat::Int, 16) => {
            for sample in reader.into_samples::<i16>() {
                data.extend_from_slice(&sample.map_err(audio_err)?.to_le_bytes());
            }
        }
        (SampleFormat::Int, 24) => {
            for sample in reader.into_samples::<i32>() {
                data.extend_from_slice(&sample.map_err(audio_err)?.to_le_bytes()[..3]);
            }
        }
        (SampleFormat::Int, 32) => {
            for sample in reader.into_samples::<i32>() {
                data.extend_from_slice(&sample.map_err(audio_err)?.to_le_bytes());
            }
        }
        (SampleFormat::Float, 32) => {
            for sample in reader.into_samples::<f32>() {
                data.extend_from_slice(&sample.map_err(audio_err)?.to_le_bytes());
            }
        }
        (format, bits) => {
            return Err(SessionError::Audio(format!(
                "Unsupported WAV sample format: {format:?} at {bits} bits"
            )));
        }
    }

    let format = PcmFormat {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        sample_width,
    };
    Ok(PcmAudio::new(format, data))
}

/// Initial buffer size for `samples` declared samples. The header is not
/// trusted beyond [`MAX_PREALLOC`]; longer files grow as they are read.
fn preallocation(samples: u32, sample_width: u16) -> usize {
    (samples as usize)
        .saturating_mul(sample_width as usize)
        .min(MAX_PREALLOC)
}

fn audio_err(e: hound::Error) -> SessionError {
    SessionError::Audio(format!("Failed to read WAV samples: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use std::io::Cursor;

    fn write_wav(spec: WavSpec, write: impl FnOnce(&mut WavWriter<&mut Cursor<Vec<u8>>>)) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            write(&mut writer);
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_read_pcm16_mono() {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let samples: [i16; 4] = [0, 1, -1, i16::MAX];
        let bytes = write_wav(spec, |w| {
            for s in samples {
                w.write_sample(s).unwrap();
            }
        });

        let audio = read_wav(Cursor::new(bytes)).unwrap();
        assert_eq!(audio.format, PcmFormat::pcm16_mono(16000));

        let expected: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(&audio.data[..], &expected[..]);
    }

    #[test]
    fn test_read_8bit_stays_unsigned() {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 8,
            sample_format: SampleFormat::Int,
        };
        let bytes = write_wav(spec, |w| {
            w.write_sample(0i8).unwrap();
            w.write_sample(-128i8).unwrap();
        });

        let audio = read_wav(Cursor::new(bytes)).unwrap();
        assert_eq!(audio.format.sample_width, 1);
        assert_eq!(audio.format.channels, 2);
        assert_eq!(&audio.data[..], &[128u8, 0u8][..]);
    }

    #[test]
    fn test_read_24bit_packs_three_bytes() {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 24,
            sample_format: SampleFormat::Int,
        };
        let bytes = write_wav(spec, |w| {
            w.write_sample(0x012345i32).unwrap();
            w.write_sample(-1i32).unwrap();
        });

        let audio = read_wav(Cursor::new(bytes)).unwrap();
        assert_eq!(audio.format.sample_width, 3);
        assert_eq!(&audio.data[..], &[0x45, 0x23, 0x01, 0xff, 0xff, 0xff][..]);
    }

    #[test]
    fn test_duration() {
        let audio = PcmAudio::new(PcmFormat::pcm16_mono(16000), vec![0u8; 48000]);
        assert!((audio.duration_secs() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_file() {
        let result = read_wav_file(Path::new("/nonexistent/input.wav"));
        assert!(matches!(result, Err(SessionError::Audio(_))));
    }

    #[test]
    fn test_declared_length_is_not_trusted() {
        assert_eq!(preallocation(8, 2), 16);
        assert_eq!(preallocation(u32::MAX, 4), MAX_PREALLOC);

        let spec = WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut bytes = write_wav(spec, |w| {
            for _ in 0..4 {
                w.write_sample(0i16).unwrap();
            }
        });

        // Claim ~4 GiB of samples in a file that holds eight bytes
        let data = bytes.windows(4).position(|w| w == b"data").unwrap();
        bytes[data + 4..data + 8].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());

        let result = read_wav(Cursor::new(bytes));
        assert!(matches!(result, Err(SessionError::Audio(_))));
    }

    #[test]
    fn test_garbage_header() {
        let result = read_wav(Cursor::new(b"definitely not a wav".to_vec()));
        assert!(matches!(result, Err(SessionError::Audio(_))));
    }
}
