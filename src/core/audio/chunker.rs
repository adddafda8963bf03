//! Fixed-duration chunking of raw PCM audio.

use base64::prelude::*;

use crate::core::session::{SessionError, SessionResult};

/// Default chunk duration in seconds.
pub const DEFAULT_CHUNK_SECONDS: f64 = 0.5;

/// Shape of a raw PCM byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    /// Frames per second
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Bytes per sample
    pub sample_width: u16,
}

impl PcmFormat {
    /// 16-bit mono at the given rate.
    pub fn pcm16_mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            sample_width: 2,
        }
    }

    /// Bytes in one interleaved frame.
    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.sample_width as usize
    }
}

/// Splits PCM bytes into chunks of `chunk_seconds` of audio.
///
/// `chunk_bytes = floor(sample_rate * chunk_seconds) * channels * sample_width`.
/// The last chunk carries whatever remains and is never empty.
#[derive(Debug, Clone, Copy)]
pub struct AudioChunker {
    format: PcmFormat,
    chunk_bytes: usize,
}

impl AudioChunker {
    pub fn new(format: PcmFormat, chunk_seconds: f64) -> SessionResult<Self> {
        if !chunk_seconds.is_finite() || chunk_seconds <= 0.0 {
            return Err(SessionError::InvalidConfiguration(format!(
                "chunk duration must be positive, got {chunk_seconds}"
            )));
        }

        let frames = (format.sample_rate as f64 * chunk_seconds).floor();
        let chunk_bytes = (frames < usize::MAX as f64)
            .then_some(frames as usize)
            .and_then(|frames| frames.checked_mul(format.frame_bytes()))
            .ok_or_else(|| {
                SessionError::InvalidConfiguration(format!(
                    "chunk duration {chunk_seconds}s is too large"
                ))
            })?;
        if chunk_bytes == 0 {
            return Err(SessionError::InvalidConfiguration(format!(
                "{chunk_seconds}s of {}Hz/{}ch/{}B audio is an empty chunk",
                format.sample_rate, format.channels, format.sample_width
            )));
        }

        Ok(Self {
            format,
            chunk_bytes,
        })
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    /// Lazily iterate the chunks of `pcm`. Each call starts from the beginning.
    pub fn chunks<'a>(&self, pcm: &'a [u8]) -> std::slice::Chunks<'a, u8> {
        pcm.chunks(self.chunk_bytes)
    }

    /// Number of chunks `pcm` splits into.
    pub fn chunk_count(&self, pcm: &[u8]) -> usize {
        pcm.len().div_ceil(self.chunk_bytes)
    }
}

/// Base64 for embedding a chunk in a JSON string field.
#[inline]
pub fn encode_chunk(chunk: &[u8]) -> String {
    BASE64_STANDARD.encode(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker_16k() -> AudioChunker {
        AudioChunker::new(PcmFormat::pcm16_mono(16000), DEFAULT_CHUNK_SECONDS).unwrap()
    }

    #[test]
    fn test_chunk_bytes_formula() {
        assert_eq!(chunker_16k().chunk_bytes(), 16000);

        let stereo = PcmFormat {
            sample_rate: 44100,
            channels: 2,
            sample_width: 2,
        };
        let chunker = AudioChunker::new(stereo, 0.5).unwrap();
        // floor(44100 * 0.5) = 22050 frames * 4 bytes
        assert_eq!(chunker.chunk_bytes(), 88200);

        let odd = PcmFormat::pcm16_mono(22051);
        let chunker = AudioChunker::new(odd, 0.5).unwrap();
        assert_eq!(chunker.chunk_bytes(), 11025 * 2);
    }

    #[test]
    fn test_concatenated_chunks_reproduce_input() {
        let chunker = chunker_16k();
        for len in [0usize, 1, 15999, 16000, 16001, 48000, 50001] {
            let pcm: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let chunks: Vec<&[u8]> = chunker.chunks(&pcm).collect();

            assert_eq!(chunks.len(), chunker.chunk_count(&pcm));
            assert_eq!(chunks.len(), len.div_ceil(16000));
            assert!(chunks.iter().all(|c| !c.is_empty()));

            let rebuilt: Vec<u8> = chunks
                .iter()
                .flat_map(|c| BASE64_STANDARD.decode(encode_chunk(c)).unwrap())
                .collect();
            assert_eq!(rebuilt, pcm);
        }
    }

    #[test]
    fn test_short_input_yields_single_chunk() {
        let pcm = vec![7u8; 100];
        let chunks: Vec<&[u8]> = chunker_16k().chunks(&pcm).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], &pcm[..]);
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert_eq!(chunker_16k().chunks(&[]).count(), 0);
    }

    #[test]
    fn test_chunks_are_restartable() {
        let chunker = chunker_16k();
        let pcm = vec![1u8; 40000];
        let first: Vec<usize> = chunker.chunks(&pcm).map(<[u8]>::len).collect();
        let second: Vec<usize> = chunker.chunks(&pcm).map(<[u8]>::len).collect();
        assert_eq!(first, vec![16000, 16000, 8000]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_chunk_configuration() {
        assert!(AudioChunker::new(PcmFormat::pcm16_mono(16000), 0.0).is_err());
        assert!(AudioChunker::new(PcmFormat::pcm16_mono(16000), f64::NAN).is_err());
        // 1Hz for half a second floors to zero frames
        assert!(AudioChunker::new(PcmFormat::pcm16_mono(1), 0.5).is_err());
    }

    #[test]
    fn test_oversized_chunk_duration_is_rejected() {
        for seconds in [1e300, f64::MAX, 1e18] {
            assert!(matches!(
                AudioChunker::new(PcmFormat::pcm16_mono(16000), seconds),
                Err(SessionError::InvalidConfiguration(_))
            ));
        }
    }
}
