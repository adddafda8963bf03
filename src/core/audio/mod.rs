//! Audio source handling: WAV loading and fixed-duration PCM chunking.
//!
//! Chunks are base64 encoded for the `voice` command's `audio` field.

mod chunker;
mod wav;

pub use chunker::{AudioChunker, DEFAULT_CHUNK_SECONDS, PcmFormat, encode_chunk};
pub use wav::{PcmAudio, read_wav, read_wav_file};
