//! Audio Test Fixtures
//!
//! Generated audio keeps inputs reproducible and avoids checked-in binaries.
//!
//! Audio formats:
//! - Sample rate: 16kHz (16000 Hz)
//! - Bit depth: 16-bit signed PCM
//! - Channels: Mono

use std::f32::consts::PI;
use std::path::{Path, PathBuf};

use avatar_session::{PcmAudio, PcmFormat};
use hound::{SampleFormat, WavSpec, WavWriter};

/// Standard sample rate for the avatar engine (16kHz)
pub const SAMPLE_RATE: u32 = 16000;

/// Duration constants (in samples at 16kHz)
pub const MS_500: usize = 8000;
pub const SECOND: usize = 16000;

/// Generate silence (zeros)
pub fn generate_silence(duration_samples: usize) -> Vec<i16> {
    vec![0i16; duration_samples]
}

/// Generate a sine wave tone
pub fn generate_sine_wave(duration_samples: usize, frequency: f32, amplitude: f32) -> Vec<i16> {
    let max_amplitude = amplitude * i16::MAX as f32;
    let angular_freq = 2.0 * PI * frequency / SAMPLE_RATE as f32;

    (0..duration_samples)
        .map(|i| ((angular_freq * i as f32).sin() * max_amplitude) as i16)
        .collect()
}

/// Convert samples to little-endian PCM16 bytes
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// 16kHz mono PCM16 audio from samples
pub fn pcm16_audio(samples: &[i16]) -> PcmAudio {
    PcmAudio::new(PcmFormat::pcm16_mono(SAMPLE_RATE), samples_to_bytes(samples))
}

/// Write samples as a 16kHz mono PCM16 WAV file under `dir`
pub fn write_wav(dir: &Path, name: &str, samples: &[i16]) -> PathBuf {
    let path = dir.join(name);
    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&path, spec).expect("create wav");
    for sample in samples {
        writer.write_sample(*sample).expect("write sample");
    }
    writer.finalize().expect("finalize wav");
    path
}
