//! Audio I/O for Echo: alert-tone synthesis, the priority-scheduled output
//! player, and VAD-gated microphone capture.
//!
//! Device handling degrades in place: a machine with no output device gets
//! a player whose playback methods are no-ops, and a machine with no input
//! device gets a microphone whose captures return `None`. Nothing here
//! errors out of the pipeline.

pub mod mic;
pub mod player;
pub mod tones;

pub use mic::{CaptureConfig, Microphone};
pub use player::Player;
pub use tones::ToneSet;

/// Convert normalized f32 samples to PCM16 little-endian bytes.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode PCM16 little-endian bytes into i16 samples.
pub fn pcm16_to_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}
