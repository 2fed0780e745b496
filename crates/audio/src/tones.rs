//! Programmatic alert tones.
//!
//! Each block reason gets a short melody rendered once at startup and
//! cached as int16 PCM at the output sample rate. Segments are
//! `(frequency_hz, seconds)` pairs; frequency `0` is silence. Non-silent
//! segments get a 5 ms linear fade-in and fade-out to prevent clicks.

use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::Arc;

use echo_domain::BlockReason;

const FADE_SECS: f32 = 0.005;

type Segments = &'static [(f32, f32)];

const PERMISSION_PROMPT: Segments = &[
    (880.0, 0.12),
    (0.0, 0.04),
    (1320.0, 0.12),
    (0.0, 0.04),
    (880.0, 0.12),
    (0.0, 0.04),
    (1320.0, 0.12),
];
const QUESTION: Segments = &[(660.0, 0.15), (0.0, 0.05), (880.0, 0.15)];
const IDLE_PROMPT: Segments = &[(440.0, 0.20), (0.0, 0.05), (550.0, 0.15)];
const DEFAULT: Segments = &[(880.0, 0.15), (0.0, 0.05), (1320.0, 0.15)];

/// The four pre-rendered tones, keyed by block reason (`None` = default).
pub struct ToneSet {
    tones: HashMap<Option<BlockReason>, Arc<Vec<i16>>>,
    sample_rate: u32,
}

impl ToneSet {
    pub fn generate(sample_rate: u32) -> Self {
        let mut tones = HashMap::new();
        tones.insert(
            Some(BlockReason::PermissionPrompt),
            Arc::new(render(PERMISSION_PROMPT, sample_rate)),
        );
        tones.insert(
            Some(BlockReason::Question),
            Arc::new(render(QUESTION, sample_rate)),
        );
        tones.insert(
            Some(BlockReason::IdlePrompt),
            Arc::new(render(IDLE_PROMPT, sample_rate)),
        );
        tones.insert(None, Arc::new(render(DEFAULT, sample_rate)));
        Self { tones, sample_rate }
    }

    pub fn get(&self, reason: Option<BlockReason>) -> Arc<Vec<i16>> {
        self.tones
            .get(&reason)
            .or_else(|| self.tones.get(&None))
            .cloned()
            .unwrap_or_default()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn render(segments: Segments, sample_rate: u32) -> Vec<i16> {
    let mut out = Vec::new();
    for &(freq, secs) in segments {
        let len = (secs * sample_rate as f32).round() as usize;
        if freq == 0.0 {
            out.extend(std::iter::repeat(0i16).take(len));
            continue;
        }
        let fade = ((FADE_SECS * sample_rate as f32) as usize).min(len / 2);
        for i in 0..len {
            let t = i as f32 / sample_rate as f32;
            let mut sample = (TAU * freq * t).sin();
            if i < fade {
                sample *= i as f32 / fade as f32;
            }
            if i >= len - fade {
                sample *= (len - i) as f32 / fade as f32;
            }
            out.push((sample * 32767.0) as i16);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;

    #[test]
    fn generation_is_deterministic() {
        let a = ToneSet::generate(RATE);
        let b = ToneSet::generate(RATE);
        for reason in [
            Some(BlockReason::PermissionPrompt),
            Some(BlockReason::Question),
            Some(BlockReason::IdlePrompt),
            None,
        ] {
            assert_eq!(*a.get(reason), *b.get(reason));
        }
    }

    #[test]
    fn tone_lengths_match_segment_tables() {
        let set = ToneSet::generate(RATE);
        let expect = |segments: Segments| -> usize {
            segments
                .iter()
                .map(|&(_, s)| (s * RATE as f32).round() as usize)
                .sum()
        };
        assert_eq!(set.get(Some(BlockReason::Question)).len(), expect(QUESTION));
        assert_eq!(
            set.get(Some(BlockReason::PermissionPrompt)).len(),
            expect(PERMISSION_PROMPT)
        );
        assert_eq!(set.get(None).len(), expect(DEFAULT));
    }

    #[test]
    fn silence_segments_are_zero() {
        let set = ToneSet::generate(RATE);
        let tone = set.get(Some(BlockReason::Question));
        // 0.15 s tone, then 0.05 s silence.
        let silence_start = (0.15 * RATE as f32) as usize;
        let silence_end = silence_start + (0.05 * RATE as f32) as usize;
        assert!(tone[silence_start..silence_end].iter().all(|&s| s == 0));
    }

    #[test]
    fn fades_ramp_from_and_to_near_zero() {
        let set = ToneSet::generate(RATE);
        let tone = set.get(None);
        assert_eq!(tone[0], 0);
        // Samples inside the fade window are strictly quieter than the peak.
        let peak = tone.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(tone[1].unsigned_abs() < peak);
        assert!(peak <= 32_767);
    }
}
