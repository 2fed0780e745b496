//! VAD-gated microphone capture.
//!
//! Energy-based voice activity detection over 30 ms frames: wait for an
//! onset frame whose RMS clears the threshold, then record until the
//! trailing quiet run reaches the silence duration or the hard cap.
//! The cpal input stream is owned by the blocking capture call (cpal
//! streams are not `Send`), which runs inside `spawn_blocking` and checks
//! the cancellation token every frame.

use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio_util::sync::CancellationToken;

use crate::f32_to_pcm16;

/// Frame stride for VAD decisions.
const FRAME_MS: u32 = 30;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// How long to wait for speech onset before giving up.
    pub listen_timeout: Duration,
    /// RMS level above which a frame counts as speech.
    pub silence_threshold: f32,
    /// Trailing quiet that ends the recording.
    pub silence_duration: Duration,
    /// Hard cap on the recording length.
    pub max_duration: Duration,
    pub sample_rate: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            listen_timeout: Duration::from_secs(10),
            silence_threshold: 0.01,
            silence_duration: Duration::from_millis(1500),
            max_duration: Duration::from_secs(15),
            sample_rate: 16_000,
        }
    }
}

pub struct Microphone {
    available: bool,
}

impl Microphone {
    /// Probe for a default input device once at startup.
    pub fn detect() -> Self {
        let available = cpal::default_host().default_input_device().is_some();
        if !available {
            tracing::warn!("no microphone detected; voice listening disabled");
        }
        Self { available }
    }

    #[doc(hidden)]
    pub fn unavailable() -> Self {
        Self { available: false }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Capture one utterance as PCM16 LE bytes, or `None` on timeout,
    /// cancellation, or device failure.
    pub async fn capture_until_silence(
        &self,
        cfg: CaptureConfig,
        cancel: CancellationToken,
    ) -> Option<Vec<u8>> {
        if !self.available {
            return None;
        }
        tokio::task::spawn_blocking(move || capture_blocking(cfg, cancel))
            .await
            .ok()
            .flatten()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Blocking capture
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn capture_blocking(cfg: CaptureConfig, cancel: CancellationToken) -> Option<Vec<u8>> {
    let host = cpal::default_host();
    let device = host.default_input_device()?;
    let stream_cfg = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(cfg.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let (tx, rx) = std_mpsc::channel::<Vec<f32>>();
    let stream = build_input_stream(&device, &stream_cfg, tx)?;
    if let Err(e) = stream.play() {
        tracing::warn!(error = %e, "failed to start input stream");
        return None;
    }

    let frame_len = (cfg.sample_rate as usize * FRAME_MS as usize) / 1000;
    let frame_dur = Duration::from_millis(FRAME_MS as u64);
    let mut tracker = VadTracker::new(&cfg, frame_len);
    let mut pending: Vec<f32> = Vec::new();
    let started = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return None;
        }
        match rx.recv_timeout(frame_dur) {
            Ok(chunk) => pending.extend(chunk),
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                tracing::warn!("input stream closed mid-capture");
                break;
            }
        }
        while pending.len() >= frame_len {
            let frame: Vec<f32> = pending.drain(..frame_len).collect();
            if tracker.push_frame(&frame) == VadState::Done {
                break;
            }
        }
        match tracker.state() {
            VadState::Done => break,
            VadState::WaitingOnset if started.elapsed() >= cfg.listen_timeout => {
                return None;
            }
            _ => {}
        }
    }
    drop(stream);

    let audio = tracker.take_audio();
    if audio.is_empty() {
        None
    } else {
        Some(f32_to_pcm16(&audio))
    }
}

fn build_input_stream(
    device: &cpal::Device,
    cfg: &cpal::StreamConfig,
    tx: std_mpsc::Sender<Vec<f32>>,
) -> Option<cpal::Stream> {
    let err_fn = |e| tracing::warn!(error = %e, "input stream error");

    let tx_f32 = tx.clone();
    match device.build_input_stream(
        cfg,
        move |data: &[f32], _| {
            let _ = tx_f32.send(data.to_vec());
        },
        err_fn,
        None,
    ) {
        Ok(stream) => return Some(stream),
        Err(e) => tracing::debug!(error = %e, "f32 input stream rejected, trying i16"),
    }

    match device.build_input_stream(
        cfg,
        move |data: &[i16], _| {
            let samples: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
            let _ = tx.send(samples);
        },
        err_fn,
        None,
    ) {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::warn!(error = %e, "could not open input stream");
            None
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// VAD state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VadState {
    WaitingOnset,
    Recording,
    Done,
}

/// Frame-by-frame VAD bookkeeping, separated from device I/O so the
/// phase transitions are testable with synthetic frames.
struct VadTracker {
    threshold: f32,
    quiet_frames_to_stop: u32,
    max_frames: u32,
    state: VadState,
    quiet_run: u32,
    audio: Vec<f32>,
}

impl VadTracker {
    fn new(cfg: &CaptureConfig, frame_len: usize) -> Self {
        let frame_secs = frame_len as f64 / cfg.sample_rate.max(1) as f64;
        let quiet_frames_to_stop =
            (cfg.silence_duration.as_secs_f64() / frame_secs).ceil().max(1.0) as u32;
        let max_frames = (cfg.max_duration.as_secs_f64() / frame_secs).ceil().max(1.0) as u32;
        Self {
            threshold: cfg.silence_threshold,
            quiet_frames_to_stop,
            max_frames,
            state: VadState::WaitingOnset,
            quiet_run: 0,
            audio: Vec::new(),
        }
    }

    fn state(&self) -> VadState {
        self.state
    }

    fn push_frame(&mut self, frame: &[f32]) -> VadState {
        let loud = rms(frame) > self.threshold;
        match self.state {
            VadState::WaitingOnset => {
                if loud {
                    self.state = VadState::Recording;
                    self.audio.extend_from_slice(frame);
                }
            }
            VadState::Recording => {
                self.audio.extend_from_slice(frame);
                if loud {
                    self.quiet_run = 0;
                } else {
                    self.quiet_run += 1;
                    if self.quiet_run >= self.quiet_frames_to_stop {
                        self.state = VadState::Done;
                    }
                }
                let frames_recorded = (self.audio.len() / frame.len().max(1)) as u32;
                if frames_recorded >= self.max_frames {
                    self.state = VadState::Done;
                }
            }
            VadState::Done => {}
        }
        self.state
    }

    fn take_audio(self) -> Vec<f32> {
        self.audio
    }
}

/// Root-mean-square of normalized samples.
fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: usize = 480; // 30 ms at 16 kHz

    fn cfg() -> CaptureConfig {
        CaptureConfig::default()
    }

    fn quiet() -> Vec<f32> {
        vec![0.0; FRAME]
    }

    fn loud() -> Vec<f32> {
        vec![0.5; FRAME]
    }

    #[test]
    fn rms_of_square_wave() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        assert!((rms(&samples) - 0.5).abs() < 1e-5);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn leading_silence_is_not_recorded() {
        let mut tracker = VadTracker::new(&cfg(), FRAME);
        for _ in 0..5 {
            assert_eq!(tracker.push_frame(&quiet()), VadState::WaitingOnset);
        }
        tracker.push_frame(&loud());
        assert_eq!(tracker.state(), VadState::Recording);
        // Only the onset frame is buffered.
        assert_eq!(tracker.take_audio().len(), FRAME);
    }

    #[test]
    fn trailing_silence_ends_the_recording() {
        let mut tracker = VadTracker::new(&cfg(), FRAME);
        tracker.push_frame(&loud());
        // 1.5 s of quiet at 30 ms frames = 50 frames.
        for _ in 0..49 {
            assert_eq!(tracker.push_frame(&quiet()), VadState::Recording);
        }
        assert_eq!(tracker.push_frame(&quiet()), VadState::Done);
    }

    #[test]
    fn speech_resets_the_quiet_run() {
        let mut tracker = VadTracker::new(&cfg(), FRAME);
        tracker.push_frame(&loud());
        for _ in 0..40 {
            tracker.push_frame(&quiet());
        }
        tracker.push_frame(&loud());
        for _ in 0..49 {
            assert_eq!(tracker.push_frame(&quiet()), VadState::Recording);
        }
        assert_eq!(tracker.push_frame(&quiet()), VadState::Done);
    }

    #[test]
    fn hard_cap_stops_a_nonstop_talker() {
        let mut tracker = VadTracker::new(&cfg(), FRAME);
        // 15 s at 30 ms frames = 500 frames.
        let mut frames = 0;
        loop {
            frames += 1;
            if tracker.push_frame(&loud()) == VadState::Done {
                break;
            }
            assert!(frames <= 501, "cap never engaged");
        }
        assert_eq!(frames, 500);
    }

    #[tokio::test]
    async fn unavailable_microphone_returns_none() {
        let mic = Microphone::unavailable();
        let out = mic
            .capture_until_silence(cfg(), CancellationToken::new())
            .await;
        assert!(out.is_none());
    }
}
