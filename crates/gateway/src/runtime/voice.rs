//! The voice-response loop.
//!
//! A blocked event that carries options starts a listen task: capture an
//! utterance (VAD-gated), transcribe it, match it to an option, confirm
//! out loud, then type the answer into the agent's terminal. Listening is
//! single-flight: a newer blocked event wins, and any non-blocked event
//! for the listening session cancels the task. The confirmation narration
//! is awaited before dispatch so the next capture cycle doesn't hear our
//! own voice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use echo_audio::{CaptureConfig, Microphone};
use echo_bus::Bus;
use echo_domain::config::VoiceConfig;
use echo_domain::event::now_secs;
use echo_domain::{BlockReason, EventKind, MatchMethod, RawEvent, Response};
use echo_providers::SttClient;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::dispatcher::Dispatcher;
use super::matcher::match_response;
use super::speaker::SpeakerEngine;

/// Capture sample rate expected by the STT contract.
const CAPTURE_RATE: u32 = 16_000;

const CANT_UNDERSTAND: &str = "I couldn't understand. Please repeat or type your response.";
const LOW_CONFIDENCE: &str = "I didn't catch that clearly. Please repeat.";

struct ListenTask {
    session_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct VoiceEngine {
    mic: Arc<Microphone>,
    stt: Arc<SttClient>,
    dispatcher: Arc<Dispatcher>,
    speaker: Option<Arc<SpeakerEngine>>,
    response_bus: Arc<Bus<Response>>,
    cfg: VoiceConfig,
    listening: Mutex<Option<ListenTask>>,
    listening_flag: Arc<AtomicBool>,
}

impl VoiceEngine {
    pub fn new(
        mic: Arc<Microphone>,
        stt: Arc<SttClient>,
        dispatcher: Arc<Dispatcher>,
        speaker: Option<Arc<SpeakerEngine>>,
        response_bus: Arc<Bus<Response>>,
        cfg: VoiceConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            mic,
            stt,
            dispatcher,
            speaker,
            response_bus,
            cfg,
            listening: Mutex::new(None),
            listening_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn is_listening(&self) -> bool {
        self.listening_flag.load(Ordering::Acquire)
    }

    /// Spawn the raw-event consume loop.
    pub fn start(
        self: &Arc<Self>,
        raw_bus: &Bus<RawEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut sub = raw_bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = sub.recv() => {
                        let Some(event) = event else { break };
                        engine.handle_event(event).await;
                    }
                }
            }
            engine.cancel_listen().await;
            tracing::debug!("voice engine stopped");
        })
    }

    async fn handle_event(self: &Arc<Self>, event: RawEvent) {
        if event.kind == EventKind::AgentBlocked {
            let Some(options) = event.options() else {
                return;
            };
            if !self.mic.is_available() || self.stt.is_disabled() {
                return;
            }
            self.begin_listen(
                event.session_id.clone(),
                options.to_vec(),
                event.block_reason,
            )
            .await;
        } else {
            let listening_here = self
                .listening
                .lock()
                .as_ref()
                .is_some_and(|t| t.session_id == event.session_id);
            if listening_here {
                self.cancel_listen().await;
            }
        }
    }

    /// Start a listen task, cancelling any prior one; the newest blocked
    /// event wins across sessions.
    async fn begin_listen(
        self: &Arc<Self>,
        session_id: String,
        options: Vec<String>,
        block_reason: Option<BlockReason>,
    ) {
        self.cancel_listen().await;

        let engine = Arc::clone(self);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_session = session_id.clone();
        let handle = tokio::spawn(async move {
            engine.listening_flag.store(true, Ordering::Release);
            engine
                .listen_cycle(&task_session, &options, block_reason, task_cancel)
                .await;
            engine.listening_flag.store(false, Ordering::Release);
        });
        *self.listening.lock() = Some(ListenTask {
            session_id,
            cancel,
            handle,
        });
    }

    /// Cancel the active listen task, if any, and wait for it to unwind.
    pub async fn cancel_listen(&self) {
        let task = self.listening.lock().take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                tracing::warn!(error = %e, "listen task failed");
            }
        }
    }

    async fn listen_cycle(
        &self,
        session_id: &str,
        options: &[String],
        block_reason: Option<BlockReason>,
        cancel: CancellationToken,
    ) {
        tracing::info!(session_id, options = options.len(), "listening for a spoken answer");

        let capture_cfg = CaptureConfig {
            listen_timeout: self.cfg.listen_timeout(),
            silence_threshold: self.cfg.silence_threshold,
            silence_duration: self.cfg.silence_duration(),
            max_duration: self.cfg.max_record(),
            sample_rate: CAPTURE_RATE,
        };
        let pcm = self
            .mic
            .capture_until_silence(capture_cfg, cancel.clone())
            .await;
        if cancel.is_cancelled() {
            return;
        }
        // Timeout or capture failure: the alert repeat will re-prompt.
        let Some(pcm) = pcm else {
            tracing::debug!(session_id, "no speech captured");
            return;
        };

        let transcript = self.stt.transcribe(&pcm).await;
        if cancel.is_cancelled() {
            return;
        }
        let Some(transcript) = transcript else {
            self.narrate(CANT_UNDERSTAND).await;
            return;
        };
        tracing::info!(session_id, transcript = %transcript, "transcribed");

        let matched = match_response(&transcript, Some(options), block_reason);
        if matched.confidence < self.cfg.confidence_threshold {
            tracing::info!(
                confidence = matched.confidence,
                "match below confidence threshold"
            );
            self.narrate(LOW_CONFIDENCE).await;
            return;
        }

        self.response_bus.emit(Response {
            text: matched.text.clone(),
            transcript,
            session_id: session_id.to_string(),
            match_method: matched.method,
            confidence: matched.confidence,
            timestamp: now_secs(),
            options: Some(options.to_vec()),
        });

        // Speak the confirmation to completion before touching the
        // keyboard, so the next capture doesn't hear it.
        self.narrate(&format!("Sending: {}", matched.text)).await;
        if !self.dispatcher.dispatch(&matched.text).await {
            self.narrate(&format!(
                "Couldn't send response. Please type: {}",
                matched.text
            ))
            .await;
        }
    }

    /// Manual entry point for the HTTP surface: no capture, no matching.
    /// Returns `true` iff the dispatch succeeded.
    pub async fn handle_manual_response(&self, session_id: &str, text: &str) -> bool {
        self.response_bus.emit(Response {
            text: text.to_string(),
            transcript: text.to_string(),
            session_id: session_id.to_string(),
            match_method: MatchMethod::Verbatim,
            confidence: 1.0,
            timestamp: now_secs(),
            options: None,
        });
        self.narrate(&format!("Sending: {text}")).await;
        let ok = self.dispatcher.dispatch(text).await;
        if !ok {
            self.narrate(&format!("Couldn't send response. Please type: {text}"))
                .await;
        }
        ok
    }

    async fn narrate(&self, text: &str) {
        if let Some(speaker) = &self.speaker {
            speaker.say_now(text).await;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
