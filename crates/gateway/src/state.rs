//! The root object: owns the buses, the providers, and every orchestrator
//! task, and tears them down in reverse start order.

use std::sync::Arc;

use anyhow::Context;
use echo_audio::{Microphone, Player};
use echo_bus::Bus;
use echo_domain::config::Config;
use echo_domain::{Narration, RawEvent, Response};
use echo_providers::{LlmClient, RemotePublisher, SttClient, TtsClient};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::runtime;
use crate::runtime::alerts::AlertManager;
use crate::runtime::dispatcher::Dispatcher;
use crate::runtime::speaker::SpeakerEngine;
use crate::runtime::summarizer::Summarizer;
use crate::runtime::transcript::{DedupeWindow, TranscriptWatcher};
use crate::runtime::voice::VoiceEngine;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub raw_bus: Arc<Bus<RawEvent>>,
    pub narration_bus: Arc<Bus<Narration>>,
    pub response_bus: Arc<Bus<Response>>,
    pub speaker: Arc<SpeakerEngine>,
    pub alerts: Arc<AlertManager>,
    pub voice: Arc<VoiceEngine>,
    pub tts: Arc<TtsClient>,
    pub llm: Arc<LlmClient>,
    pub stt: Arc<SttClient>,
    pub player: Arc<Player>,
    pub mic: Arc<Microphone>,
    pub remote: Option<Arc<RemotePublisher>>,
    pub dispatcher: Arc<Dispatcher>,
    pub dedupe: Arc<DedupeWindow>,
}

struct OwnedTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

fn owned(name: &'static str, spawn: impl FnOnce(CancellationToken) -> JoinHandle<()>) -> OwnedTask {
    let cancel = CancellationToken::new();
    let handle = spawn(cancel.clone());
    OwnedTask {
        name,
        cancel,
        handle,
    }
}

/// Owns the pipeline. Consumers start before producers; shutdown cancels
/// and awaits everything in the opposite order.
pub struct EchoServer {
    pub state: AppState,
    tasks: Vec<OwnedTask>,
}

impl EchoServer {
    pub fn start(config: Arc<Config>) -> anyhow::Result<Self> {
        // ── Buses ───────────────────────────────────────────────────
        let raw_bus: Arc<Bus<RawEvent>> = Arc::new(Bus::new("raw"));
        let narration_bus: Arc<Bus<Narration>> = Arc::new(Bus::new("narration"));
        let response_bus: Arc<Bus<Response>> = Arc::new(Bus::new("response"));

        // ── Providers ───────────────────────────────────────────────
        let tts = Arc::new(TtsClient::from_config(&config.tts).context("building TTS client")?);
        let llm = Arc::new(LlmClient::from_config(&config.llm).context("building LLM client")?);
        let stt = Arc::new(SttClient::from_config(&config.stt).context("building STT client")?);
        let remote = RemotePublisher::from_config(&config.remote)
            .context("building remote publisher")?
            .map(Arc::new);

        // ── Devices ─────────────────────────────────────────────────
        let player = Arc::new(Player::new(
            config.audio.sample_rate,
            config.audio.backlog_threshold,
        ));
        let mic = Arc::new(Microphone::detect());
        let dispatcher = Arc::new(Dispatcher::detect(config.voice.dispatch_method));

        // ── Orchestrators ───────────────────────────────────────────
        let alerts = AlertManager::new(&config.alerts);
        let speaker = SpeakerEngine::new(
            Arc::clone(&tts),
            Arc::clone(&player),
            remote.clone(),
            Arc::clone(&alerts),
        );
        let voice = VoiceEngine::new(
            Arc::clone(&mic),
            Arc::clone(&stt),
            Arc::clone(&dispatcher),
            Some(Arc::clone(&speaker)),
            Arc::clone(&response_bus),
            config.voice.clone(),
        );
        let dedupe = DedupeWindow::new();

        let state = AppState {
            config: Arc::clone(&config),
            raw_bus: Arc::clone(&raw_bus),
            narration_bus: Arc::clone(&narration_bus),
            response_bus,
            speaker: Arc::clone(&speaker),
            alerts: Arc::clone(&alerts),
            voice: Arc::clone(&voice),
            tts: Arc::clone(&tts),
            llm: Arc::clone(&llm),
            stt: Arc::clone(&stt),
            player: Arc::clone(&player),
            mic,
            remote: remote.clone(),
            dispatcher,
            dedupe: Arc::clone(&dedupe),
        };

        // ── Start tasks, consumers before producers ─────────────────
        let mut tasks = Vec::new();
        tasks.push(owned("player-worker", |c| player.start_worker(c)));
        tasks.push(owned("speaker", |c| speaker.start(&narration_bus, c)));
        tasks.push(owned("alerts", |c| alerts.start(&raw_bus, c)));
        tasks.push(owned("voice", |c| voice.start(&raw_bus, c)));
        tasks.push(owned("summarizer", |c| {
            Summarizer::start(&raw_bus, Arc::clone(&narration_bus), Arc::clone(&llm), c)
        }));
        if let Some(dir) = config.transcripts.dir.clone().filter(|d| d.is_dir()) {
            tasks.push(owned("transcript-watcher", |c| {
                TranscriptWatcher::new(dir, Arc::clone(&raw_bus), Arc::clone(&dedupe)).start(c)
            }));
        }
        tasks.push(owned("probe-supervisor", |c| {
            runtime::spawn_probe_supervisor(
                Arc::clone(&tts),
                Arc::clone(&llm),
                Arc::clone(&stt),
                remote.clone(),
                c,
            )
        }));
        for task in &tasks {
            tracing::info!(task = task.name, "started");
        }

        Ok(Self { state, tasks })
    }

    /// Cancel and await every owned task in reverse start order, then
    /// release the remaining timers and listen tasks.
    pub async fn shutdown(self) {
        for task in self.tasks.into_iter().rev() {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                tracing::warn!(task = task.name, error = %e, "task did not stop cleanly");
            } else {
                tracing::debug!(task = task.name, "stopped");
            }
        }
        self.state.voice.cancel_listen().await;
        self.state.alerts.shutdown().await;
        tracing::info!("pipeline stopped");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
