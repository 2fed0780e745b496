//! Pipeline orchestrators: the consumer loops and their supporting pieces.

pub mod alerts;
pub mod batcher;
pub mod dispatcher;
pub mod matcher;
pub mod speaker;
pub mod summarizer;
pub mod templates;
pub mod transcript;
pub mod voice;

use std::sync::Arc;
use std::time::Duration;

use echo_providers::{LlmClient, RemotePublisher, SttClient, TtsClient, REPROBE_INTERVAL_SECS};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Probe every provider once at startup, then re-probe unavailable ones
/// on a fixed interval. Permanently disabled clients (no API key) are
/// never re-probed.
pub fn spawn_probe_supervisor(
    tts: Arc<TtsClient>,
    llm: Arc<LlmClient>,
    stt: Arc<SttClient>,
    remote: Option<Arc<RemotePublisher>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let tts_ok = tts.probe().await;
        let llm_ok = llm.probe().await;
        let stt_ok = stt.probe().await;
        tracing::info!(tts = tts_ok, llm = llm_ok, stt = stt_ok, "initial provider probes");
        if let Some(remote) = &remote {
            remote.connect().await;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(REPROBE_INTERVAL_SECS)) => {}
            }
            if !tts.is_disabled() && !tts.is_available() {
                tts.probe().await;
            }
            if !llm.is_available() {
                llm.probe().await;
            }
            if !stt.is_disabled() && !stt.is_available() {
                stt.probe().await;
            }
        }
        tracing::debug!("probe supervisor stopped");
    })
}
