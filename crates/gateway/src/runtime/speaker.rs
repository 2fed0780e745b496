//! The audio output stage: narration in, sound out.
//!
//! Routes by priority: critical narrations pre-empt everything (abort
//! in-flight playback, shed the backlog, play the alert tone, then the
//! narration) and activate an alert; normal narrations queue; low
//! narrations queue unless the backlog is full. Synthesis, playback, and
//! remote publishing each degrade independently, so a missing API key or
//! device never stalls the loop.

use std::sync::Arc;

use echo_audio::{player, Player};
use echo_bus::Bus;
use echo_domain::{BlockReason, Narration, Priority};
use echo_providers::{RemotePublisher, TtsClient};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::alerts::AlertManager;

/// Composite health of the speech output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerState {
    /// TTS and the output device are both usable.
    Active,
    /// Exactly one of TTS / device is usable.
    Degraded,
    /// Neither is usable.
    Disabled,
}

pub struct SpeakerEngine {
    tts: Arc<TtsClient>,
    player: Arc<Player>,
    remote: Option<Arc<RemotePublisher>>,
    alerts: Arc<AlertManager>,
}

impl SpeakerEngine {
    pub fn new(
        tts: Arc<TtsClient>,
        player: Arc<Player>,
        remote: Option<Arc<RemotePublisher>>,
        alerts: Arc<AlertManager>,
    ) -> Arc<Self> {
        let engine = Arc::new(Self {
            tts,
            player,
            remote,
            alerts,
        });
        engine.register_repeat_callback();
        engine
    }

    /// Wire the alert manager's repeat callback back into this engine.
    /// The manager holds only a closure over a weak handle, so ownership
    /// stays one-way: engine → manager.
    fn register_repeat_callback(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.alerts.set_repeat_callback(Arc::new(move |reason, text| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(engine) = weak.upgrade() {
                    engine.handle_repeat(reason, text).await;
                }
            })
        }));
    }

    pub fn state(&self) -> SpeakerState {
        match (self.tts.is_available(), self.player.available()) {
            (true, true) => SpeakerState::Active,
            (false, false) => SpeakerState::Disabled,
            _ => SpeakerState::Degraded,
        }
    }

    /// Spawn the narration consume loop.
    pub fn start(
        self: &Arc<Self>,
        narration_bus: &Bus<Narration>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut sub = narration_bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    narration = sub.recv() => {
                        let Some(narration) = narration else { break };
                        engine.handle_narration(narration).await;
                    }
                }
            }
            tracing::debug!("speaker engine stopped");
        })
    }

    async fn handle_narration(&self, narration: Narration) {
        match narration.priority {
            Priority::Critical => self.handle_critical(narration).await,
            Priority::Normal => self.queue_narration(&narration, player::PRIO_NORMAL).await,
            Priority::Low => {
                if self.player.backlog_full() {
                    tracing::warn!(
                        depth = self.player.depth(),
                        "backlog full, dropping low narration"
                    );
                    return;
                }
                self.queue_narration(&narration, player::PRIO_LOW).await;
            }
        }
    }

    async fn handle_critical(&self, narration: Narration) {
        self.player.interrupt();
        self.player.play_alert(narration.block_reason).await;
        if let Some(pcm) = self.tts.synthesize(&narration.text).await {
            self.player.play_immediate(&pcm).await;
            self.publish(&pcm).await;
        }
        self.player.resume();
        self.alerts
            .activate(
                &narration.session_id,
                narration.block_reason,
                narration.text,
                narration.options,
            )
            .await;
    }

    async fn queue_narration(&self, narration: &Narration, prio: u8) {
        let Some(pcm) = self.tts.synthesize(&narration.text).await else {
            return;
        };
        self.player.enqueue(&pcm, prio);
        self.publish(&pcm).await;
    }

    /// Re-play an unresolved alert: tone plus narration, pre-empting
    /// whatever is queued, without re-activating the alert.
    async fn handle_repeat(&self, reason: Option<BlockReason>, text: String) {
        tracing::debug!(?reason, "repeating alert");
        self.player.interrupt();
        self.player.play_alert(reason).await;
        if let Some(pcm) = self.tts.synthesize(&text).await {
            self.player.play_immediate(&pcm).await;
            self.publish(&pcm).await;
        }
        self.player.resume();
    }

    /// Speak a short phrase immediately and wait for it to finish. Used by
    /// the voice loop so confirmations precede keystroke dispatch.
    pub async fn say_now(&self, text: &str) {
        if let Some(pcm) = self.tts.synthesize(text).await {
            self.player.play_immediate(&pcm).await;
            self.publish(&pcm).await;
        }
    }

    async fn publish(&self, pcm: &[u8]) {
        if let Some(remote) = &self.remote {
            remote.publish(pcm).await;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use echo_domain::config::{AlertConfig, TtsConfig};
    use echo_domain::{EventKind, NarrationMethod, RawEvent};

    fn narration(priority: Priority) -> Narration {
        let event = RawEvent::agent_blocked(
            "s1",
            Some(BlockReason::PermissionPrompt),
            Some("Allow edit of auth.ts?".into()),
            Some(vec!["Allow".into(), "Deny".into()]),
        );
        let mut n = Narration::from_event(&event, "text", priority, NarrationMethod::Template);
        if priority != Priority::Critical {
            n.source_kind = EventKind::ToolExecuted;
            n.block_reason = None;
            n.options = None;
        }
        n
    }

    fn engine() -> (Arc<SpeakerEngine>, Arc<Player>, Arc<AlertManager>) {
        // No API key: TTS permanently disabled; no device: playback no-op.
        let tts = Arc::new(TtsClient::from_config(&TtsConfig::default()).unwrap());
        let player = Arc::new(Player::without_device(16_000, 3));
        let alerts = AlertManager::new(&AlertConfig {
            repeat_interval_sec: 0,
            max_repeats: 5,
        });
        let engine = SpeakerEngine::new(tts, Arc::clone(&player), None, Arc::clone(&alerts));
        (engine, player, alerts)
    }

    #[tokio::test]
    async fn fully_degraded_engine_reports_disabled() {
        let (engine, _, _) = engine();
        assert_eq!(engine.state(), SpeakerState::Disabled);
    }

    #[tokio::test]
    async fn critical_narration_activates_the_alert_even_without_audio() {
        let (engine, player, alerts) = engine();
        engine.handle_narration(narration(Priority::Critical)).await;
        assert!(alerts.has_active_alert("s1"));
        let info = &alerts.active_alerts()[0];
        assert_eq!(info.block_reason, Some(BlockReason::PermissionPrompt));
        assert_eq!(info.options.as_ref().map(Vec::len), Some(2));
        // The hold taken for the critical sequence was released.
        assert!(!player.interrupted());
        alerts.shutdown().await;
    }

    #[tokio::test]
    async fn critical_narration_sheds_queued_normal_work() {
        let (engine, player, alerts) = engine();
        // Queue some narration directly (the TTS-less engine can't).
        player.enqueue(&[0u8; 64], player::PRIO_NORMAL);
        player.enqueue(&[0u8; 64], player::PRIO_LOW);
        assert_eq!(player.depth(), 2);

        engine.handle_narration(narration(Priority::Critical)).await;
        assert_eq!(player.depth(), 0, "non-critical backlog must be shed");
        alerts.shutdown().await;
    }

    #[tokio::test]
    async fn degraded_loop_consumes_without_side_effects() {
        let (engine, player, alerts) = engine();
        let bus: Bus<Narration> = Bus::new("narration");
        let cancel = CancellationToken::new();
        let handle = engine.start(&bus, cancel.clone());

        bus.emit(narration(Priority::Normal));
        bus.emit(narration(Priority::Low));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // No synthesis happened, so nothing was queued and nothing failed.
        assert_eq!(player.depth(), 0);
        assert_eq!(alerts.active_count(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
