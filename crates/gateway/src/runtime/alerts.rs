//! Active-alert tracking with per-session repeat timers.
//!
//! The speaker engine activates an alert after a critical narration has
//! played; the manager then re-fires a registered callback every repeat
//! interval until the alert resolves or the repeat cap is hit. Any
//! non-blocking event for the session resolves its alert. The callback
//! indirection keeps this module free of any speaker type, so it tests
//! with a plain closure.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use echo_bus::Bus;
use echo_domain::config::AlertConfig;
use echo_domain::{BlockReason, RawEvent};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Callback invoked on each repeat: `(block_reason, narration_text)`.
pub type RepeatCallback = Arc<dyn Fn(Option<BlockReason>, String) -> BoxFuture + Send + Sync>;

/// Snapshot of one alert, for introspection.
#[derive(Debug, Clone)]
pub struct AlertInfo {
    pub session_id: String,
    pub block_reason: Option<BlockReason>,
    pub narration_text: String,
    pub options: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub repeat_count: u32,
}

struct AlertEntry {
    block_reason: Option<BlockReason>,
    narration_text: String,
    options: Option<Vec<String>>,
    created_at: DateTime<Utc>,
    repeat_count: Arc<AtomicU32>,
    cancel: CancellationToken,
    timer: Option<JoinHandle<()>>,
}

pub struct AlertManager {
    alerts: Mutex<HashMap<String, AlertEntry>>,
    callback: RwLock<Option<RepeatCallback>>,
    repeat_interval: Duration,
    max_repeats: u32,
}

impl AlertManager {
    pub fn new(cfg: &AlertConfig) -> Arc<Self> {
        Arc::new(Self {
            alerts: Mutex::new(HashMap::new()),
            callback: RwLock::new(None),
            repeat_interval: cfg.repeat_interval(),
            max_repeats: cfg.max_repeats,
        })
    }

    /// Register the repeat callback. The speaker engine does this once at
    /// startup; re-registering replaces the previous callback.
    pub fn set_repeat_callback(&self, cb: RepeatCallback) {
        *self.callback.write() = Some(cb);
    }

    /// Activate (or replace) the alert for a session and start its repeat
    /// timer. The previous alert's timer, if any, is cancelled and awaited.
    pub async fn activate(
        self: &Arc<Self>,
        session_id: &str,
        block_reason: Option<BlockReason>,
        narration_text: String,
        options: Option<Vec<String>>,
    ) {
        self.clear(session_id).await;

        let repeat_count = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let timer = if self.repeat_interval.is_zero() {
            None
        } else {
            Some(self.spawn_timer(
                block_reason,
                narration_text.clone(),
                Arc::clone(&repeat_count),
                cancel.clone(),
            ))
        };

        let entry = AlertEntry {
            block_reason,
            narration_text,
            options,
            created_at: Utc::now(),
            repeat_count,
            cancel,
            timer,
        };
        self.alerts.lock().insert(session_id.to_string(), entry);
        tracing::info!(session_id, ?block_reason, "alert active");
    }

    /// Resolve the session's alert, cancelling and awaiting its timer.
    /// Returns `true` if an alert was active.
    pub async fn clear(&self, session_id: &str) -> bool {
        let entry = self.alerts.lock().remove(session_id);
        let Some(mut entry) = entry else { return false };
        entry.cancel.cancel();
        if let Some(timer) = entry.timer.take() {
            if let Err(e) = timer.await {
                tracing::warn!(error = %e, "alert timer task failed");
            }
        }
        tracing::info!(session_id, "alert resolved");
        true
    }

    pub fn has_active_alert(&self, session_id: &str) -> bool {
        self.alerts.lock().contains_key(session_id)
    }

    pub fn active_count(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn active_alerts(&self) -> Vec<AlertInfo> {
        self.alerts
            .lock()
            .iter()
            .map(|(session_id, e)| AlertInfo {
                session_id: session_id.clone(),
                block_reason: e.block_reason,
                narration_text: e.narration_text.clone(),
                options: e.options.clone(),
                created_at: e.created_at,
                repeat_count: e.repeat_count.load(Ordering::Acquire),
            })
            .collect()
    }

    /// Consume loop: any non-blocking event resolves its session's alert.
    /// Blocked events are not handled here; activation flows through the
    /// speaker engine after the critical narration has played.
    pub fn start(
        self: &Arc<Self>,
        raw_bus: &Bus<RawEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut sub = raw_bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = sub.recv() => {
                        let Some(event) = event else { break };
                        if !event.kind.is_blocking()
                            && manager.has_active_alert(&event.session_id)
                        {
                            manager.clear(&event.session_id).await;
                        }
                    }
                }
            }
            tracing::debug!("alert manager stopped");
        })
    }

    /// Cancel and await every live timer.
    pub async fn shutdown(&self) {
        let sessions: Vec<String> = self.alerts.lock().keys().cloned().collect();
        for session_id in sessions {
            self.clear(&session_id).await;
        }
    }

    fn spawn_timer(
        self: &Arc<Self>,
        block_reason: Option<BlockReason>,
        text: String,
        repeat_count: Arc<AtomicU32>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(manager.repeat_interval) => {}
                }
                let cb = manager.callback.read().clone();
                match cb {
                    Some(cb) => cb(block_reason, text.clone()).await,
                    None => tracing::warn!("alert repeat fired with no callback registered"),
                }
                let fired = repeat_count.fetch_add(1, Ordering::AcqRel) + 1;
                if fired >= manager.max_repeats {
                    tracing::debug!(fired, "alert repeat cap reached");
                    break;
                }
            }
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(interval_sec: u64, max: u32) -> Arc<AlertManager> {
        AlertManager::new(&AlertConfig {
            repeat_interval_sec: interval_sec,
            max_repeats: max,
        })
    }

    fn counting_callback() -> (RepeatCallback, Arc<AtomicU32>) {
        let fired = Arc::new(AtomicU32::new(0));
        let fired2 = Arc::clone(&fired);
        let cb: RepeatCallback = Arc::new(move |_, _| {
            let fired = Arc::clone(&fired2);
            Box::pin(async move {
                fired.fetch_add(1, Ordering::AcqRel);
            })
        });
        (cb, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_one_alert_per_session() {
        let mgr = manager(30, 5);
        mgr.activate("s1", Some(BlockReason::Question), "first".into(), None)
            .await;
        mgr.activate("s1", Some(BlockReason::IdlePrompt), "second".into(), None)
            .await;
        assert_eq!(mgr.active_count(), 1);
        let info = &mgr.active_alerts()[0];
        assert_eq!(info.narration_text, "second");
        mgr.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_fires_on_the_interval() {
        let mgr = manager(30, 5);
        let (cb, fired) = counting_callback();
        mgr.set_repeat_callback(cb);

        mgr.activate("s1", None, "text".into(), None).await;
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fired.load(Ordering::Acquire), 1);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::Acquire), 2);

        mgr.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeats_stop_at_the_cap() {
        let mgr = manager(30, 2);
        let (cb, fired) = counting_callback();
        mgr.set_repeat_callback(cb);

        mgr.activate("s1", None, "text".into(), None).await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fired.load(Ordering::Acquire), 2);
        // The alert itself stays active until resolved.
        assert!(mgr.has_active_alert("s1"));

        mgr.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_disables_the_timer() {
        let mgr = manager(0, 5);
        let (cb, fired) = counting_callback();
        mgr.set_repeat_callback(cb);

        mgr.activate("s1", None, "text".into(), None).await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fired.load(Ordering::Acquire), 0);
        assert!(mgr.has_active_alert("s1"));

        mgr.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn non_blocking_event_resolves_the_alert() {
        let mgr = manager(30, 5);
        let (cb, fired) = counting_callback();
        mgr.set_repeat_callback(cb);

        let raw_bus: Bus<RawEvent> = Bus::new("raw");
        let cancel = CancellationToken::new();
        let handle = mgr.start(&raw_bus, cancel.clone());

        mgr.activate("s1", Some(BlockReason::PermissionPrompt), "text".into(), None)
            .await;
        assert!(mgr.has_active_alert("s1"));

        raw_bus.emit(RawEvent::tool_executed("s1", "Write", None, None));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!mgr.has_active_alert("s1"));

        // The pending repeat was cancelled with the alert.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::Acquire), 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_events_do_not_resolve_alerts() {
        let mgr = manager(0, 5);
        let raw_bus: Bus<RawEvent> = Bus::new("raw");
        let cancel = CancellationToken::new();
        let handle = mgr.start(&raw_bus, cancel.clone());

        mgr.activate("s1", Some(BlockReason::Question), "text".into(), None)
            .await;
        raw_bus.emit(RawEvent::agent_blocked("s1", Some(BlockReason::Question), None, None));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(mgr.has_active_alert("s1"));

        cancel.cancel();
        handle.await.unwrap();
        mgr.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn alerts_are_independent_per_session() {
        let mgr = manager(0, 5);
        mgr.activate("s1", None, "one".into(), None).await;
        mgr.activate("s2", None, "two".into(), None).await;
        assert_eq!(mgr.active_count(), 2);

        assert!(mgr.clear("s1").await);
        assert!(!mgr.has_active_alert("s1"));
        assert!(mgr.has_active_alert("s2"));
        mgr.shutdown().await;
        assert_eq!(mgr.active_count(), 0);
    }
}
