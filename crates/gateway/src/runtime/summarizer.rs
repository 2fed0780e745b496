//! The summarization stage: raw events in, narrations out.
//!
//! Routes by kind: tool events feed the batcher, blocked events render
//! immediately at critical priority, free-text messages go through the
//! LLM (with truncation fallback), stop/session events use templates.
//! The batcher is always flushed before a non-tool event so narration
//! order matches arrival order.

use std::sync::Arc;

use echo_bus::Bus;
use echo_domain::{EventKind, Narration, NarrationMethod, Priority, RawEvent};
use echo_providers::LlmClient;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::batcher::EventBatcher;
use super::templates;

pub struct Summarizer;

impl Summarizer {
    /// Spawn the consume loop. Cancelling the token flushes the batcher,
    /// drops the subscription, and exits.
    pub fn start(
        raw_bus: &Bus<RawEvent>,
        narration_bus: Arc<Bus<Narration>>,
        llm: Arc<LlmClient>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut sub = raw_bus.subscribe();
        tokio::spawn(async move {
            let mut batcher = EventBatcher::new();
            loop {
                let deadline = batcher.deadline();
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Some(n) = batcher.flush() {
                            narration_bus.emit(n);
                        }
                        break;
                    }
                    _ = sleep_until_or_never(deadline) => {
                        if let Some(n) = batcher.flush() {
                            narration_bus.emit(n);
                        }
                    }
                    event = sub.recv() => {
                        let Some(event) = event else { break };
                        handle_event(event, &mut batcher, &llm, &narration_bus).await;
                    }
                }
            }
            tracing::debug!("summarizer stopped");
        })
    }
}

async fn sleep_until_or_never(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

async fn handle_event(
    event: RawEvent,
    batcher: &mut EventBatcher,
    llm: &LlmClient,
    narration_bus: &Bus<Narration>,
) {
    match event.kind {
        EventKind::ToolExecuted => {
            if event.tool_name.as_deref().unwrap_or_default().is_empty() {
                tracing::warn!(event_id = %event.id, "tool event without tool name, skipping");
                return;
            }
            if let Some(n) = batcher.push(event) {
                narration_bus.emit(n);
            }
        }
        EventKind::AgentBlocked => {
            // Never delayed behind the batch window.
            flush_into(batcher, narration_bus);
            let text = templates::render_blocked(&event);
            narration_bus.emit(Narration::from_event(
                &event,
                text,
                Priority::Critical,
                NarrationMethod::Template,
            ));
        }
        EventKind::AgentMessage => {
            flush_into(batcher, narration_bus);
            let Some(message) = event.text.as_deref().filter(|t| !t.trim().is_empty()) else {
                tracing::warn!(event_id = %event.id, "message event without text, skipping");
                return;
            };
            let (text, method) = llm.summarize(message).await;
            narration_bus.emit(Narration::from_event(
                &event,
                text,
                Priority::Normal,
                method,
            ));
        }
        EventKind::AgentStopped => {
            flush_into(batcher, narration_bus);
            let text = templates::render_stopped(&event);
            narration_bus.emit(Narration::from_event(
                &event,
                text,
                Priority::Normal,
                NarrationMethod::Template,
            ));
        }
        EventKind::SessionStart => {
            flush_into(batcher, narration_bus);
            narration_bus.emit(Narration::from_event(
                &event,
                templates::render_session_start(),
                Priority::Low,
                NarrationMethod::Template,
            ));
        }
        EventKind::SessionEnd => {
            flush_into(batcher, narration_bus);
            narration_bus.emit(Narration::from_event(
                &event,
                templates::render_session_end(),
                Priority::Low,
                NarrationMethod::Template,
            ));
        }
    }
}

fn flush_into(batcher: &mut EventBatcher, narration_bus: &Bus<Narration>) {
    if let Some(n) = batcher.flush() {
        narration_bus.emit(n);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use echo_domain::config::LlmConfig;
    use echo_domain::event::JsonMap;
    use echo_domain::BlockReason;
    use std::time::Duration;

    struct Fixture {
        raw_bus: Arc<Bus<RawEvent>>,
        narrations: echo_bus::Subscription<Narration>,
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    }

    fn start() -> Fixture {
        let raw_bus = Arc::new(Bus::new("raw"));
        let narration_bus = Arc::new(Bus::new("narration"));
        let narrations = narration_bus.subscribe();
        // Unprobed client: summarize() always takes the truncation path,
        // so tests never touch the network.
        let llm = Arc::new(LlmClient::from_config(&LlmConfig::default()).unwrap());
        let cancel = CancellationToken::new();
        let handle = Summarizer::start(&raw_bus, narration_bus, llm, cancel.clone());
        Fixture {
            raw_bus,
            narrations,
            cancel,
            handle,
        }
    }

    fn bash(command: &str) -> RawEvent {
        let mut input = JsonMap::new();
        input.insert("command".into(), serde_json::json!(command));
        RawEvent::tool_executed("s1", "Bash", Some(input), None)
    }

    fn edit(path: &str) -> RawEvent {
        let mut input = JsonMap::new();
        input.insert("file_path".into(), serde_json::json!(path));
        RawEvent::tool_executed("s1", "Edit", Some(input), None)
    }

    async fn recv(fixture: &mut Fixture) -> Narration {
        tokio::time::timeout(Duration::from_secs(2), fixture.narrations.recv())
            .await
            .expect("timed out waiting for narration")
            .expect("narration bus closed")
    }

    #[tokio::test(start_paused = true)]
    async fn tool_event_narrates_within_the_window() {
        let mut f = start();
        f.raw_bus.emit(bash("npm test"));
        tokio::time::sleep(Duration::from_millis(600)).await;

        let n = recv(&mut f).await;
        assert_eq!(n.text, "Ran command: npm test");
        assert_eq!(n.priority, Priority::Normal);
        assert_eq!(n.method, NarrationMethod::Template);

        f.cancel.cancel();
        f.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_edits_batch_into_one_narration() {
        let mut f = start();
        f.raw_bus.emit(edit("/a.ts"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        f.raw_bus.emit(edit("/b.ts"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        f.raw_bus.emit(edit("/c.ts"));
        tokio::time::sleep(Duration::from_millis(600)).await;

        let n = recv(&mut f).await;
        assert_eq!(n.text, "Edited 3 files.");
        assert!(f.narrations.try_recv().is_none(), "expected a single batch");

        f.cancel.cancel();
        f.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn event_after_window_starts_a_new_batch() {
        let mut f = start();
        f.raw_bus.emit(edit("/a.ts"));
        tokio::time::sleep(Duration::from_millis(600)).await;
        f.raw_bus.emit(edit("/b.ts"));
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(recv(&mut f).await.text, "Edited a.ts");
        assert_eq!(recv(&mut f).await.text, "Edited b.ts");

        f.cancel.cancel();
        f.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_event_flushes_batch_then_renders_critical() {
        let mut f = start();
        f.raw_bus.emit(edit("/a.ts"));
        f.raw_bus.emit(RawEvent::agent_blocked(
            "s1",
            Some(BlockReason::PermissionPrompt),
            Some("Allow edit of auth.ts?".into()),
            Some(vec!["Allow".into(), "Deny".into()]),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The pending tool batch is flushed first, preserving order.
        assert_eq!(recv(&mut f).await.text, "Edited a.ts");
        let n = recv(&mut f).await;
        assert_eq!(n.priority, Priority::Critical);
        assert_eq!(n.block_reason, Some(BlockReason::PermissionPrompt));
        assert_eq!(n.options.as_ref().map(Vec::len), Some(2));
        assert!(n.text.starts_with("The agent needs your permission"));

        f.cancel.cancel();
        f.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn message_without_llm_uses_truncation() {
        let mut f = start();
        let long = "word ".repeat(60);
        f.raw_bus
            .emit(RawEvent::agent_message("s1", long, echo_domain::EventSource::Hook));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let n = recv(&mut f).await;
        assert_eq!(n.method, NarrationMethod::Truncation);
        assert!(n.text.ends_with('…'));

        f.cancel.cancel();
        f.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn session_events_are_low_priority() {
        let mut f = start();
        f.raw_bus.emit(RawEvent::session_start("s1"));
        f.raw_bus.emit(RawEvent::session_end("s1"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let n = recv(&mut f).await;
        assert_eq!(n.text, "New coding session started.");
        assert_eq!(n.priority, Priority::Low);
        let n = recv(&mut f).await;
        assert_eq!(n.text, "Session ended.");
        assert_eq!(n.priority, Priority::Low);

        f.cancel.cancel();
        f.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_flushes_the_open_batch() {
        let mut f = start();
        f.raw_bus.emit(edit("/a.ts"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        f.cancel.cancel();
        f.handle.await.unwrap();
        let n = f.narrations.try_recv().expect("final flush must run");
        assert_eq!(n.text, "Edited a.ts");
    }
}
