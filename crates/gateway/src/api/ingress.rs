//! Hook ingress: normalizes agent hook payloads into raw events.
//!
//! The agent's hook stub POSTs one JSON object per lifecycle callback.
//! Every payload field beyond the event name and session id is optional;
//! malformed or unrecognized payloads are dropped with a warn log but
//! still answered 200 so the hook shell never retries.

use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use echo_domain::event::JsonMap;
use echo_domain::{BlockReason, EventKind, EventSource, RawEvent};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
pub struct HookPayload {
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    // PostToolUse
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<JsonMap>,
    #[serde(default)]
    pub tool_response: Option<JsonMap>,
    // Notification
    #[serde(default, rename = "type")]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    // Stop
    #[serde(default)]
    pub stop_reason: Option<String>,
    // AgentMessage
    #[serde(default)]
    pub text: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /event
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn post_event(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let payload: HookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "malformed hook payload, dropping");
            return Json(json!({ "status": "ignored" }));
        }
    };
    let Some(event) = normalize(payload) else {
        return Json(json!({ "status": "ignored" }));
    };
    if event.kind == EventKind::AgentMessage {
        // Register so the transcript watcher suppresses the same line.
        state
            .dedupe
            .check_and_insert(&event.session_id, event.timestamp);
    }
    state.raw_bus.emit(event);
    Json(json!({ "status": "ok" }))
}

/// Map a hook payload onto a [`RawEvent`]. Returns `None` (with a warn
/// log) for anything that cannot become a well-formed event.
pub fn normalize(payload: HookPayload) -> Option<RawEvent> {
    let Some(name) = payload.hook_event_name.as_deref() else {
        tracing::warn!("hook payload without hook_event_name, dropping");
        return None;
    };
    let Some(session_id) = payload
        .session_id
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    else {
        tracing::warn!(hook = name, "hook payload without session_id, dropping");
        return None;
    };

    match name {
        "PostToolUse" => {
            let tool_name = payload.tool_name.filter(|t| !t.is_empty())?;
            Some(RawEvent::tool_executed(
                session_id,
                tool_name,
                payload.tool_input,
                payload.tool_response,
            ))
        }
        "Notification" => {
            let block_reason = payload
                .notification_type
                .as_deref()
                .and_then(parse_block_reason);
            Some(RawEvent::agent_blocked(
                session_id,
                block_reason,
                payload.message,
                payload.options,
            ))
        }
        "Stop" => Some(RawEvent::agent_stopped(session_id, payload.stop_reason)),
        "SessionStart" => Some(RawEvent::session_start(session_id)),
        "SessionEnd" => Some(RawEvent::session_end(session_id)),
        "AgentMessage" => {
            let text = payload.text.or(payload.message).filter(|t| !t.is_empty())?;
            Some(RawEvent::agent_message(session_id, text, EventSource::Hook))
        }
        other => {
            tracing::warn!(hook = other, "unknown hook event name, dropping");
            None
        }
    }
}

fn parse_block_reason(raw: &str) -> Option<BlockReason> {
    match raw {
        "permission_prompt" => Some(BlockReason::PermissionPrompt),
        "idle_prompt" => Some(BlockReason::IdlePrompt),
        "question" => Some(BlockReason::Question),
        other => {
            tracing::warn!(notification_type = other, "unknown block reason");
            None
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
