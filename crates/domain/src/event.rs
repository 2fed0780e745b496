//! Bus payload types: the three shapes that flow through the pipeline.
//!
//! `RawEvent` is the normalized input (hook or transcript sourced),
//! `Narration` is a rendered utterance headed for the speaker, and
//! `Response` is a matched voice (or manual) answer headed for dispatch.
//! All three are immutable after emission and `Clone` for bus fan-out.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form JSON mapping, as carried by tool hook payloads.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ToolExecuted,
    AgentBlocked,
    AgentStopped,
    AgentMessage,
    SessionStart,
    SessionEnd,
}

impl EventKind {
    /// Whether this kind leaves the agent waiting on the developer.
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::AgentBlocked)
    }
}

/// Which producer emitted the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Hook,
    Transcript,
}

/// Why the agent is blocked. Selects the alert-tone variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    PermissionPrompt,
    IdlePrompt,
    Question,
}

/// Scheduling class within the speaker engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    Normal,
    Low,
}

/// How a narration's text was produced. Observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrationMethod {
    Template,
    Llm,
    Truncation,
}

/// How a voice transcript was matched to an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Ordinal,
    YesNo,
    Direct,
    Fuzzy,
    Verbatim,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RawEvent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The normalized input event carried on the raw bus.
///
/// `kind` and `session_id` are always present; the payload fields are
/// optional at the type level and required per kind (enforced by the
/// constructors producers use).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: String,
    pub kind: EventKind,
    pub session_id: String,
    /// Wall-clock seconds since the Unix epoch.
    pub timestamp: f64,
    pub source: EventSource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<BlockReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl RawEvent {
    /// Bare event with a fresh id and the current wall-clock timestamp.
    pub fn new(kind: EventKind, session_id: impl Into<String>, source: EventSource) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            session_id: session_id.into(),
            timestamp: now_secs(),
            source,
            tool_name: None,
            tool_input: None,
            tool_output: None,
            block_reason: None,
            message: None,
            options: None,
            text: None,
            stop_reason: None,
        }
    }

    /// A `tool_executed` event. `tool_name` must be non-empty.
    pub fn tool_executed(
        session_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_input: Option<JsonMap>,
        tool_output: Option<JsonMap>,
    ) -> Self {
        let tool_name = tool_name.into();
        debug_assert!(!tool_name.is_empty(), "tool_executed requires a tool name");
        let mut ev = Self::new(EventKind::ToolExecuted, session_id, EventSource::Hook);
        ev.tool_name = Some(tool_name);
        ev.tool_input = tool_input;
        ev.tool_output = tool_output;
        ev
    }

    /// An `agent_blocked` event. `options`, when given, must be non-empty.
    pub fn agent_blocked(
        session_id: impl Into<String>,
        block_reason: Option<BlockReason>,
        message: Option<String>,
        options: Option<Vec<String>>,
    ) -> Self {
        let mut ev = Self::new(EventKind::AgentBlocked, session_id, EventSource::Hook);
        ev.block_reason = block_reason;
        ev.message = message;
        ev.options = options.filter(|o| !o.is_empty());
        ev
    }

    pub fn agent_stopped(session_id: impl Into<String>, stop_reason: Option<String>) -> Self {
        let mut ev = Self::new(EventKind::AgentStopped, session_id, EventSource::Hook);
        ev.stop_reason = stop_reason;
        ev
    }

    pub fn agent_message(
        session_id: impl Into<String>,
        text: impl Into<String>,
        source: EventSource,
    ) -> Self {
        let mut ev = Self::new(EventKind::AgentMessage, session_id, source);
        ev.text = Some(text.into());
        ev
    }

    pub fn session_start(session_id: impl Into<String>) -> Self {
        Self::new(EventKind::SessionStart, session_id, EventSource::Hook)
    }

    pub fn session_end(session_id: impl Into<String>) -> Self {
        Self::new(EventKind::SessionEnd, session_id, EventSource::Hook)
    }

    /// Options list, if present and non-empty.
    pub fn options(&self) -> Option<&[String]> {
        self.options.as_deref().filter(|o| !o.is_empty())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Narration / Response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A rendered utterance carried on the narration bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Narration {
    /// The exact string to speak.
    pub text: String,
    pub priority: Priority,
    pub source_kind: EventKind,
    pub session_id: String,
    pub source_event_id: String,
    pub method: NarrationMethod,
    /// Present iff produced from `agent_blocked`; selects the alert tone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<BlockReason>,
    /// Carried through for the voice-response loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

impl Narration {
    pub fn from_event(
        event: &RawEvent,
        text: impl Into<String>,
        priority: Priority,
        method: NarrationMethod,
    ) -> Self {
        Self {
            text: text.into(),
            priority,
            source_kind: event.kind,
            session_id: event.session_id.clone(),
            source_event_id: event.id.clone(),
            method,
            block_reason: if event.kind == EventKind::AgentBlocked {
                event.block_reason
            } else {
                None
            },
            options: if event.kind == EventKind::AgentBlocked {
                event.options.clone()
            } else {
                None
            },
        }
    }
}

/// A matched answer carried on the response bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// The final string injected into the agent's terminal.
    pub text: String,
    /// Raw STT output (equals `text` for manual responses).
    pub transcript: String,
    pub session_id: String,
    pub match_method: MatchMethod,
    pub confidence: f64,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// Wall-clock seconds since the Unix epoch, with sub-second precision.
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
