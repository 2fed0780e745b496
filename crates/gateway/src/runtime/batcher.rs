//! Time-windowed batching of rapid tool events.
//!
//! The first tool event opens a window; the batch flushes when the window
//! deadline passes, when the hard cap is reached, or explicitly before any
//! non-tool event so narration stays in arrival order. The batcher itself
//! is a plain accumulator; the summarizer loop drives the deadline, so
//! there is no separate timer task to race against.

use std::time::Duration;

use echo_domain::{Narration, NarrationMethod, Priority, RawEvent};
use tokio::time::Instant;

use super::templates;

/// Open-window length.
pub const BATCH_WINDOW: Duration = Duration::from_millis(500);
/// Hard cap on events per batch.
pub const BATCH_MAX: usize = 10;

pub struct EventBatcher {
    events: Vec<RawEvent>,
    deadline: Option<Instant>,
    window: Duration,
    cap: usize,
}

impl EventBatcher {
    pub fn new() -> Self {
        Self::with_limits(BATCH_WINDOW, BATCH_MAX)
    }

    pub fn with_limits(window: Duration, cap: usize) -> Self {
        Self {
            events: Vec::new(),
            deadline: None,
            window,
            cap: cap.max(1),
        }
    }

    /// Add a tool event. Returns a narration when the cap forces an
    /// immediate flush.
    pub fn push(&mut self, event: RawEvent) -> Option<Narration> {
        if self.events.is_empty() {
            self.deadline = Some(Instant::now() + self.window);
        }
        self.events.push(event);
        if self.events.len() >= self.cap {
            return self.flush();
        }
        None
    }

    /// Deadline of the open window, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drain the batch into a narration. Idempotent: an empty batch
    /// returns `None`.
    pub fn flush(&mut self) -> Option<Narration> {
        self.deadline = None;
        if self.events.is_empty() {
            return None;
        }
        let events = std::mem::take(&mut self.events);
        let text = if events.len() == 1 {
            templates::render_tool_event(&events[0])
        } else {
            templates::render_tool_batch(&events)
        };
        Some(Narration::from_event(
            &events[0],
            text,
            Priority::Normal,
            NarrationMethod::Template,
        ))
    }
}

impl Default for EventBatcher {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
