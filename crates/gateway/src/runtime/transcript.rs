//! Transcript file watcher.
//!
//! Agent sessions append newline-delimited JSON to `<session>.jsonl`
//! files; the watcher polls the configured directory, keeps a byte offset
//! per file so only new content is parsed, and emits an `agent_message`
//! event for each assistant record. A small dedupe window keyed on
//! `(session_id, decisecond)` suppresses lines the hook ingress already
//! delivered.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use echo_bus::Bus;
use echo_domain::{EventSource, RawEvent};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Entries kept in the dedupe window.
const DEDUPE_CAPACITY: usize = 128;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dedupe window
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type DedupeKey = (String, i64);

/// LRU set of recently seen `(session_id, floor(timestamp * 10))` keys.
/// Shared between the hook ingress (writer) and the watcher (reader +
/// writer): a hit suppresses the transcript emission.
pub struct DedupeWindow {
    inner: Mutex<DedupeInner>,
}

struct DedupeInner {
    order: VecDeque<DedupeKey>,
    seen: HashSet<DedupeKey>,
}

impl DedupeWindow {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(DedupeInner {
                order: VecDeque::with_capacity(DEDUPE_CAPACITY),
                seen: HashSet::with_capacity(DEDUPE_CAPACITY),
            }),
        })
    }

    fn key(session_id: &str, timestamp: f64) -> DedupeKey {
        (session_id.to_string(), (timestamp * 10.0).floor() as i64)
    }

    /// Record a key. Returns `true` if it was already present.
    pub fn check_and_insert(&self, session_id: &str, timestamp: f64) -> bool {
        let key = Self::key(session_id, timestamp);
        let mut inner = self.inner.lock();
        if inner.seen.contains(&key) {
            return true;
        }
        if inner.order.len() >= DEDUPE_CAPACITY {
            if let Some(evicted) = inner.order.pop_front() {
                inner.seen.remove(&evicted);
            }
        }
        inner.order.push_back(key.clone());
        inner.seen.insert(key);
        false
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Watcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TranscriptWatcher {
    dir: PathBuf,
    raw_bus: Arc<Bus<RawEvent>>,
    dedupe: Arc<DedupeWindow>,
    offsets: HashMap<PathBuf, u64>,
    /// First scan seeds offsets at end-of-file so history isn't narrated.
    primed: bool,
}

impl TranscriptWatcher {
    pub fn new(dir: PathBuf, raw_bus: Arc<Bus<RawEvent>>, dedupe: Arc<DedupeWindow>) -> Self {
        Self {
            dir,
            raw_bus,
            dedupe,
            offsets: HashMap::new(),
            primed: false,
        }
    }

    /// Spawn the poll loop.
    pub fn start(mut self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(dir = %self.dir.display(), "transcript watcher started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(POLL_INTERVAL) => self.scan_once(),
                }
            }
            tracing::debug!("transcript watcher stopped");
        })
    }

    /// One poll pass over the directory. Split out for tests.
    pub fn scan_once(&mut self) {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(error = %e, "transcript dir unreadable");
                return;
            }
        };
        let priming = !self.primed;
        self.primed = true;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let len = match entry.metadata() {
                Ok(m) => m.len(),
                Err(_) => continue,
            };
            let offset = self.offsets.entry(path.clone()).or_insert(if priming {
                len
            } else {
                0
            });
            if len < *offset {
                // Truncated/rotated: start over.
                *offset = 0;
            }
            if len == *offset {
                continue;
            }
            match read_new_lines(&path, *offset) {
                Ok((lines, consumed)) => {
                    *offset += consumed;
                    for line in lines {
                        self.process_line(&path, &line);
                    }
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "transcript read failed"),
            }
        }
    }

    fn process_line(&self, path: &Path, line: &str) {
        let Ok(record) = serde_json::from_str::<serde_json::Value>(line) else {
            tracing::debug!(path = %path.display(), "skipping unparseable transcript line");
            return;
        };
        let Some(message) = assistant_text(&record) else {
            return;
        };
        let session_id = record
            .get("session_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| file_session_id(path));
        let timestamp = record
            .get("timestamp")
            .and_then(|v| v.as_str())
            .and_then(parse_rfc3339_secs)
            .unwrap_or_else(echo_domain::event::now_secs);

        if self.dedupe.check_and_insert(&session_id, timestamp) {
            tracing::debug!(%session_id, "transcript line suppressed by dedupe window");
            return;
        }

        let mut event = RawEvent::agent_message(session_id, message, EventSource::Transcript);
        event.timestamp = timestamp;
        self.raw_bus.emit(event);
    }
}

/// Read complete lines appended after `offset`. Returns the lines and how
/// many bytes they consumed; a trailing partial line is left for the next
/// poll.
fn read_new_lines(path: &Path, offset: u64) -> std::io::Result<(Vec<String>, u64)> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    let complete = match buf.iter().rposition(|&b| b == b'\n') {
        Some(last_newline) => last_newline + 1,
        None => return Ok((Vec::new(), 0)),
    };
    let text = String::from_utf8_lossy(&buf[..complete]);
    let lines = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    Ok((lines, complete as u64))
}

/// Extract assistant text from either flat (`role`/`content`) or nested
/// (`message: {role, content}`) record shapes; content may be a string or
/// an array of `{type: "text", text}` parts.
fn assistant_text(record: &serde_json::Value) -> Option<String> {
    let (role, content) = if let Some(role) = record.get("role").and_then(|v| v.as_str()) {
        (role, record.get("content")?)
    } else {
        let message = record.get("message")?;
        (
            message.get("role").and_then(|v| v.as_str())?,
            message.get("content")?,
        )
    };
    if role != "assistant" {
        return None;
    }
    let text = match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(parts) => parts
            .iter()
            .filter(|p| p.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => return None,
    };
    let text = text.trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn file_session_id(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

fn parse_rfc3339_secs(raw: &str) -> Option<f64> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp_micros() as f64 / 1e6)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
