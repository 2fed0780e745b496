//! Deterministic narration templates.
//!
//! Compact, imperative, present tense. File paths are reduced to their
//! basename so narration stays speakable. Rendering is a pure function of
//! the event, so applying a template twice yields the same text.

use echo_domain::{BlockReason, RawEvent};

/// Longest command text spoken before truncation.
const COMMAND_CHARS: usize = 60;

const ORDINALS: [&str; 10] = [
    "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Single tool events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn render_tool_event(event: &RawEvent) -> String {
    let tool = event.tool_name.as_deref().unwrap_or_default();
    match tool {
        "Bash" => format!(
            "Ran command: {}",
            truncate_chars(input_str(event, "command"), COMMAND_CHARS)
        ),
        "Read" => format!("Read {}", basename(input_str(event, "file_path"))),
        "Edit" => format!("Edited {}", basename(input_str(event, "file_path"))),
        "Write" => format!("Created {}", basename(input_str(event, "file_path"))),
        "Glob" => format!(
            "Searched for files matching {}",
            input_str(event, "pattern")
        ),
        "Grep" => format!("Searched code for {}", input_str(event, "pattern")),
        "Task" => "Launched a sub-agent".to_string(),
        "WebFetch" => "Fetched a web page".to_string(),
        "WebSearch" => format!("Searched the web for {}", input_str(event, "query")),
        other => format!("Used {other} tool"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Batched tool events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Render a window of rapid tool events as one sentence, e.g.
/// "Edited 3 files." or "Edited 2 files and ran a command."
pub fn render_tool_batch(events: &[RawEvent]) -> String {
    // Count per tool, preserving first-seen order.
    let mut order: Vec<&str> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    for event in events {
        let tool = event.tool_name.as_deref().unwrap_or_default();
        match order.iter().position(|&t| t == tool) {
            Some(i) => counts[i] += 1,
            None => {
                order.push(tool);
                counts.push(1);
            }
        }
    }

    let phrases: Vec<String> = order
        .iter()
        .zip(&counts)
        .map(|(&tool, &n)| batch_phrase(tool, n))
        .collect();

    let mut sentence = join_phrases(&phrases);
    capitalize(&mut sentence);
    sentence.push('.');
    sentence
}

/// "edited 3 files" / "ran a command".
fn batch_phrase(tool: &str, n: usize) -> String {
    let (verb, noun) = match tool {
        "Bash" => ("ran", "command".to_string()),
        "Read" => ("read", "file".to_string()),
        "Edit" => ("edited", "file".to_string()),
        "Write" => ("created", "file".to_string()),
        "Glob" => ("ran", "file search".to_string()),
        "Grep" => ("ran", "code search".to_string()),
        "Task" => ("launched", "sub-agent".to_string()),
        "WebFetch" => ("fetched", "web page".to_string()),
        "WebSearch" => ("ran", "web search".to_string()),
        other => ("used", format!("{other} tool")),
    };
    if n == 1 {
        format!("{verb} a {noun}")
    } else {
        format!("{verb} {n} {noun}s")
    }
}

fn join_phrases(phrases: &[String]) -> String {
    match phrases {
        [] => String::new(),
        [only] => only.clone(),
        [a, b] => format!("{a} and {b}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Blocked / stopped / session events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn render_blocked(event: &RawEvent) -> String {
    let message = event.message.as_deref().unwrap_or_default();
    let mut text = match event.block_reason {
        Some(BlockReason::PermissionPrompt) => format!(
            "The agent needs your permission and is waiting for your answer. It's asking: {message}"
        ),
        Some(BlockReason::Question) => format!(
            "The agent has a question and is waiting for your answer. It's asking: {message}"
        ),
        Some(BlockReason::IdlePrompt) => {
            "The agent is idle and waiting for your input.".to_string()
        }
        None => {
            let mut t = "The agent is blocked and needs your attention.".to_string();
            if !message.is_empty() {
                t.push(' ');
                t.push_str(message);
            }
            t
        }
    };
    if let Some(options) = event.options() {
        text.push_str(&render_options(options));
    }
    text
}

/// " Option one: A. Option two: B." with spoken ordinals up to ten,
/// digits beyond.
fn render_options(options: &[String]) -> String {
    let mut out = String::new();
    for (i, option) in options.iter().enumerate() {
        out.push_str(&format!(" Option {}: {}.", spoken_ordinal(i + 1), option));
    }
    out
}

pub fn spoken_ordinal(n: usize) -> String {
    if (1..=ORDINALS.len()).contains(&n) {
        ORDINALS[n - 1].to_string()
    } else {
        n.to_string()
    }
}

pub fn render_stopped(event: &RawEvent) -> String {
    match event.stop_reason.as_deref() {
        Some(reason) if !reason.is_empty() => format!("Agent stopped: {reason}"),
        _ => "Agent finished.".to_string(),
    }
}

pub fn render_session_start() -> String {
    "New coding session started.".to_string()
}

pub fn render_session_end() -> String {
    "Session ended.".to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn input_str<'a>(event: &'a RawEvent, key: &str) -> &'a str {
    event
        .tool_input
        .as_ref()
        .and_then(|m| m.get(key))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

fn capitalize(s: &mut String) {
    if let Some(first) = s.chars().next() {
        let upper = first.to_uppercase().to_string();
        s.replace_range(..first.len_utf8(), &upper);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use echo_domain::event::JsonMap;

    fn tool(name: &str, key: &str, value: &str) -> RawEvent {
        let mut input = JsonMap::new();
        input.insert(key.into(), serde_json::json!(value));
        RawEvent::tool_executed("s1", name, Some(input), None)
    }

    #[test]
    fn bash_narrates_the_command() {
        let ev = tool("Bash", "command", "npm test");
        assert_eq!(render_tool_event(&ev), "Ran command: npm test");
    }

    #[test]
    fn bash_command_truncates_at_sixty_chars() {
        let long = "x".repeat(80);
        let ev = tool("Bash", "command", &long);
        let text = render_tool_event(&ev);
        assert_eq!(text, format!("Ran command: {}", "x".repeat(60)));
    }

    #[test]
    fn file_tools_use_basename() {
        assert_eq!(
            render_tool_event(&tool("Read", "file_path", "/src/lib/auth.ts")),
            "Read auth.ts"
        );
        assert_eq!(
            render_tool_event(&tool("Edit", "file_path", "/a/b/c.rs")),
            "Edited c.rs"
        );
        assert_eq!(
            render_tool_event(&tool("Write", "file_path", "mod.rs")),
            "Created mod.rs"
        );
    }

    #[test]
    fn search_and_web_tools() {
        assert_eq!(
            render_tool_event(&tool("Glob", "pattern", "**/*.ts")),
            "Searched for files matching **/*.ts"
        );
        assert_eq!(
            render_tool_event(&tool("Grep", "pattern", "TODO")),
            "Searched code for TODO"
        );
        assert_eq!(
            render_tool_event(&tool("WebSearch", "query", "rust axum sse")),
            "Searched the web for rust axum sse"
        );
        assert_eq!(
            render_tool_event(&RawEvent::tool_executed("s1", "Task", None, None)),
            "Launched a sub-agent"
        );
        assert_eq!(
            render_tool_event(&RawEvent::tool_executed("s1", "WebFetch", None, None)),
            "Fetched a web page"
        );
    }

    #[test]
    fn unknown_tool_falls_back() {
        let ev = RawEvent::tool_executed("s1", "NotebookEdit", None, None);
        assert_eq!(render_tool_event(&ev), "Used NotebookEdit tool");
    }

    #[test]
    fn same_tool_batch_is_counted() {
        let events = vec![
            tool("Edit", "file_path", "/a.ts"),
            tool("Edit", "file_path", "/b.ts"),
            tool("Edit", "file_path", "/c.ts"),
        ];
        assert_eq!(render_tool_batch(&events), "Edited 3 files.");
    }

    #[test]
    fn mixed_batch_is_pair_joined() {
        let events = vec![
            tool("Edit", "file_path", "/a.ts"),
            tool("Edit", "file_path", "/b.ts"),
            tool("Bash", "command", "npm test"),
        ];
        assert_eq!(render_tool_batch(&events), "Edited 2 files and ran a command.");
    }

    #[test]
    fn three_way_batch_uses_commas() {
        let events = vec![
            tool("Edit", "file_path", "/a.ts"),
            tool("Bash", "command", "ls"),
            tool("Read", "file_path", "/c.ts"),
        ];
        assert_eq!(
            render_tool_batch(&events),
            "Edited a file, ran a command, and read a file."
        );
    }

    #[test]
    fn blocked_templates_per_reason() {
        let ev = RawEvent::agent_blocked(
            "s1",
            Some(BlockReason::PermissionPrompt),
            Some("Allow edit of auth.ts?".into()),
            None,
        );
        assert_eq!(
            render_blocked(&ev),
            "The agent needs your permission and is waiting for your answer. \
             It's asking: Allow edit of auth.ts?"
        );

        let ev = RawEvent::agent_blocked("s1", Some(BlockReason::IdlePrompt), None, None);
        assert_eq!(render_blocked(&ev), "The agent is idle and waiting for your input.");

        let ev = RawEvent::agent_blocked("s1", None, Some("stuck".into()), None);
        assert_eq!(
            render_blocked(&ev),
            "The agent is blocked and needs your attention. stuck"
        );
    }

    #[test]
    fn options_are_appended_with_spoken_ordinals() {
        let ev = RawEvent::agent_blocked(
            "s1",
            Some(BlockReason::Question),
            Some("Which algorithm?".into()),
            Some(vec!["RS256".into(), "HS256".into()]),
        );
        let text = render_blocked(&ev);
        assert!(text.ends_with(" Option one: RS256. Option two: HS256."), "{text}");
    }

    #[test]
    fn ordinals_go_to_words_then_digits() {
        assert_eq!(spoken_ordinal(1), "one");
        assert_eq!(spoken_ordinal(10), "ten");
        assert_eq!(spoken_ordinal(11), "11");
    }

    #[test]
    fn stopped_with_and_without_reason() {
        let ev = RawEvent::agent_stopped("s1", None);
        assert_eq!(render_stopped(&ev), "Agent finished.");
        let ev = RawEvent::agent_stopped("s1", Some("max turns".into()));
        assert_eq!(render_stopped(&ev), "Agent stopped: max turns");
    }

    #[test]
    fn rendering_is_idempotent() {
        let ev = tool("Bash", "command", "cargo check");
        assert_eq!(render_tool_event(&ev), render_tool_event(&ev));
    }
}
