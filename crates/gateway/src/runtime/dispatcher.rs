//! Keystroke dispatch: types a response plus newline into the agent's
//! foreground terminal.
//!
//! The mechanism is picked once at startup: tmux when the process runs
//! inside a tmux session, AppleScript key events on macOS, xdotool on X11
//! when the binary is present. Configuration can force a method,
//! overriding auto-detection. Dispatch succeeds iff the subprocess exits
//! zero.

use std::path::{Path, PathBuf};

use echo_domain::config::DispatchMethod;
use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolvedMethod {
    Tmux,
    Applescript,
    Xdotool,
}

pub struct Dispatcher {
    method: Option<ResolvedMethod>,
}

impl Dispatcher {
    /// Resolve the dispatch mechanism, honoring a configured override.
    pub fn detect(method: DispatchMethod) -> Self {
        let resolved = match method {
            DispatchMethod::Tmux => Some(ResolvedMethod::Tmux),
            DispatchMethod::Applescript => Some(ResolvedMethod::Applescript),
            DispatchMethod::Xdotool => Some(ResolvedMethod::Xdotool),
            DispatchMethod::Auto => auto_detect(),
        };
        match resolved {
            Some(m) => tracing::info!(method = ?m, "dispatch method ready"),
            None => tracing::warn!("no dispatch method available; responses cannot be typed"),
        }
        Self { method: resolved }
    }

    #[doc(hidden)]
    pub fn unavailable() -> Self {
        Self { method: None }
    }

    pub fn is_available(&self) -> bool {
        self.method.is_some()
    }

    /// Type `text` followed by Enter. Returns `true` iff every subprocess
    /// exited zero.
    pub async fn dispatch(&self, text: &str) -> bool {
        let Some(method) = self.method else {
            return false;
        };
        let ok = match method {
            ResolvedMethod::Tmux => run_status(
                Command::new("tmux").args(["send-keys", text, "Enter"]),
            )
            .await,
            ResolvedMethod::Applescript => {
                let script = format!(
                    "tell application \"System Events\" to keystroke \"{}\"",
                    escape_applescript(text)
                );
                run_status(Command::new("osascript").args([
                    "-e",
                    &script,
                    "-e",
                    "delay 0.1",
                    "-e",
                    "tell application \"System Events\" to keystroke return",
                ]))
                .await
            }
            ResolvedMethod::Xdotool => {
                run_status(Command::new("xdotool").args(["type", "--delay", "0", text])).await
                    && run_status(Command::new("xdotool").args(["key", "Return"])).await
            }
        };
        if !ok {
            tracing::warn!(method = ?method, "dispatch subprocess failed");
        }
        ok
    }
}

fn auto_detect() -> Option<ResolvedMethod> {
    if std::env::var("TMUX").is_ok_and(|v| !v.is_empty()) {
        return Some(ResolvedMethod::Tmux);
    }
    if cfg!(target_os = "macos") {
        return Some(ResolvedMethod::Applescript);
    }
    if std::env::var("DISPLAY").is_ok_and(|v| !v.is_empty()) && binary_on_path("xdotool") {
        return Some(ResolvedMethod::Xdotool);
    }
    None
}

async fn run_status(cmd: &mut Command) -> bool {
    match cmd.status().await {
        Ok(status) => status.success(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to spawn dispatch subprocess");
            false
        }
    }
}

fn binary_on_path(bin: &str) -> bool {
    let Ok(paths) = std::env::var("PATH") else {
        return false;
    };
    paths
        .split(':')
        .any(|dir| !dir.is_empty() && Path::new(dir).join(PathBuf::from(bin)).exists())
}

fn escape_applescript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
