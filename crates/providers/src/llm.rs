//! LLM summarization client (Ollama wire contract).
//!
//! `POST {base}/api/generate` with non-streaming generation and a short
//! token cap; health is `GET {base}/api/tags`. When the model is
//! unreachable, `summarize` degrades to plain truncation so narration
//! keeps flowing.

use std::sync::atomic::{AtomicBool, Ordering};

use echo_domain::config::LlmConfig;
use echo_domain::{Error, NarrationMethod, Result};
use serde::Deserialize;
use serde_json::json;

/// Inputs at or under this many chars pass through the fallback verbatim.
const TRUNCATE_LIMIT: usize = 150;
/// Longer inputs keep this many chars plus an ellipsis.
const TRUNCATE_KEEP: usize = 140;
/// Hard cap on summary length, in words.
const MAX_SUMMARY_WORDS: usize = 20;

const SUMMARY_PROMPT: &str = "You narrate an AI coding assistant's progress out loud to a \
developer. Summarize the assistant message below in one spoken sentence of at most 20 words. \
Reply with only the sentence, no quotes.";

pub struct LlmClient {
    cfg: LlmConfig,
    client: reqwest::Client,
    available: AtomicBool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl LlmClient {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            cfg: cfg.clone(),
            client,
            available: AtomicBool::new(false),
        })
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub async fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.cfg.base_url.trim_end_matches('/'));
        let ok = match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "LLM probe failed");
                false
            }
        };
        self.available.store(ok, Ordering::Release);
        ok
    }

    /// Summarize a free-text assistant message into one short sentence.
    ///
    /// Falls back to [`truncate`] (and reports `NarrationMethod::Truncation`)
    /// whenever the model is unavailable or the call fails.
    pub async fn summarize(&self, text: &str) -> (String, NarrationMethod) {
        if !self.is_available() {
            return (truncate(text), NarrationMethod::Truncation);
        }
        match self.generate(text).await {
            Some(summary) if !summary.is_empty() => (summary, NarrationMethod::Llm),
            _ => (truncate(text), NarrationMethod::Truncation),
        }
    }

    async fn generate(&self, text: &str) -> Option<String> {
        let url = format!("{}/api/generate", self.cfg.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.cfg.model,
            "prompt": format!("{SUMMARY_PROMPT}\n\n{text}"),
            "stream": false,
            "options": { "num_predict": 50, "temperature": 0.3 },
        });

        let resp = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "LLM request failed, marking unavailable");
                self.available.store(false, Ordering::Release);
                return None;
            }
        };
        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), "LLM returned non-success");
            self.available.store(false, Ordering::Release);
            return None;
        }
        match resp.json::<GenerateResponse>().await {
            Ok(out) => Some(clamp_summary(&out.response)),
            Err(e) => {
                tracing::warn!(error = %e, "LLM response decode failed");
                None
            }
        }
    }
}

/// Collapse whitespace and enforce the word cap on a model reply.
fn clamp_summary(raw: &str) -> String {
    let words: Vec<&str> = raw.split_whitespace().take(MAX_SUMMARY_WORDS).collect();
    words.join(" ").trim_matches('"').to_string()
}

/// The no-model fallback: short text passes through, long text is cut at
/// [`TRUNCATE_KEEP`] chars with an ellipsis. Char counts, not bytes.
pub fn truncate(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= TRUNCATE_LIMIT {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(TRUNCATE_KEEP).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_passes_verbatim() {
        let text = "a".repeat(150);
        assert_eq!(truncate(&text), text);
    }

    #[test]
    fn long_text_keeps_140_chars_plus_ellipsis() {
        let text = "b".repeat(151);
        let out = truncate(&text);
        assert_eq!(out.chars().count(), 141);
        assert!(out.ends_with('…'));
        assert_eq!(&out[..140], "b".repeat(140));
    }

    #[test]
    fn truncation_counts_chars_not_bytes() {
        // 151 multi-byte chars must still truncate without panicking.
        let text = "é".repeat(151);
        let out = truncate(&text);
        assert_eq!(out.chars().count(), 141);
    }

    #[test]
    fn summary_clamped_to_twenty_words() {
        let raw = (0..40).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let out = clamp_summary(&raw);
        assert_eq!(out.split_whitespace().count(), 20);
    }

    #[tokio::test]
    async fn unavailable_model_falls_back_to_truncation() {
        let client = LlmClient::from_config(&LlmConfig::default()).unwrap();
        let (text, method) = client.summarize("hello world").await;
        assert_eq!(text, "hello world");
        assert_eq!(method, NarrationMethod::Truncation);
    }
}
