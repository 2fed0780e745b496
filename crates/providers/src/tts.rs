//! Text-to-speech clients.
//!
//! Two cloud providers behind one tagged variant, selected by the
//! configured provider key. Both deliver raw PCM16 @ 16 kHz mono:
//!
//! - `elevenlabs`: `POST {base}/v1/text-to-speech/{voice_id}` with JSON
//!   `{text, model_id}` and query `output_format=pcm_16000`; health via
//!   `GET {base}/v1/user`; auth header `xi-api-key`.
//! - `openai`: OpenAI-compatible `POST {base}/v1/audio/speech` with JSON
//!   `{model, input, voice, response_format: "pcm", sample_rate: 16000}`;
//!   health via `GET {base}/v1/models`; bearer auth.
//!
//! A client constructed without an API key is permanently disabled for
//! the life of the process.

use std::sync::atomic::{AtomicBool, Ordering};

use echo_domain::config::{TtsConfig, TtsProvider};
use echo_domain::{Error, Result};
use serde_json::json;

/// The provider-tagged TTS client.
pub enum TtsClient {
    ElevenLabs(ElevenLabsTts),
    OpenAi(OpenAiSpeechTts),
}

impl TtsClient {
    /// Factory: build the provider named by the configuration.
    pub fn from_config(cfg: &TtsConfig) -> Result<Self> {
        if cfg.api_key.is_none() {
            tracing::warn!("TTS API key not configured; synthesis disabled");
        }
        match cfg.provider {
            TtsProvider::ElevenLabs => Ok(Self::ElevenLabs(ElevenLabsTts::new(cfg)?)),
            TtsProvider::OpenAi => Ok(Self::OpenAi(OpenAiSpeechTts::new(cfg)?)),
        }
    }

    /// Permanently off for this process (no API key).
    pub fn is_disabled(&self) -> bool {
        match self {
            Self::ElevenLabs(c) => c.state.disabled,
            Self::OpenAi(c) => c.state.disabled,
        }
    }

    pub fn is_available(&self) -> bool {
        match self {
            Self::ElevenLabs(c) => c.state.is_available(),
            Self::OpenAi(c) => c.state.is_available(),
        }
    }

    /// Hit the provider's health endpoint and update the availability flag.
    pub async fn probe(&self) -> bool {
        match self {
            Self::ElevenLabs(c) => c.probe().await,
            Self::OpenAi(c) => c.probe().await,
        }
    }

    /// Synthesize `text` to PCM16 @ 16 kHz mono. Never raises: any
    /// failure marks the client unavailable and returns `None`.
    pub async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        if !self.is_available() || text.trim().is_empty() {
            return None;
        }
        match self {
            Self::ElevenLabs(c) => c.synthesize(text).await,
            Self::OpenAi(c) => c.synthesize(text).await,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared provider state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ProviderState {
    available: AtomicBool,
    disabled: bool,
}

impl ProviderState {
    fn new(disabled: bool) -> Self {
        Self {
            available: AtomicBool::new(false),
            disabled,
        }
    }

    fn is_available(&self) -> bool {
        !self.disabled && self.available.load(Ordering::Acquire)
    }

    fn set_available(&self, ok: bool) {
        self.available.store(ok, Ordering::Release);
    }
}

fn build_http_client(cfg: &TtsConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(cfg.timeout())
        .build()
        .map_err(|e| Error::Http(e.to_string()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ElevenLabs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ElevenLabsTts {
    cfg: TtsConfig,
    client: reqwest::Client,
    state: ProviderState,
}

impl ElevenLabsTts {
    fn new(cfg: &TtsConfig) -> Result<Self> {
        Ok(Self {
            cfg: cfg.clone(),
            client: build_http_client(cfg)?,
            state: ProviderState::new(cfg.api_key.is_none()),
        })
    }

    async fn probe(&self) -> bool {
        if self.state.disabled {
            return false;
        }
        let url = format!("{}/v1/user", self.cfg.base_url.trim_end_matches('/'));
        let ok = match self
            .client
            .get(&url)
            .header("xi-api-key", self.api_key())
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "TTS probe failed");
                false
            }
        };
        self.state.set_available(ok);
        ok
    }

    async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        let url = format!(
            "{}/v1/text-to-speech/{}?output_format=pcm_16000",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.voice_id
        );
        let body = json!({ "text": text, "model_id": self.cfg.model });
        let request = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key())
            .json(&body);
        read_pcm_response(request, &self.state).await
    }

    fn api_key(&self) -> &str {
        self.cfg.api_key.as_deref().unwrap_or_default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// OpenAI-compatible speech endpoint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiSpeechTts {
    cfg: TtsConfig,
    client: reqwest::Client,
    state: ProviderState,
}

impl OpenAiSpeechTts {
    fn new(cfg: &TtsConfig) -> Result<Self> {
        Ok(Self {
            cfg: cfg.clone(),
            client: build_http_client(cfg)?,
            state: ProviderState::new(cfg.api_key.is_none()),
        })
    }

    async fn probe(&self) -> bool {
        if self.state.disabled {
            return false;
        }
        let url = format!("{}/v1/models", self.cfg.base_url.trim_end_matches('/'));
        let ok = match self
            .client
            .get(&url)
            .bearer_auth(self.api_key())
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "TTS probe failed");
                false
            }
        };
        self.state.set_available(ok);
        ok
    }

    async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        let url = format!(
            "{}/v1/audio/speech",
            self.cfg.base_url.trim_end_matches('/')
        );
        // sample_rate is honored by the self-hosted gateways this variant
        // targets; the voice id doubles as the speech voice name.
        let body = json!({
            "model": self.cfg.model,
            "input": text,
            "voice": self.cfg.voice_id,
            "response_format": "pcm",
            "sample_rate": 16_000,
        });
        let request = self
            .client
            .post(&url)
            .bearer_auth(self.api_key())
            .json(&body);
        read_pcm_response(request, &self.state).await
    }

    fn api_key(&self) -> &str {
        self.cfg.api_key.as_deref().unwrap_or_default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared response handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn read_pcm_response(
    request: reqwest::RequestBuilder,
    state: &ProviderState,
) -> Option<Vec<u8>> {
    let resp = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "TTS request failed, marking unavailable");
            state.set_available(false);
            return None;
        }
    };
    if !resp.status().is_success() {
        tracing::warn!(status = %resp.status(), "TTS returned non-success");
        state.set_available(false);
        return None;
    }
    match resp.bytes().await {
        Ok(b) if !b.is_empty() => Some(b.to_vec()),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %e, "TTS body read failed");
            state.set_available(false);
            None
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(api_key: Option<&str>) -> TtsConfig {
        TtsConfig {
            api_key: api_key.map(str::to_owned),
            ..TtsConfig::default()
        }
    }

    #[test]
    fn missing_key_disables_permanently() {
        let client = TtsClient::from_config(&cfg(None)).unwrap();
        assert!(client.is_disabled());
        assert!(!client.is_available());
    }

    #[test]
    fn factory_selects_the_configured_provider() {
        let client = TtsClient::from_config(&cfg(Some("k"))).unwrap();
        assert!(matches!(client, TtsClient::ElevenLabs(_)));

        let openai = TtsConfig {
            provider: TtsProvider::OpenAi,
            ..cfg(Some("k"))
        };
        let client = TtsClient::from_config(&openai).unwrap();
        assert!(matches!(client, TtsClient::OpenAi(_)));
    }

    #[tokio::test]
    async fn disabled_client_skips_probe_and_synthesis() {
        let client = TtsClient::from_config(&cfg(None)).unwrap();
        assert!(!client.probe().await);
        assert!(client.synthesize("hello").await.is_none());
    }

    #[tokio::test]
    async fn unavailable_client_returns_none_without_io() {
        let client = TtsClient::from_config(&cfg(Some("key"))).unwrap();
        // Never probed successfully, so the flag is still false.
        assert!(client.synthesize("hello").await.is_none());
    }
}
