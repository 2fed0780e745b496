//! Speech-to-text client (OpenAI-compatible transcription contract).
//!
//! `POST {base}/v1/audio/transcriptions` multipart with a WAV `file` and a
//! `model` field; health is `GET {base}/v1/models`. Raw PCM16 capture
//! output is framed into a standard WAV container (1 channel, 16-bit,
//! 16 kHz) before upload.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};

use echo_domain::config::SttConfig;
use echo_domain::{Error, Result};
use serde::Deserialize;

const WAV_SAMPLE_RATE: u32 = 16_000;

pub struct SttClient {
    cfg: SttConfig,
    client: reqwest::Client,
    available: AtomicBool,
    disabled: bool,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

impl SttClient {
    pub fn from_config(cfg: &SttConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        let disabled = cfg.api_key.is_none();
        if disabled {
            tracing::warn!("STT API key not configured; transcription disabled");
        }
        Ok(Self {
            cfg: cfg.clone(),
            client,
            available: AtomicBool::new(false),
            disabled,
        })
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn is_available(&self) -> bool {
        !self.disabled && self.available.load(Ordering::Acquire)
    }

    pub async fn probe(&self) -> bool {
        if self.disabled {
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
                tracing::debug!(error = %e, "STT probe failed");
                false
            }
        };
        self.available.store(ok, Ordering::Release);
        ok
    }

    /// Transcribe PCM16 @ 16 kHz mono bytes. Any network, decode, or
    /// timeout error returns `None` and marks the client unavailable.
    pub async fn transcribe(&self, pcm16: &[u8]) -> Option<String> {
        if !self.is_available() || pcm16.is_empty() {
            return None;
        }
        let wav = match wrap_wav(pcm16) {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(error = %e, "failed to frame capture as WAV");
                return None;
            }
        };

        let url = format!(
            "{}/v1/audio/transcriptions",
            self.cfg.base_url.trim_end_matches('/')
        );
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("capture.wav")
            .mime_str("audio/wav")
            .ok()?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.cfg.model.clone());

        let resp = match self
            .client
            .post(&url)
            .bearer_auth(self.api_key())
            .multipart(form)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "STT request failed, marking unavailable");
                self.available.store(false, Ordering::Release);
                return None;
            }
        };
        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), "STT returned non-success");
            self.available.store(false, Ordering::Release);
            return None;
        }
        match resp.json::<TranscriptionResponse>().await {
            Ok(out) => {
                let text = out.text.trim().to_string();
                if text.is_empty() {
                    None
                } else {
                    Some(text)
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "STT response decode failed");
                None
            }
        }
    }

    fn api_key(&self) -> &str {
        self.cfg.api_key.as_deref().unwrap_or_default()
    }
}

/// Frame raw PCM16 LE bytes as a WAV container (1 ch, 16-bit, 16 kHz).
fn wrap_wav(pcm16: &[u8]) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: WAV_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::Audio(e.to_string()))?;
        for chunk in pcm16.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }
        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}
