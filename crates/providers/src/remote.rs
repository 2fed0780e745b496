//! Optional remote room publisher.
//!
//! Mirrors narration audio to a remote listening room so a developer away
//! from the machine still hears the agent. Posts raw PCM16 with an API-key
//! header and a GitHub-style `sha256=<hex>` HMAC signature of the body.
//! Publishing is best-effort: failures flip the connected flag and are
//! logged at debug, never propagated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use echo_domain::config::RemoteConfig;
use echo_domain::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RemotePublisher {
    room_url: String,
    api_key: Option<String>,
    secret: Option<String>,
    client: reqwest::Client,
    connected: AtomicBool,
}

impl RemotePublisher {
    /// Returns `None` when no room URL is configured.
    pub fn from_config(cfg: &RemoteConfig) -> Result<Option<Self>> {
        let Some(room_url) = cfg.room_url.clone() else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(PUBLISH_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Some(Self {
            room_url,
            api_key: cfg.api_key.clone(),
            secret: cfg.secret.clone(),
            client,
            connected: AtomicBool::new(false),
        }))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Probe the room endpoint once at startup.
    pub async fn connect(&self) -> bool {
        let ok = match self.client.get(&self.room_url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "remote room unreachable");
                false
            }
        };
        self.connected.store(ok, Ordering::Release);
        if ok {
            tracing::info!(room = %self.room_url, "remote room connected");
        }
        ok
    }

    /// Mirror one PCM buffer to the room. Best-effort.
    pub async fn publish(&self, pcm: &[u8]) {
        if pcm.is_empty() {
            return;
        }
        let mut req = self
            .client
            .post(&self.room_url)
            .header("content-type", "application/octet-stream");
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        if let Some(secret) = &self.secret {
            req = req.header("x-signature-256", sign(secret, pcm));
        }
        match req.body(pcm.to_vec()).send().await {
            Ok(resp) if resp.status().is_success() => {
                self.connected.store(true, Ordering::Release);
            }
            Ok(resp) => {
                tracing::debug!(status = %resp.status(), "remote publish rejected");
                self.connected.store(false, Ordering::Release);
            }
            Err(e) => {
                tracing::debug!(error = %e, "remote publish failed");
                self.connected.store(false, Ordering::Release);
            }
        }
    }
}

/// `sha256=<hex>` HMAC-SHA256 of `body` keyed by `secret`.
fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length; new_from_slice cannot fail here.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| HmacSha256::new_from_slice(b"echo").unwrap());
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
