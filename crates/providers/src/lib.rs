//! HTTP clients for Echo's external collaborators.
//!
//! Each client wraps one wire contract (TTS, LLM summarization, STT, the
//! optional remote room) behind a degradable call: failures and timeouts
//! return `None`/fallbacks and flip an availability flag instead of
//! propagating errors. The gateway re-probes unavailable clients
//! periodically; a client constructed without its API key stays disabled
//! for the life of the process.

pub mod llm;
pub mod remote;
pub mod stt;
pub mod tts;

pub use llm::LlmClient;
pub use remote::RemotePublisher;
pub use stt::SttClient;
pub use tts::TtsClient;

/// Interval between re-probes of an unavailable provider.
pub const REPROBE_INTERVAL_SECS: u64 = 60;
