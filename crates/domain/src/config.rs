//! Runtime configuration, read once from the environment at startup.
//!
//! Every knob is an `ECHO_*` environment variable with a documented
//! default; `Config::from_env()` never fails (bad values fall back to the
//! default with a warn log) and `validate()` reports anything that will
//! degrade or disable a subsystem.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub transcripts: TranscriptConfig,
}

impl Config {
    /// Read the full configuration from `ECHO_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            tts: TtsConfig::from_env(),
            llm: LlmConfig::from_env(),
            stt: SttConfig::from_env(),
            voice: VoiceConfig::from_env(),
            alerts: AlertConfig::from_env(),
            audio: AudioConfig::from_env(),
            remote: RemoteConfig::from_env(),
            transcripts: TranscriptConfig::from_env(),
        }
    }

    /// Sanity-check the configuration. Errors make `serve` refuse to start;
    /// warnings describe subsystems that will run degraded.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.tts.api_key.is_none() {
            issues.push(ConfigIssue::warning(
                "ECHO_TTS_API_KEY unset; speech synthesis disabled, narration is text-only",
            ));
        }
        if self.stt.api_key.is_none() {
            issues.push(ConfigIssue::warning(
                "ECHO_STT_API_KEY unset; voice responses disabled, /respond still works",
            ));
        }
        if !(0.0..=1.0).contains(&self.voice.confidence_threshold) {
            issues.push(ConfigIssue::error(
                "ECHO_CONFIDENCE_THRESHOLD must be within 0.0..=1.0",
            ));
        }
        if self.voice.silence_threshold <= 0.0 {
            issues.push(ConfigIssue::error("ECHO_SILENCE_THRESHOLD must be > 0"));
        }
        if self.voice.max_record_sec <= 0.0 {
            issues.push(ConfigIssue::error("ECHO_MAX_RECORD_SEC must be > 0"));
        }
        if self.audio.sample_rate == 0 {
            issues.push(ConfigIssue::error("ECHO_SAMPLE_RATE must be > 0"));
        }
        if self.remote.room_url.is_some() && self.remote.secret.is_none() {
            issues.push(ConfigIssue::warning(
                "ECHO_ROOM_URL set without ECHO_ROOM_SECRET; remote publishes are unsigned",
            ));
        }
        if let Some(dir) = &self.transcripts.dir {
            if !dir.is_dir() {
                issues.push(ConfigIssue::warning(format!(
                    "ECHO_TRANSCRIPT_DIR {} is not a directory; watcher disabled",
                    dir.display()
                )));
            }
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP bind port. The host is always `127.0.0.1`.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 7878 }
    }
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            port: env_parse("ECHO_PORT", 7878),
        }
    }
}

/// Which TTS wire contract to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    ElevenLabs,
    OpenAi,
}

impl FromStr for TtsProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "elevenlabs" => Ok(Self::ElevenLabs),
            "openai" => Ok(Self::OpenAi),
            other => Err(format!("unknown TTS provider: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    pub provider: TtsProvider,
    pub base_url: String,
    /// Unset means the TTS client is permanently disabled for this process.
    pub api_key: Option<String>,
    pub voice_id: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: TtsProvider::ElevenLabs,
            base_url: "https://api.elevenlabs.io".into(),
            api_key: None,
            voice_id: "21m00Tcm4TlvDq8ikWAM".into(),
            model: "eleven_turbo_v2".into(),
            timeout_ms: 10_000,
        }
    }
}

impl TtsConfig {
    fn from_env() -> Self {
        let d = Self::default();
        Self {
            provider: env_parse("ECHO_TTS_PROVIDER", d.provider),
            base_url: env_string("ECHO_TTS_BASE_URL", &d.base_url),
            api_key: env_opt("ECHO_TTS_API_KEY"),
            voice_id: env_string("ECHO_TTS_VOICE_ID", &d.voice_id),
            model: env_string("ECHO_TTS_MODEL", &d.model),
            timeout_ms: env_parse("ECHO_TTS_TIMEOUT_MS", d.timeout_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".into(),
            model: "llama3.2".into(),
            timeout_ms: 8_000,
        }
    }
}

impl LlmConfig {
    fn from_env() -> Self {
        let d = Self::default();
        Self {
            base_url: env_string("ECHO_LLM_BASE_URL", &d.base_url),
            model: env_string("ECHO_LLM_MODEL", &d.model),
            timeout_ms: env_parse("ECHO_LLM_TIMEOUT_MS", d.timeout_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".into(),
            api_key: None,
            model: "whisper-1".into(),
            timeout_ms: 15_000,
        }
    }
}

impl SttConfig {
    fn from_env() -> Self {
        let d = Self::default();
        Self {
            base_url: env_string("ECHO_STT_BASE_URL", &d.base_url),
            api_key: env_opt("ECHO_STT_API_KEY"),
            model: env_string("ECHO_STT_MODEL", &d.model),
            timeout_ms: env_parse("ECHO_STT_TIMEOUT_MS", d.timeout_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// How responses are typed into the agent's terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMethod {
    Auto,
    Tmux,
    Applescript,
    Xdotool,
}

impl FromStr for DispatchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "tmux" => Ok(Self::Tmux),
            "applescript" => Ok(Self::Applescript),
            "xdotool" => Ok(Self::Xdotool),
            other => Err(format!("unknown dispatch method: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// How long to wait for speech onset before giving up.
    pub listen_timeout_sec: f64,
    /// RMS level (on [-1, 1] samples) above which a frame counts as speech.
    pub silence_threshold: f32,
    /// Trailing quiet that ends a recording.
    pub silence_duration_sec: f64,
    /// Hard cap on a single recording.
    pub max_record_sec: f64,
    /// Minimum match confidence required to dispatch.
    pub confidence_threshold: f64,
    pub dispatch_method: DispatchMethod,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            listen_timeout_sec: 10.0,
            silence_threshold: 0.01,
            silence_duration_sec: 1.5,
            max_record_sec: 15.0,
            confidence_threshold: 0.6,
            dispatch_method: DispatchMethod::Auto,
        }
    }
}

impl VoiceConfig {
    fn from_env() -> Self {
        let d = Self::default();
        Self {
            listen_timeout_sec: env_parse("ECHO_LISTEN_TIMEOUT_SEC", d.listen_timeout_sec),
            silence_threshold: env_parse("ECHO_SILENCE_THRESHOLD", d.silence_threshold),
            silence_duration_sec: env_parse("ECHO_SILENCE_DURATION_SEC", d.silence_duration_sec),
            max_record_sec: env_parse("ECHO_MAX_RECORD_SEC", d.max_record_sec),
            confidence_threshold: env_parse("ECHO_CONFIDENCE_THRESHOLD", d.confidence_threshold),
            dispatch_method: env_parse("ECHO_DISPATCH_METHOD", d.dispatch_method),
        }
    }

    pub fn listen_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.listen_timeout_sec.max(0.0))
    }

    pub fn silence_duration(&self) -> Duration {
        Duration::from_secs_f64(self.silence_duration_sec.max(0.0))
    }

    pub fn max_record(&self) -> Duration {
        Duration::from_secs_f64(self.max_record_sec.max(0.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Seconds between alert repeats. `0` disables the repeat timer.
    pub repeat_interval_sec: u64,
    /// Maximum repeat-callback invocations per alert.
    pub max_repeats: u32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            repeat_interval_sec: 30,
            max_repeats: 5,
        }
    }
}

impl AlertConfig {
    fn from_env() -> Self {
        let d = Self::default();
        Self {
            repeat_interval_sec: env_parse("ECHO_ALERT_REPEAT_SEC", d.repeat_interval_sec),
            max_repeats: env_parse("ECHO_ALERT_MAX_REPEATS", d.max_repeats),
        }
    }

    pub fn repeat_interval(&self) -> Duration {
        Duration::from_secs(self.repeat_interval_sec)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Output sample rate; alert tones are cached at this rate.
    pub sample_rate: u32,
    /// Player depth above which LOW-priority narrations are shed.
    pub backlog_threshold: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            backlog_threshold: 3,
        }
    }
}

impl AudioConfig {
    fn from_env() -> Self {
        let d = Self::default();
        Self {
            sample_rate: env_parse("ECHO_SAMPLE_RATE", d.sample_rate),
            backlog_threshold: env_parse("ECHO_BACKLOG_THRESHOLD", d.backlog_threshold),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RemoteConfig {
    /// Remote room ingest URL. Unset disables publishing.
    pub room_url: Option<String>,
    pub api_key: Option<String>,
    pub secret: Option<String>,
}

impl RemoteConfig {
    fn from_env() -> Self {
        Self {
            room_url: env_opt("ECHO_ROOM_URL"),
            api_key: env_opt("ECHO_ROOM_API_KEY"),
            secret: env_opt("ECHO_ROOM_SECRET"),
        }
    }

    pub fn enabled(&self) -> bool {
        self.room_url.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TranscriptConfig {
    /// Directory of append-only `*.jsonl` session transcripts to watch.
    /// Unset disables the watcher.
    pub dir: Option<PathBuf>,
}

impl TranscriptConfig {
    fn from_env() -> Self {
        Self {
            dir: env_opt("ECHO_TRANSCRIPT_DIR").map(PathBuf::from),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Env helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_string(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env_opt(key) {
        Some(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "unparseable env var, using default");
                default
            }
        },
        None => default,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
