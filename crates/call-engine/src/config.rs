//! Engine configuration
//!
//! [`CallEngineConfig`] is split into sections the same way the rest of the
//! engine is split: HTTP/general settings, persistence, the telephony
//! provider, the AI voice-agent platform, the summarizer, correlation timing,
//! availability heuristics, audio tokens, API authentication, voicemail and
//! log output.
//!
//! Every field has a default so a deployment only has to supply what it
//! changes. Missing provider credentials are not a startup error: the affected
//! features degrade (see [`TelephonyConfig::is_configured`] and friends).
//!
//! Configuration is read from an optional TOML file and then from
//! `CALL_ENGINE__<SECTION>__<FIELD>` environment variables:
//!
//! ```text
//! CALL_ENGINE__TELEPHONY__AUTH_TOKEN=...
//! CALL_ENGINE__CORRELATION__GRACE_DELAY_SECS=90
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CallEngineError, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "CALL_ENGINE";

/// Top-level engine configuration
///
/// # Examples
///
/// ```
/// use careline_call_engine::CallEngineConfig;
///
/// let config = CallEngineConfig::default();
/// assert_eq!(config.correlation.single_window_secs, 15 * 60);
/// assert_eq!(config.correlation.bulk_window_secs, 20 * 60);
/// config.validate().expect("defaults are valid");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CallEngineConfig {
    pub general: GeneralConfig,
    pub database: DatabaseConfig,
    pub telephony: TelephonyConfig,
    pub ai_agent: AiAgentConfig,
    pub summarizer: SummarizerConfig,
    pub correlation: CorrelationConfig,
    pub availability: AvailabilityConfig,
    pub audio: AudioConfig,
    pub api: ApiConfig,
    pub voicemail: VoicemailConfig,
    pub logging: LogSettings,
}

/// HTTP listener and URL settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Address the HTTP server binds to
    pub bind_addr: SocketAddr,

    /// Externally reachable base URL, used to build provider callback URLs
    pub public_base_url: String,

    /// Ring browser (softphone) endpoints in preference to PSTN numbers
    pub prefer_browser_endpoints: bool,

    /// Timeout applied to every outbound HTTP request to a provider
    pub http_timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            public_base_url: "http://127.0.0.1:8080".to_string(),
            prefer_browser_endpoints: true,
            http_timeout_secs: 15,
        }
    }
}

impl GeneralConfig {
    /// Join a path onto the public base URL
    pub fn callback_url(&self, path: &str) -> String {
        format!("{}{}", self.public_base_url.trim_end_matches('/'), path)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx SQLite URL, e.g. `sqlite://calls.db` or `sqlite::memory:`
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://call-engine.db".to_string(),
            max_connections: 8,
        }
    }
}

/// Telephony provider (Twilio-compatible REST API) credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelephonyConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    /// Caller id used for outbound legs and SMS
    pub from_number: Option<String>,
    pub api_base_url: String,
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            account_sid: None,
            auth_token: None,
            from_number: None,
            api_base_url: "https://api.twilio.com/2010-04-01".to_string(),
        }
    }
}

impl TelephonyConfig {
    pub fn is_configured(&self) -> bool {
        non_empty(&self.account_sid) && non_empty(&self.auth_token) && non_empty(&self.from_number)
    }
}

/// AI voice-agent platform settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiAgentConfig {
    pub api_key: Option<String>,
    pub agent_id: Option<String>,
    /// Shared secret for the post-call webhook signature
    pub webhook_secret: Option<String>,
    /// Where the router redirects a call for AI fallback
    pub redirect_url: Option<String>,
    pub api_base_url: String,
    /// Maximum accepted age of a signed webhook timestamp
    pub signature_tolerance_secs: i64,
    /// Upper bound on conversations listed per correlation run
    pub max_candidates: usize,
}

impl Default for AiAgentConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            agent_id: None,
            webhook_secret: None,
            redirect_url: None,
            api_base_url: "https://api.elevenlabs.io/v1".to_string(),
            signature_tolerance_secs: 30 * 60,
            max_candidates: 100,
        }
    }
}

impl AiAgentConfig {
    pub fn api_configured(&self) -> bool {
        non_empty(&self.api_key)
    }

    pub fn fallback_configured(&self) -> bool {
        non_empty(&self.redirect_url)
    }
}

/// Chat-completions endpoint used to write call summaries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_base_url: String,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            api_base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

impl SummarizerConfig {
    pub fn is_configured(&self) -> bool {
        non_empty(&self.api_key)
    }
}

/// Correlation engine timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Wait after completion so a native transcription can arrive first
    pub grace_delay_secs: u64,
    /// Acceptance window for single-call lookups
    pub single_window_secs: i64,
    /// Acceptance window for bulk sweeps
    pub bulk_window_secs: i64,
    /// Window used to match AI post-call webhooks to call records
    pub webhook_match_window_secs: i64,
    /// Periodic bulk sweep; 0 disables it
    pub sweep_interval_secs: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            grace_delay_secs: 60,
            single_window_secs: 15 * 60,
            bulk_window_secs: 20 * 60,
            webhook_match_window_secs: 30 * 60,
            sweep_interval_secs: 0,
        }
    }
}

impl CorrelationConfig {
    pub fn grace_delay(&self) -> Duration {
        Duration::from_secs(self.grace_delay_secs)
    }
}

/// Availability heuristics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilityConfig {
    /// Trailing window for the live-call busy scan. Bounds how long a stale
    /// `ringing` row can keep an agent busy.
    pub busy_window_secs: i64,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            busy_window_secs: 2 * 60 * 60,
        }
    }
}

/// Audio proxy token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// HMAC key for audio tokens. When unset a random per-process key is used
    /// and tokens do not survive a restart.
    pub token_secret: Option<String>,
    pub token_ttl_secs: i64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            token_secret: None,
            token_ttl_secs: 60 * 60,
        }
    }
}

/// Authenticated API settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Accepted bearer tokens. An empty list rejects every API request.
    pub bearer_tokens: Vec<String>,
}

/// Voicemail fallback
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoicemailConfig {
    pub prompt: String,
    pub max_length_secs: u32,
}

impl Default for VoicemailConfig {
    fn default() -> Self {
        Self {
            prompt: "Sorry, no one is available to take your call. Please leave a message after the tone.".to_string(),
            max_length_secs: 120,
        }
    }
}

/// Log output settings, see [`crate::logging::LoggingConfig`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
    pub file_info: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
        }
    }
}

impl CallEngineConfig {
    /// Load configuration from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("api.bearer_tokens")
                .try_parsing(true),
        );

        let config: CallEngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate ranges and cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.general.public_base_url.trim().is_empty() {
            return Err(CallEngineError::configuration("general.public_base_url must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(CallEngineError::configuration("database.max_connections must be at least 1"));
        }
        if self.correlation.single_window_secs <= 0 || self.correlation.bulk_window_secs <= 0 {
            return Err(CallEngineError::configuration("correlation windows must be positive"));
        }
        if self.correlation.webhook_match_window_secs <= 0 {
            return Err(CallEngineError::configuration(
                "correlation.webhook_match_window_secs must be positive",
            ));
        }
        if self.availability.busy_window_secs <= 0 {
            return Err(CallEngineError::configuration("availability.busy_window_secs must be positive"));
        }
        if self.audio.token_ttl_secs <= 0 {
            return Err(CallEngineError::configuration("audio.token_ttl_secs must be positive"));
        }
        if self.voicemail.max_length_secs == 0 || self.voicemail.max_length_secs > 3600 {
            return Err(CallEngineError::configuration("voicemail.max_length_secs must be in 1..=3600"));
        }
        crate::logging::parse_log_level(&self.logging.level)?;
        Ok(())
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}
