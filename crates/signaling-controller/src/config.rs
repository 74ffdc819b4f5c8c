//! Signaling controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default session key expiry in the backing store, in seconds.
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 3600;

/// Default per-message expiry in the backing store, in seconds.
pub const DEFAULT_MESSAGE_TTL_SECONDS: u64 = 1800;

/// Default participant capacity for new sessions.
pub const DEFAULT_MAX_PARTICIPANTS: usize = 10;

/// Default idle timeout before the sweep ends a session, in minutes.
pub const DEFAULT_IDLE_TIMEOUT_MINUTES: i64 = 30;

/// Default interval between idle sweeps, in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Default SC instance ID prefix.
pub const DEFAULT_SC_ID_PREFIX: &str = "sc";

/// Signaling controller configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Redis connection URL (for session state).
    /// Protected by `SecretString` to prevent accidental logging.
    pub redis_url: SecretString,

    /// Unique identifier for this SC instance.
    pub sc_id: String,

    /// Session key expiry in seconds (default: 3600).
    pub session_ttl_seconds: u64,

    /// Per-message expiry in seconds (default: 1800).
    pub message_ttl_seconds: u64,

    /// Participant capacity applied to sessions created without an explicit
    /// bound (default: 10).
    pub default_max_participants: usize,

    /// Minutes of inactivity after which the sweep ends a session
    /// (default: 30).
    pub idle_timeout_minutes: i64,

    /// Interval between idle sweeps in seconds (default: 60).
    pub sweep_interval_seconds: u64,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("redis_url", &"[REDACTED]")
            .field("sc_id", &self.sc_id)
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .field("message_ttl_seconds", &self.message_ttl_seconds)
            .field("default_max_participants", &self.default_max_participants)
            .field("idle_timeout_minutes", &self.idle_timeout_minutes)
            .field("sweep_interval_seconds", &self.sweep_interval_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = SecretString::from(
            vars.get("REDIS_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("REDIS_URL".to_string()))?
                .clone(),
        );

        let session_ttl_seconds = vars
            .get("SC_SESSION_TTL_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SESSION_TTL_SECONDS);

        let message_ttl_seconds = vars
            .get("SC_MESSAGE_TTL_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MESSAGE_TTL_SECONDS);

        let default_max_participants = vars
            .get("SC_DEFAULT_MAX_PARTICIPANTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_PARTICIPANTS);

        let idle_timeout_minutes = vars
            .get("SC_IDLE_TIMEOUT_MINUTES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_MINUTES);

        let sweep_interval_seconds = vars
            .get("SC_SWEEP_INTERVAL_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECONDS);

        if session_ttl_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "SC_SESSION_TTL_SECONDS must be greater than zero".to_string(),
            ));
        }
        if message_ttl_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "SC_MESSAGE_TTL_SECONDS must be greater than zero".to_string(),
            ));
        }
        if default_max_participants == 0 {
            return Err(ConfigError::InvalidValue(
                "SC_DEFAULT_MAX_PARTICIPANTS must be greater than zero".to_string(),
            ));
        }

        // Generate SC instance ID
        let sc_id = vars.get("SC_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_SC_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            redis_url,
            sc_id,
            session_ttl_seconds,
            message_ttl_seconds,
            default_max_participants,
            idle_timeout_minutes,
            sweep_interval_seconds,
        })
    }
}
