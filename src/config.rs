//! Collector configuration from environment variables

use crate::collector_core::record::SECONDS_PER_DAY;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Upper bound for either ttl, in days (100 years)
pub const MAX_TTL_DAYS: i64 = 36_500;

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration for the collector and report binaries
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Address the HTTP transport binds to
    pub listen_addr: SocketAddr,

    /// Route prefix for the status and event routes
    pub api_prefix: String,

    /// Deadline for all store calls made while handling one request
    pub request_timeout_ms: u64,

    /// Event items expire this many days after receipt
    pub event_ttl_days: i64,

    /// Summary items expire this many days after their latest event
    pub summary_ttl_days: i64,

    /// How often expired rows are purged
    pub purge_interval_secs: u64,

    /// CORS origin used when a preflight carries no Origin header
    pub cors_default_origin: String,
}

impl CollectorConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `HITFLOW_DB_PATH` (default: data/hitflow.db)
    /// - `COLLECTOR_LISTEN_ADDR` (default: 0.0.0.0:8000)
    /// - `COLLECTOR_API_PREFIX` (default: /api)
    /// - `REQUEST_TIMEOUT_MS` (default: 5000)
    /// - `EVENT_TTL_DAYS` (default: 60)
    /// - `SUMMARY_TTL_DAYS` (default: 360)
    /// - `PURGE_INTERVAL_SECS` (default: 3600)
    /// - `CORS_DEFAULT_ORIGIN` (default: http://localhost:8000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let listen_raw = lookup("COLLECTOR_LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string());
        let listen_addr = listen_raw.parse().map_err(|e| {
            ConfigError::InvalidValue(format!("COLLECTOR_LISTEN_ADDR {:?}: {}", listen_raw, e))
        })?;

        let config = Self {
            db_path: lookup("HITFLOW_DB_PATH").unwrap_or_else(|| "data/hitflow.db".to_string()),

            listen_addr,

            api_prefix: normalize_prefix(&lookup("COLLECTOR_API_PREFIX").unwrap_or_else(|| "/api".to_string())),

            request_timeout_ms: lookup("REQUEST_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(5_000),

            event_ttl_days: lookup("EVENT_TTL_DAYS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),

            summary_ttl_days: lookup("SUMMARY_TTL_DAYS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(360),

            purge_interval_secs: lookup("PURGE_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(3_600),

            cors_default_origin: lookup("CORS_DEFAULT_ORIGIN")
                .unwrap_or_else(|| "http://localhost:8000".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_path.trim().is_empty() {
            return Err(ConfigError::InvalidValue("HITFLOW_DB_PATH cannot be empty".to_string()));
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue("REQUEST_TIMEOUT_MS must be positive".to_string()));
        }

        if self.event_ttl_days <= 0 || self.summary_ttl_days <= 0 {
            return Err(ConfigError::InvalidValue(format!(
                "TTL days must be positive (events: {}, summary: {})",
                self.event_ttl_days, self.summary_ttl_days
            )));
        }

        if self.event_ttl_days > MAX_TTL_DAYS || self.summary_ttl_days > MAX_TTL_DAYS {
            return Err(ConfigError::InvalidValue(format!(
                "TTL days must be at most {} (events: {}, summary: {})",
                MAX_TTL_DAYS, self.event_ttl_days, self.summary_ttl_days
            )));
        }

        if self.purge_interval_secs == 0 {
            return Err(ConfigError::InvalidValue("PURGE_INTERVAL_SECS must be positive".to_string()));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn event_ttl_secs(&self) -> i64 {
        self.event_ttl_days * SECONDS_PER_DAY
    }

    pub fn summary_ttl_secs(&self) -> i64 {
        self.summary_ttl_days * SECONDS_PER_DAY
    }
}

// "/api/" and "api" both become "/api"; "" and "/" mean no prefix
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}
