//! Configuration module for the FilterSync engine.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `FILTERSYNC_BACKEND_URL` | Yes | - | Base URL of the filter backend |
//! | `FILTERSYNC_APP` | No | - | Application context to load on start |
//! | `FILTERSYNC_POLL_INTERVAL_MS` | No | 30000 | Counter poll interval (min 100) |
//! | `FILTERSYNC_NOTIFICATIONS` | No | true | Enable live notification counters |
//! | `FILTERSYNC_EVENT_CAPACITY` | No | 256 | Engine event channel capacity |
//! | `FILTERSYNC_LOAD_RETRY_LIMIT` | No | 3 | Catalog load attempts (1-10) |
//!
//! # Example
//!
//! ```no_run
//! use filtersync_engine::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Backend: {}", config.backend_url);
//! ```

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineSettings;
use crate::retry::RetryPolicy;

/// Default counter poll interval in milliseconds.
const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;

/// Smallest accepted poll interval in milliseconds.
const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Default engine event channel capacity.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default number of catalog load attempts.
const DEFAULT_LOAD_RETRY_LIMIT: u32 = 3;

const MIN_LOAD_RETRY_LIMIT: u32 = 1;
const MAX_LOAD_RETRY_LIMIT: u32 = 10;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Configuration for the FilterSync engine and CLI.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the filter backend (e.g., `http://localhost:8080`).
    pub backend_url: String,

    /// Application context to load on start, if any.
    pub app: Option<String>,

    /// Interval between counter polls for the active filter.
    pub poll_interval: Duration,

    /// Whether live notifications update counters.
    pub notifications_enabled: bool,

    /// Capacity of the engine event broadcast channel.
    pub event_capacity: usize,

    /// Number of attempts for each catalog load.
    pub load_retry_limit: u32,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `FILTERSYNC_BACKEND_URL` is not set
    /// - any optional variable is set but cannot be parsed or is out of range
    pub fn from_env() -> Result<Self, ConfigError> {
        // Required: FILTERSYNC_BACKEND_URL
        let backend_url = env::var("FILTERSYNC_BACKEND_URL")
            .map_err(|_| ConfigError::MissingEnvVar("FILTERSYNC_BACKEND_URL".to_string()))?;
        let backend_url = backend_url.trim_end_matches('/').to_string();

        let app = env::var("FILTERSYNC_APP")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let poll_interval_ms = match env::var("FILTERSYNC_POLL_INTERVAL_MS") {
            Ok(val) => {
                let ms = val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    key: "FILTERSYNC_POLL_INTERVAL_MS".to_string(),
                    message: format!("expected positive integer, got '{val}'"),
                })?;
                if ms < MIN_POLL_INTERVAL_MS {
                    return Err(ConfigError::InvalidValue {
                        key: "FILTERSYNC_POLL_INTERVAL_MS".to_string(),
                        message: format!("poll interval must be at least {MIN_POLL_INTERVAL_MS}ms"),
                    });
                }
                ms
            }
            Err(_) => DEFAULT_POLL_INTERVAL_MS,
        };

        let notifications_enabled = match env::var("FILTERSYNC_NOTIFICATIONS") {
            Ok(val) => parse_bool(&val).ok_or_else(|| ConfigError::InvalidValue {
                key: "FILTERSYNC_NOTIFICATIONS".to_string(),
                message: format!("expected true or false, got '{val}'"),
            })?,
            Err(_) => true,
        };

        let event_capacity = match env::var("FILTERSYNC_EVENT_CAPACITY") {
            Ok(val) => {
                let capacity = val.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                    key: "FILTERSYNC_EVENT_CAPACITY".to_string(),
                    message: format!("expected positive integer, got '{val}'"),
                })?;
                if capacity == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "FILTERSYNC_EVENT_CAPACITY".to_string(),
                        message: "event capacity must be greater than 0".to_string(),
                    });
                }
                capacity
            }
            Err(_) => DEFAULT_EVENT_CAPACITY,
        };

        let load_retry_limit = match env::var("FILTERSYNC_LOAD_RETRY_LIMIT") {
            Ok(val) => {
                let limit = val.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                    key: "FILTERSYNC_LOAD_RETRY_LIMIT".to_string(),
                    message: format!("expected integer 1-10, got '{val}'"),
                })?;
                if !(MIN_LOAD_RETRY_LIMIT..=MAX_LOAD_RETRY_LIMIT).contains(&limit) {
                    return Err(ConfigError::InvalidValue {
                        key: "FILTERSYNC_LOAD_RETRY_LIMIT".to_string(),
                        message: format!(
                            "retry limit must be between {MIN_LOAD_RETRY_LIMIT} and {MAX_LOAD_RETRY_LIMIT}, got {limit}"
                        ),
                    });
                }
                limit
            }
            Err(_) => DEFAULT_LOAD_RETRY_LIMIT,
        };

        Ok(Self {
            backend_url,
            app,
            poll_interval: Duration::from_millis(poll_interval_ms),
            notifications_enabled,
            event_capacity,
            load_retry_limit,
        })
    }

    /// Builds the engine settings described by this configuration.
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            poll_interval: self.poll_interval,
            notifications_enabled: self.notifications_enabled,
            event_capacity: self.event_capacity,
            load_retry: RetryPolicy::with_max_attempts(self.load_retry_limit),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
