//! Server configuration module.
//!
//! Parses configuration from environment variables for the FilterSync server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `PORT` | No | 8080 | HTTP server port |
//! | `FILTERSYNC_SEED_FILE` | No | - | JSON file with initial catalogs and counts |

use std::env;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 8080;

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,

    /// Seed file loaded into the registry at startup.
    pub seed_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            seed_file: None,
        }
    }
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `PORT` is not a valid u16 or a variable
    /// contains invalid unicode.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use filtersync_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_port()?;
        let seed_file = match env::var("FILTERSYNC_SEED_FILE") {
            Ok(path) if !path.trim().is_empty() => Some(PathBuf::from(path.trim())),
            Ok(_) | Err(env::VarError::NotPresent) => None,
            Err(env::VarError::NotUnicode(_)) => {
                return Err(ConfigError::InvalidFormat {
                    var: "FILTERSYNC_SEED_FILE".to_string(),
                    message: "contains invalid unicode".to_string(),
                })
            }
        };

        Ok(Self { port, seed_file })
    }
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => Ok(port_str.trim().parse()?),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "PORT".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}
