//! Configuration management for the server.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Upper bound on `count` for list requests and watches
    pub max_list_count: usize,
    /// `count` used when a list request does not give one
    pub default_list_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_list_count: 1000,
            default_list_count: 100,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = env::var("HOST").unwrap_or(defaults.host);

        let port = match env::var("PORT") {
            Ok(value) => value.parse().map_err(|_| ConfigError::InvalidPort)?,
            Err(_) => defaults.port,
        };

        let max_list_count = read_count("MAX_LIST_COUNT", defaults.max_list_count)?;
        let default_list_count = read_count("DEFAULT_LIST_COUNT", defaults.default_list_count)?;
        if default_list_count > max_list_count {
            return Err(ConfigError::DefaultAboveMax {
                default: default_list_count,
                max: max_list_count,
            });
        }

        Ok(Self {
            host,
            port,
            max_list_count,
            default_list_count,
        })
    }

    /// Resolve a requested list size against the configured bounds.
    pub fn list_count(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_list_count)
            .min(self.max_list_count)
    }
}

fn read_count(var: &'static str, default: usize) -> Result<usize, ConfigError> {
    match env::var(var) {
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidCount(var)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid {0} value")]
    InvalidCount(&'static str),

    #[error("DEFAULT_LIST_COUNT ({default}) exceeds MAX_LIST_COUNT ({max})")]
    DefaultAboveMax { default: usize, max: usize },
}
