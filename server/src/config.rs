//! Configuration management for the server.

use std::env;

use crate::backend::DEFAULT_MAX_RETRIES;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Bound on transform-and-retry rounds per submission
    pub max_submit_retries: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let max_submit_retries = match env::var("TANDEM_MAX_RETRIES") {
            Ok(value) => value.parse().map_err(|_| ConfigError::InvalidRetries)?,
            Err(_) => DEFAULT_MAX_RETRIES,
        };

        Ok(Self {
            host,
            port,
            max_submit_retries,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid TANDEM_MAX_RETRIES value")]
    InvalidRetries,
}
