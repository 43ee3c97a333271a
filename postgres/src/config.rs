//! Connection settings.

use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `DATABASE_URL` is not set
    #[error("DATABASE_URL is not set")]
    MissingUrl,

    /// A value is present but unusable
    #[error("Invalid {key}: {reason}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// `PostgreSQL` pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    /// Connection string
    pub database_url: String,
    /// Pool size
    pub max_connections: u32,
    /// How long to wait for a pooled connection
    pub acquire_timeout: Duration,
}

impl PostgresConfig {
    /// Settings for `database_url` with default pool sizing.
    #[must_use]
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }

    /// Load from `DATABASE_URL`, `TEAMSEAT_DB_MAX_CONNECTIONS` and
    /// `TEAMSEAT_DB_ACQUIRE_TIMEOUT_SECS`, reading `.env` first if present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingUrl`] if no URL is configured, or
    /// [`ConfigError::Invalid`] for a pool size of zero or an unparsable number.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingUrl)?;
        let mut config = Self::new(url);

        if let Some(max) = number("TEAMSEAT_DB_MAX_CONNECTIONS")? {
            if max == 0 {
                return Err(ConfigError::Invalid {
                    key: "TEAMSEAT_DB_MAX_CONNECTIONS",
                    reason: "must be greater than zero".to_string(),
                });
            }
            config.max_connections = u32::try_from(max).map_err(|e| ConfigError::Invalid {
                key: "TEAMSEAT_DB_MAX_CONNECTIONS",
                reason: e.to_string(),
            })?;
        }
        if let Some(secs) = number("TEAMSEAT_DB_ACQUIRE_TIMEOUT_SECS")? {
            config.acquire_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn number(key: &'static str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
