//! Configuration management for the redemption engine.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use teamseat_core::GroupId;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Redemption settings
    pub redeem: RedeemConfig,
    /// External dispatch settings
    pub dispatch: DispatchConfig,
    /// Reconciliation settings
    pub sync: SyncConfig,
    /// Prometheus recorder address (None disables the exporter)
    pub metrics_addr: Option<SocketAddr>,
}

/// Redemption settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemConfig {
    /// Group used for shared codes that are not bound to a group
    pub shared_default_group: Option<GroupId>,
    /// Failed attempts per address tolerated within `failure_window` (0 disables)
    pub max_recent_failures: u32,
    /// Window for `max_recent_failures`
    pub failure_window: Duration,
}

/// External dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Deadline for one external invite call
    pub invite_timeout: Duration,
    /// Pause before the single retry of an unsent request
    pub retry_delay: Duration,
}

/// Reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval of the periodic sweep
    pub interval: Duration,
    /// How long a pending record may be invisible externally before it is failed
    pub grace_period: Duration,
    /// Pause between Teams during a sweep
    pub team_spacing: Duration,
    /// Deadline for one external roster listing
    pub roster_timeout: Duration,
    /// Addresses never flagged as unauthorized members (operators, admins)
    pub exempt_emails: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            redeem: RedeemConfig {
                shared_default_group: None,
                max_recent_failures: 5,
                failure_window: Duration::from_secs(300),
            },
            dispatch: DispatchConfig {
                invite_timeout: Duration::from_secs(30),
                retry_delay: Duration::from_millis(250),
            },
            sync: SyncConfig {
                interval: Duration::from_secs(300),
                grace_period: Duration::from_secs(600),
                team_spacing: Duration::ZERO,
                roster_timeout: Duration::from_secs(30),
                exempt_emails: Vec::new(),
            },
            metrics_addr: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables (reading `.env` first if present).
    ///
    /// Unset or unparsable variables fall back to [`EngineConfig::default`].
    #[must_use]
    pub fn from_env() -> Self {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();

        let defaults = Self::default();

        Self {
            redeem: RedeemConfig {
                shared_default_group: parse_var::<i64>("TEAMSEAT_SHARED_DEFAULT_GROUP")
                    .map(GroupId::new),
                max_recent_failures: parse_var("TEAMSEAT_MAX_RECENT_FAILURES")
                    .unwrap_or(defaults.redeem.max_recent_failures),
                failure_window: secs_var("TEAMSEAT_FAILURE_WINDOW_SECS")
                    .unwrap_or(defaults.redeem.failure_window),
            },
            dispatch: DispatchConfig {
                invite_timeout: secs_var("TEAMSEAT_INVITE_TIMEOUT_SECS")
                    .unwrap_or(defaults.dispatch.invite_timeout),
                retry_delay: parse_var::<u64>("TEAMSEAT_DISPATCH_RETRY_DELAY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.dispatch.retry_delay),
            },
            sync: SyncConfig {
                interval: secs_var("TEAMSEAT_SYNC_INTERVAL_SECS")
                    .unwrap_or(defaults.sync.interval),
                grace_period: secs_var("TEAMSEAT_GRACE_PERIOD_SECS")
                    .unwrap_or(defaults.sync.grace_period),
                team_spacing: parse_var::<u64>("TEAMSEAT_TEAM_SPACING_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.sync.team_spacing),
                roster_timeout: secs_var("TEAMSEAT_ROSTER_TIMEOUT_SECS")
                    .unwrap_or(defaults.sync.roster_timeout),
                exempt_emails: env::var("TEAMSEAT_EXEMPT_EMAILS")
                    .map(|raw| {
                        raw.split(',')
                            .map(|e| e.trim().to_lowercase())
                            .filter(|e| !e.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            metrics_addr: parse_var("TEAMSEAT_METRICS_ADDR"),
        }
    }

    /// Check that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for zero timeouts or a zero sync interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("dispatch.invite_timeout", self.dispatch.invite_timeout),
            ("sync.interval", self.sync.interval),
            ("sync.roster_timeout", self.sync.roster_timeout),
        ];

        for (key, value) in non_zero {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.redeem.max_recent_failures > 0 && self.redeem.failure_window.is_zero() {
            return Err(ConfigError::Invalid {
                key: "redeem.failure_window",
                reason: "must be greater than zero when throttling is enabled".to_string(),
            });
        }

        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn secs_var(key: &str) -> Option<Duration> {
    parse_var::<u64>(key).map(Duration::from_secs)
}
