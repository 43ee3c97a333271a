//! Error types for the redemption engine.
//!
//! Errors are classified by layer. Everything below the coordinator is typed so
//! the coordinator can decide between rollback, provisional success and surfacing.

use std::time::Duration;
use teamseat_core::TeamId;
use teamseat_core::roster::RosterError;
use teamseat_core::store::StoreError;
use thiserror::Error;

/// Why a code use could not be claimed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimError {
    /// No code with that string (or of the requested type)
    #[error("Code not found")]
    CodeNotFound,

    /// The code was disabled by an operator
    #[error("Code is inactive")]
    CodeInactive,

    /// The code passed its expiry
    #[error("Code has expired")]
    CodeExpired,

    /// Every use has been consumed
    #[error("Code has no uses left")]
    CodeExhausted,

    /// Storage failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a seat could not be reserved.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapacityError {
    /// Every candidate Team is full
    #[error("No capacity available")]
    NoCapacityAvailable,

    /// Storage failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors returned to callers of `redeem` / `redeem_direct`.
///
/// The first group are input errors (nothing was mutated), `NoSeatsAvailable` and
/// `DispatchFailed` were fully rolled back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RedeemError {
    // ═══════════════════════════════════════════════════════════
    // Input Errors
    // ═══════════════════════════════════════════════════════════

    /// The email address is malformed.
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    /// Code not found or disabled.
    #[error("Redemption code is invalid")]
    CodeInvalid,

    /// Code passed its expiry.
    #[error("Redemption code has expired")]
    CodeExpired,

    /// Code has no uses left.
    #[error("Redemption code has been fully used")]
    CodeExhausted,

    /// Too many failed attempts for this address.
    #[error("Too many failed attempts, please retry after {retry_after:?}")]
    TooManyAttempts {
        /// Duration to wait before retrying
        retry_after: Duration,
    },

    // ═══════════════════════════════════════════════════════════
    // Capacity / External Errors
    // ═══════════════════════════════════════════════════════════

    /// Every eligible Team is full.
    #[error("All Teams are full, please try again later")]
    NoSeatsAvailable,

    /// The external invite definitely failed.
    #[error("Invite failed: {reason}")]
    DispatchFailed {
        /// External reason, surfaced for operator action
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// Storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// The redemption task ended abnormally.
    #[error("Redemption task aborted: {0}")]
    Aborted(String),
}

impl From<ClaimError> for RedeemError {
    fn from(err: ClaimError) -> Self {
        match err {
            ClaimError::CodeNotFound | ClaimError::CodeInactive => Self::CodeInvalid,
            ClaimError::CodeExpired => Self::CodeExpired,
            ClaimError::CodeExhausted => Self::CodeExhausted,
            ClaimError::Store(e) => Self::Storage(e),
        }
    }
}

/// Errors from issuing new codes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IssueError {
    /// Batch size outside `1..=100`
    #[error("Batch size must be between 1 and {max}, got {requested}")]
    InvalidCount {
        /// Requested batch size
        requested: u32,
        /// Upper bound
        max: u32,
    },

    /// `max_uses` must be at least one
    #[error("Codes must allow at least one use")]
    InvalidMaxUses,

    /// Could not find a free code string
    #[error("Could not generate a unique code after {0} attempts")]
    CollisionLimit(u32),

    /// Storage failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from reconciliation and operator roster actions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The email address is malformed
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    /// Unknown Team
    #[error("Team {0} not found")]
    TeamNotFound(TeamId),

    /// Team is disabled
    #[error("Team {0} is inactive")]
    TeamInactive(TeamId),

    /// The external roster call failed
    #[error("Roster error: {0}")]
    Roster(#[from] RosterError),

    /// Storage failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Invalid configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting has an unusable value
    #[error("Invalid configuration for {key}: {reason}")]
    Invalid {
        /// Setting name
        key: &'static str,
        /// What is wrong
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_errors_collapse_to_caller_facing_variants() {
        assert_eq!(RedeemError::from(ClaimError::CodeNotFound), RedeemError::CodeInvalid);
        assert_eq!(RedeemError::from(ClaimError::CodeInactive), RedeemError::CodeInvalid);
        assert_eq!(RedeemError::from(ClaimError::CodeExpired), RedeemError::CodeExpired);
        assert_eq!(RedeemError::from(ClaimError::CodeExhausted), RedeemError::CodeExhausted);
        assert_eq!(
            RedeemError::from(ClaimError::Store(StoreError::Poisoned)),
            RedeemError::Storage(StoreError::Poisoned)
        );
    }
}
