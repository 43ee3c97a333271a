//! External roster client.
//!
//! The roster client talks to the third-party Team product. It is an external
//! collaborator: the engine only consumes this trait. Every call is network-bound,
//! may fail or time out, and reflects state that can lag the real external status.

use crate::model::{Email, Team};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

/// Result type alias for roster operations.
pub type RosterResult<T> = std::result::Result<T, RosterError>;

/// Failure modes of the external Team API.
///
/// The variants are split so the dispatcher can tell definite failures from
/// failures whose external side effect is unknown.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RosterError {
    /// The request was never transmitted (connection refused or reset before any
    /// request bytes were written). Safe to retry.
    #[error("Request not sent: {0}")]
    NotSent(String),

    /// No response within the deadline; the request may have been processed.
    #[error("Request timed out")]
    Timeout,

    /// Team credentials were rejected.
    #[error("Team credentials rejected")]
    Unauthorized,

    /// The address is already a member of the Team.
    #[error("Email is already a member")]
    AlreadyMember,

    /// The external subscription has no seats left on its own entitlement.
    #[error("External seat entitlement reached")]
    SeatLimitReached,

    /// The external API answered with a client error.
    #[error("Request rejected ({status}): {message}")]
    Rejected {
        /// HTTP-like status code
        status: u16,
        /// Error body excerpt
        message: String,
    },

    /// Transport failure after the request may have been sent (5xx, reset mid-body).
    #[error("Transport error: {0}")]
    Transport(String),
}

/// A member as reported by the external API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterMember {
    /// Member address
    pub email: Email,
    /// External role
    pub role: String,
    /// External user id
    pub external_user_id: String,
    /// Join time, when reported
    pub joined_at: Option<DateTime<Utc>>,
}

/// A sent but unaccepted invite as reported by the external API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterInvite {
    /// Invited address
    pub email: Email,
    /// When the invite was created externally
    pub created_at: Option<DateTime<Utc>>,
}

/// Subscription entitlement. Informational only; admission uses `Team::max_seats`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Seats the external plan entitles
    pub seats_entitled: u32,
    /// Seats the external side counts as used
    pub seats_in_use: u32,
    /// Subscription end
    pub active_until: Option<DateTime<Utc>>,
}

/// External Team API.
///
/// Implementations authenticate with `team.credentials` and address the Team by
/// `team.account_id`.
pub trait RosterClient: Send + Sync + 'static {
    /// List current members.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError`] if the external call fails.
    fn list_members(
        &self,
        team: &Team,
    ) -> impl Future<Output = RosterResult<Vec<RosterMember>>> + Send;

    /// List pending (sent, unaccepted) invites.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError`] if the external call fails.
    fn list_pending_invites(
        &self,
        team: &Team,
    ) -> impl Future<Output = RosterResult<Vec<RosterInvite>>> + Send;

    /// Send one invite.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError`]; see its variants for which failures are definite.
    fn send_invite(
        &self,
        team: &Team,
        email: &Email,
    ) -> impl Future<Output = RosterResult<()>> + Send;

    /// Cancel a pending invite.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError`] if the external call fails.
    fn cancel_invite(
        &self,
        team: &Team,
        email: &Email,
    ) -> impl Future<Output = RosterResult<()>> + Send;

    /// Remove a member.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError`] if the external call fails.
    fn remove_member(
        &self,
        team: &Team,
        external_user_id: &str,
    ) -> impl Future<Output = RosterResult<()>> + Send;

    /// Report the external subscription.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError`] if the external call fails.
    fn subscription(&self, team: &Team) -> impl Future<Output = RosterResult<Subscription>> + Send;
}
