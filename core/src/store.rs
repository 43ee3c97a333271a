//! Persistence traits.
//!
//! Each trait method that mutates a shared counter is a single atomic
//! check-and-set. Implementations must never split such an operation into a read
//! followed by an unguarded write.
//!
//! Note: Methods return `impl Future + Send` instead of plain `async fn` so callers
//! can move store calls onto spawned tasks.

use crate::ids::{CodeId, InviteId, TeamId};
use crate::model::{
    Email, InviteRecord, InviteStatus, NewCode, NewInvite, RedeemCode, Team, TeamCounts, TeamMember,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Storage failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend (database) error
    #[error("Database error: {0}")]
    Database(String),

    /// A stored value could not be mapped to the domain model
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// An in-memory lock was poisoned by a panicking holder
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Redemption code persistence.
pub trait CodeStore: Send + Sync {
    /// Look up a code by its normalized string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn find_code(&self, code: &str) -> impl Future<Output = StoreResult<Option<RedeemCode>>> + Send;

    /// Atomically consume one use.
    ///
    /// Increments `used_count` only if the code is active, unexpired at `now` and
    /// `used_count < max_uses`, as a single compare-and-increment. Returns the
    /// updated code, or `None` if the guard did not hold.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn try_consume_use(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = StoreResult<Option<RedeemCode>>> + Send;

    /// Give one use back. Never takes `used_count` below zero.
    ///
    /// Returns `false` if the counter was already zero or the code is gone.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn restore_use(&self, id: CodeId) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Insert a code. Returns `None` if the code string is already taken.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn insert_code(&self, code: NewCode) -> impl Future<Output = StoreResult<Option<RedeemCode>>> + Send;

    /// Enable or disable a code. Returns `false` if the code does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn set_code_active(&self, id: CodeId, active: bool) -> impl Future<Output = StoreResult<bool>> + Send;
}

/// Invite record persistence. Records are append-only.
pub trait InviteStore: Send + Sync {
    /// Insert a new `Pending` record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn insert_invite(&self, invite: NewInvite) -> impl Future<Output = StoreResult<InviteRecord>> + Send;

    /// Move a `Pending` record to `status`. Returns `false` if the record was not
    /// `Pending` (transitions happen at most once).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn resolve_invite(
        &self,
        id: InviteId,
        status: InviteStatus,
        reason: Option<String>,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Record external acceptance: sets `accepted_at` if unset and promotes a
    /// `Pending` record to `Success`. `Failed` records are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn mark_accepted(
        &self,
        id: InviteId,
        at: DateTime<Utc>,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Records on `team` that are not `Failed` and not yet accepted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn unresolved_invites(&self, team: TeamId) -> impl Future<Output = StoreResult<Vec<InviteRecord>>> + Send;

    /// Distinct addresses with a non-`Failed` record on `team`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn invited_emails(&self, team: TeamId) -> impl Future<Output = StoreResult<Vec<Email>>> + Send;

    /// Teams holding a non-`Failed` record for `email`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn teams_with_invite(&self, email: &Email) -> impl Future<Output = StoreResult<Vec<TeamId>>> + Send;

    /// Number of `Failed` records for `email` created at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn count_failed_since(
        &self,
        email: &Email,
        since: DateTime<Utc>,
    ) -> impl Future<Output = StoreResult<u64>> + Send;

    /// All records paid for by `code`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn invites_for_code(&self, code: CodeId) -> impl Future<Output = StoreResult<Vec<InviteRecord>>> + Send;
}

/// Team persistence and the cached seat counters.
pub trait TeamStore: Send + Sync {
    /// All Teams, active or not.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn list_teams(&self) -> impl Future<Output = StoreResult<Vec<Team>>> + Send;

    /// One Team.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn get_team(&self, id: TeamId) -> impl Future<Output = StoreResult<Option<Team>>> + Send;

    /// Atomically take one seat: increments `pending_count` (and `counts_version`)
    /// only if the Team is active and `member_count + pending_count < max_seats`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn try_reserve_seat(&self, id: TeamId) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Give one seat back: decrements `pending_count` if it is above zero.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn release_seat(&self, id: TeamId) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Overwrite cached counts if `counts_version` still equals `expected_version`.
    /// Returns `false` (and writes nothing) on a version mismatch.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn apply_counts(
        &self,
        id: TeamId,
        expected_version: u64,
        counts: TeamCounts,
        synced_at: DateTime<Utc>,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Replace the roster snapshot of a Team.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn replace_roster(
        &self,
        id: TeamId,
        members: Vec<TeamMember>,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// The last roster snapshot of a Team.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn roster(&self, id: TeamId) -> impl Future<Output = StoreResult<Vec<TeamMember>>> + Send;

    /// Teams whose last roster snapshot contains `email`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn teams_with_member(&self, email: &Email) -> impl Future<Output = StoreResult<Vec<TeamId>>> + Send;
}

/// Everything the engine persists, in one backend.
pub trait SeatStore: CodeStore + InviteStore + TeamStore + 'static {}

impl<T> SeatStore for T where T: CodeStore + InviteStore + TeamStore + 'static {}
