//! Redemption coordinator.
//!
//! A redemption walks a small state machine:
//!
//! ```text
//! Validating → SelectingTeam → Reserved → Dispatching → Committed
//!     │              │             │            │
//!     └─► Rejected   └─► RolledBack ┴────────────┴─► RolledBack
//! ```
//!
//! Transitions are a pure function ([`RedemptionPhase::advance`]); the coordinator
//! is the imperative shell that performs the side effect for each step. The body
//! of every redemption runs on its own task, so a caller that stops waiting
//! cannot abandon a claimed code or a reserved seat halfway.

use crate::capacity::CapacityTracker;
use crate::config::RedeemConfig;
use crate::dispatcher::{DispatchOutcome, InviteDispatcher};
use crate::error::{CapacityError, RedeemError};
use crate::ledger::{ClaimToken, CommitOutcome, RedemptionLedger};
use crate::metrics::RedemptionMetrics;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use teamseat_core::environment::Clock;
use teamseat_core::model::{CodeType, Email, InviteRecord, InviteStatus};
use teamseat_core::roster::RosterClient;
use teamseat_core::store::SeatStore;
use teamseat_core::{GroupId, InviteId, TeamId};
use tracing::Instrument;

/// Where a redemption is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedemptionPhase {
    /// Checking input and claiming the code
    Validating,
    /// Looking for a Team with room
    SelectingTeam,
    /// A seat is held; the invite record is being written
    Reserved,
    /// The external invite is in progress
    Dispatching,
    /// Terminal: the seat and code use are kept
    Committed,
    /// Terminal: everything claimed was given back
    RolledBack,
    /// Terminal: input was refused before anything changed
    Rejected,
}

/// What just happened to a redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedemptionStep {
    /// Input, throttle or claim refused
    Refused,
    /// A code use was claimed
    CodeClaimed,
    /// A seat was reserved
    SeatReserved,
    /// The invite record was written
    AttemptOpened,
    /// The external side confirmed the invite, or may have created it
    Delivered,
    /// Something after the claim failed; claims were given back
    Failed,
}

impl RedemptionPhase {
    /// The phase after `step`, or `None` if `step` cannot happen in this phase.
    #[must_use]
    pub const fn advance(self, step: RedemptionStep) -> Option<Self> {
        use RedemptionPhase as P;
        use RedemptionStep as S;

        match (self, step) {
            (P::Validating, S::Refused) => Some(P::Rejected),
            (P::Validating, S::CodeClaimed) => Some(P::SelectingTeam),
            (P::SelectingTeam, S::SeatReserved) => Some(P::Reserved),
            (P::Reserved, S::AttemptOpened) => Some(P::Dispatching),
            (P::Dispatching, S::Delivered) => Some(P::Committed),
            (P::SelectingTeam | P::Reserved | P::Dispatching, S::Failed) => Some(P::RolledBack),
            _ => None,
        }
    }

    /// Whether the redemption is over.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Rejected)
    }
}

/// A successful (or provisionally successful) redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redemption {
    /// Team the invite was sent from
    pub team_id: TeamId,
    /// Team display name
    pub team_name: String,
    /// Durable invite record
    pub invite_id: InviteId,
    /// `Success`, or `Pending` when the external outcome is not yet known
    pub status: InviteStatus,
}

/// Tracks the phase of one redemption and logs every transition.
struct Progress {
    phase: RedemptionPhase,
}

impl Progress {
    const fn new() -> Self {
        Self {
            phase: RedemptionPhase::Validating,
        }
    }

    fn step(&mut self, step: RedemptionStep) {
        match self.phase.advance(step) {
            Some(next) => {
                tracing::debug!(from = ?self.phase, to = ?next, ?step, "Redemption transition");
                self.phase = next;
            }
            None => {
                tracing::error!(phase = ?self.phase, ?step, "Illegal redemption transition");
            }
        }
    }
}

/// Orchestrates ledger, tracker and dispatcher for each redemption.
pub struct RedemptionCoordinator<S, R> {
    inner: Arc<Inner<S, R>>,
}

impl<S, R> Clone for RedemptionCoordinator<S, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S, R> {
    store: Arc<S>,
    ledger: RedemptionLedger<S>,
    tracker: Arc<CapacityTracker<S>>,
    dispatcher: InviteDispatcher<R>,
    clock: Arc<dyn Clock>,
    config: RedeemConfig,
}

impl<S: SeatStore, R: RosterClient> RedemptionCoordinator<S, R> {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        tracker: Arc<CapacityTracker<S>>,
        dispatcher: InviteDispatcher<R>,
        clock: Arc<dyn Clock>,
        config: RedeemConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger: RedemptionLedger::new(Arc::clone(&store)),
                store,
                tracker,
                dispatcher,
                clock,
                config,
            }),
        }
    }

    /// Redeem `code` (of any type) for `email`.
    ///
    /// # Errors
    ///
    /// Returns [`RedeemError`]; every error leaves the code use and seat counters
    /// as they were before the call.
    #[tracing::instrument(skip_all, fields(code = %code.trim()))]
    pub async fn redeem(&self, code: &str, email: &str) -> Result<Redemption, RedeemError> {
        self.spawn(code, email, None).await
    }

    /// Redeem a direct-link `code` for `email`. Only `Direct` codes are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`RedeemError`] as [`redeem`](Self::redeem) does.
    #[tracing::instrument(skip_all, fields(code = %code.trim()))]
    pub async fn redeem_direct(&self, code: &str, email: &str) -> Result<Redemption, RedeemError> {
        self.spawn(code, email, Some(CodeType::Direct)).await
    }

    async fn spawn(
        &self,
        code: &str,
        email: &str,
        kind: Option<CodeType>,
    ) -> Result<Redemption, RedeemError> {
        let inner = Arc::clone(&self.inner);
        let code = code.to_string();
        let email = email.to_string();

        tokio::spawn(async move { inner.run(&code, &email, kind).await }.in_current_span())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Redemption task failed");
                RedeemError::Aborted(e.to_string())
            })?
    }
}

impl<S: SeatStore, R: RosterClient> Inner<S, R> {
    async fn run(
        &self,
        raw_code: &str,
        raw_email: &str,
        kind: Option<CodeType>,
    ) -> Result<Redemption, RedeemError> {
        let mut progress = Progress::new();

        let result = self.execute(&mut progress, raw_code, raw_email, kind).await;

        let outcome = match (&result, progress.phase) {
            (Ok(r), _) if r.status == InviteStatus::Pending => "provisional",
            (Ok(_), _) => "committed",
            (Err(_), RedemptionPhase::Rejected) => "rejected",
            (Err(_), _) => "rolled_back",
        };
        RedemptionMetrics::record_outcome(outcome);

        result
    }

    async fn execute(
        &self,
        progress: &mut Progress,
        raw_code: &str,
        raw_email: &str,
        kind: Option<CodeType>,
    ) -> Result<Redemption, RedeemError> {
        let now = self.clock.now();

        // ── Validating ──
        let (token, email) = match self.validate(raw_code, raw_email, kind, now).await {
            Ok(claimed) => {
                progress.step(RedemptionStep::CodeClaimed);
                claimed
            }
            Err(e) => {
                progress.step(RedemptionStep::Refused);
                tracing::info!(error = %e, "Redemption refused");
                return Err(e);
            }
        };

        // ── SelectingTeam ──
        let group = self.resolve_group(&token);
        let candidates = match self.tracker.candidates(group, &email).await {
            Ok(candidates) => candidates,
            Err(e) => {
                progress.step(RedemptionStep::Failed);
                self.give_back(token, None, "storage error").await;
                return Err(e.into());
            }
        };

        let (team, reservation) = match self.tracker.select_and_reserve(&candidates, &email).await {
            Ok(reserved) => {
                progress.step(RedemptionStep::SeatReserved);
                reserved
            }
            Err(e) => {
                progress.step(RedemptionStep::Failed);
                let reason = e.to_string();
                self.give_back(token, None, &reason).await;
                return Err(match e {
                    CapacityError::NoCapacityAvailable => {
                        tracing::warn!(candidates = candidates.len(), group = ?group, "No seats available");
                        RedeemError::NoSeatsAvailable
                    }
                    CapacityError::Store(e) => RedeemError::Storage(e),
                });
            }
        };

        // ── Reserved ──
        let record = match self.ledger.open_attempt(&token, team.id, &email, now).await {
            Ok(record) => {
                progress.step(RedemptionStep::AttemptOpened);
                record
            }
            Err(e) => {
                progress.step(RedemptionStep::Failed);
                if let Err(release_err) = self.tracker.release(reservation).await {
                    tracing::error!(team_id = %team.id, error = %release_err, "Failed to release seat");
                }
                self.give_back(token, None, "storage error").await;
                return Err(e.into());
            }
        };

        // ── Dispatching ──
        match self.dispatcher.invite(&team, &email).await {
            DispatchOutcome::Success => {
                self.tracker.confirm(reservation);
                progress.step(RedemptionStep::Delivered);
                let status = self.commit(token, &record, CommitOutcome::Sent).await;
                tracing::info!(team_id = %team.id, invite_id = %record.id, "Redemption committed");
                Ok(Redemption {
                    team_id: team.id,
                    team_name: team.name,
                    invite_id: record.id,
                    status,
                })
            }
            DispatchOutcome::AmbiguousFailure(reason) => {
                // The invite may exist externally: keep the seat and the use,
                // reconciliation settles the record
                self.tracker.confirm(reservation);
                progress.step(RedemptionStep::Delivered);
                let status = self.commit(token, &record, CommitOutcome::Unconfirmed).await;
                tracing::warn!(
                    team_id = %team.id,
                    invite_id = %record.id,
                    reason = %reason,
                    "Invite outcome unknown, keeping seat pending"
                );
                Ok(Redemption {
                    team_id: team.id,
                    team_name: team.name,
                    invite_id: record.id,
                    status,
                })
            }
            DispatchOutcome::DefiniteFailure(reason) => {
                progress.step(RedemptionStep::Failed);
                if let Err(e) = self.tracker.release(reservation).await {
                    tracing::error!(team_id = %team.id, error = %e, "Failed to release seat");
                }
                self.give_back(token, Some(&record), &reason).await;
                tracing::warn!(team_id = %team.id, invite_id = %record.id, reason = %reason, "Redemption rolled back");
                Err(RedeemError::DispatchFailed { reason })
            }
        }
    }

    /// Check input, apply the failure throttle and claim the code.
    async fn validate(
        &self,
        raw_code: &str,
        raw_email: &str,
        kind: Option<CodeType>,
        now: DateTime<Utc>,
    ) -> Result<(ClaimToken, Email), RedeemError> {
        let email = Email::parse(raw_email).map_err(|e| RedeemError::InvalidEmail(e.0))?;

        self.check_throttle(&email, now).await?;

        let token = match kind {
            Some(kind) => self.ledger.claim_kind(raw_code, kind, now).await?,
            None => self.ledger.claim(raw_code, now).await?,
        };
        Ok((token, email))
    }

    async fn check_throttle(&self, email: &Email, now: DateTime<Utc>) -> Result<(), RedeemError> {
        let limit = self.config.max_recent_failures;
        if limit == 0 {
            return Ok(());
        }

        let window = TimeDelta::from_std(self.config.failure_window).unwrap_or(TimeDelta::MAX);
        let since = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);

        if self.store.count_failed_since(email, since).await? >= u64::from(limit) {
            return Err(RedeemError::TooManyAttempts {
                retry_after: self.config.failure_window,
            });
        }
        Ok(())
    }

    /// The code's group, or the configured default for ungrouped shared codes.
    fn resolve_group(&self, token: &ClaimToken) -> Option<GroupId> {
        token.group_id().or(match token.code_type() {
            CodeType::Shared => self.config.shared_default_group,
            CodeType::Direct => None,
        })
    }

    /// Commit a use. A failed status write leaves the record `Pending` for
    /// reconciliation, so the caller sees a provisional result.
    async fn commit(&self, token: ClaimToken, record: &InviteRecord, outcome: CommitOutcome) -> InviteStatus {
        match self.ledger.commit(token, record, outcome).await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(invite_id = %record.id, error = %e, "Failed to record invite outcome");
                InviteStatus::Pending
            }
        }
    }

    /// Release a claimed use; failures are logged, the original error wins.
    async fn give_back(&self, token: ClaimToken, record: Option<&InviteRecord>, reason: &str) {
        let code = token.code().to_string();
        if let Err(e) = self.ledger.release(token, record, reason).await {
            tracing::error!(code = %code, error = %e, "Failed to release code use");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{DispatchConfig, EngineConfig};
    use crate::memory::MemoryStore;
    use std::time::Duration;
    use teamseat_core::roster::RosterError;
    use teamseat_core::store::{CodeStore, TeamStore};
    use teamseat_testing::{FakeRoster, InviteScript, TeamFixture, code_fixture, test_clock};

    struct Harness {
        store: Arc<MemoryStore>,
        roster: Arc<FakeRoster>,
        coordinator: RedemptionCoordinator<MemoryStore, FakeRoster>,
    }

    fn harness(config: RedeemConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let roster = Arc::new(FakeRoster::new());
        let tracker = Arc::new(CapacityTracker::new(Arc::clone(&store)));
        let dispatcher = InviteDispatcher::new(
            Arc::clone(&roster),
            DispatchConfig {
                invite_timeout: Duration::from_millis(50),
                retry_delay: Duration::from_millis(1),
            },
        );
        let coordinator = RedemptionCoordinator::new(
            Arc::clone(&store),
            tracker,
            dispatcher,
            Arc::new(test_clock()),
            config,
        );
        Harness { store, roster, coordinator }
    }

    fn default_config() -> RedeemConfig {
        EngineConfig::default().redeem
    }

    #[test]
    fn transitions() {
        use RedemptionPhase as P;
        use RedemptionStep as S;

        assert_eq!(P::Validating.advance(S::CodeClaimed), Some(P::SelectingTeam));
        assert_eq!(P::Validating.advance(S::Refused), Some(P::Rejected));
        assert_eq!(P::SelectingTeam.advance(S::SeatReserved), Some(P::Reserved));
        assert_eq!(P::Reserved.advance(S::AttemptOpened), Some(P::Dispatching));
        assert_eq!(P::Dispatching.advance(S::Delivered), Some(P::Committed));
        assert_eq!(P::Dispatching.advance(S::Failed), Some(P::RolledBack));
        assert_eq!(P::Validating.advance(S::Failed), None);
        assert_eq!(P::Committed.advance(S::Failed), None);
        assert!(P::Rejected.is_terminal());
        assert!(!P::Dispatching.is_terminal());
    }

    #[tokio::test]
    async fn redeem_commits_on_success() {
        let h = harness(default_config());
        h.store.insert_team(TeamFixture::new(1).name("Alpha").max_seats(5).build()).unwrap();
        h.store.insert_code(code_fixture("ABC123", 1)).await.unwrap();

        let redemption = h.coordinator.redeem("abc123", "User@Example.com").await.unwrap();
        assert_eq!(redemption.team_name, "Alpha");
        assert_eq!(redemption.status, InviteStatus::Success);

        let team = h.store.get_team(TeamId::new(1)).await.unwrap().unwrap();
        assert_eq!(team.counts.pending_count, 1);
        assert_eq!(h.roster.pending(&team.account_id).len(), 1);
    }

    #[tokio::test]
    async fn invalid_email_changes_nothing() {
        let h = harness(default_config());
        h.store.insert_code(code_fixture("ABC123", 1)).await.unwrap();

        let err = h.coordinator.redeem("ABC123", "not-an-email").await.unwrap_err();
        assert!(matches!(err, RedeemError::InvalidEmail(_)));
        assert_eq!(h.store.find_code("ABC123").await.unwrap().unwrap().used_count, 0);
    }

    #[tokio::test]
    async fn no_seats_releases_the_claim() {
        let h = harness(default_config());
        h.store.insert_team(TeamFixture::new(1).max_seats(1).counts(1, 0).build()).unwrap();
        h.store.insert_code(code_fixture("FULL", 2)).await.unwrap();

        let err = h.coordinator.redeem("FULL", "a@b.io").await.unwrap_err();
        assert_eq!(err, RedeemError::NoSeatsAvailable);
        assert_eq!(h.store.find_code("FULL").await.unwrap().unwrap().used_count, 0);
    }

    #[tokio::test]
    async fn direct_redemption_refuses_shared_codes() {
        let h = harness(default_config());
        h.store.insert_team(TeamFixture::new(1).build()).unwrap();
        h.store.insert_code(code_fixture("SHARED", 1)).await.unwrap();

        let err = h.coordinator.redeem_direct("SHARED", "a@b.io").await.unwrap_err();
        assert_eq!(err, RedeemError::CodeInvalid);
    }

    #[tokio::test]
    async fn ungrouped_shared_codes_use_the_default_group() {
        let group = GroupId::new(3);
        let h = harness(RedeemConfig {
            shared_default_group: Some(group),
            ..default_config()
        });
        h.store.insert_team(TeamFixture::new(1).build()).unwrap();
        h.store.insert_team(TeamFixture::new(2).group(group).counts(3, 0).build()).unwrap();
        h.store.insert_code(code_fixture("GROUPED", 1)).await.unwrap();

        let redemption = h.coordinator.redeem("GROUPED", "a@b.io").await.unwrap();
        assert_eq!(redemption.team_id, TeamId::new(2));
    }

    #[tokio::test]
    async fn repeated_failures_are_throttled() {
        let h = harness(RedeemConfig {
            max_recent_failures: 2,
            ..default_config()
        });
        h.store.insert_team(TeamFixture::new(1).build()).unwrap();
        h.store.insert_code(code_fixture("RETRY", 10)).await.unwrap();
        h.roster.set_default(InviteScript::Fail(RosterError::Unauthorized));

        for _ in 0..2 {
            let err = h.coordinator.redeem("RETRY", "a@b.io").await.unwrap_err();
            assert!(matches!(err, RedeemError::DispatchFailed { .. }));
        }
        let err = h.coordinator.redeem("RETRY", "a@b.io").await.unwrap_err();
        assert!(matches!(err, RedeemError::TooManyAttempts { .. }));
        assert_eq!(h.roster.send_calls(), 2);
        assert_eq!(h.store.find_code("RETRY").await.unwrap().unwrap().used_count, 0);
    }

    #[tokio::test]
    async fn already_invited_email_skips_that_team() {
        let h = harness(default_config());
        h.store.insert_team(TeamFixture::new(1).build()).unwrap();
        h.store.insert_team(TeamFixture::new(2).build()).unwrap();
        h.store.insert_code(code_fixture("TWICE", 2)).await.unwrap();

        let first = h.coordinator.redeem("TWICE", "a@b.io").await.unwrap();
        let second = h.coordinator.redeem("TWICE", "a@b.io").await.unwrap();
        assert_ne!(first.team_id, second.team_id);
    }
}
