//! The surface exposed to the surrounding CRUD layer.

use crate::capacity::CapacityTracker;
use crate::config::EngineConfig;
use crate::coordinator::{Redemption, RedemptionCoordinator};
use crate::dispatcher::InviteDispatcher;
use crate::error::{ClaimError, IssueError, RedeemError, SyncError};
use crate::ledger::{CodePreview, IssueCodes, RedemptionLedger};
use crate::reconcile::{ReconciliationJob, SyncSummary, TeamSyncReport};
use std::sync::Arc;
use teamseat_core::environment::Clock;
use teamseat_core::model::{CodeType, Email, InviteRecord, RedeemCode, SeatStats, Team, TeamCounts};
use teamseat_core::roster::{RosterClient, Subscription};
use teamseat_core::store::{SeatStore, StoreResult};
use teamseat_core::{CodeId, TeamId};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Seat allocation engine built from injected store, roster client and clock.
///
/// Cheap to share behind an `Arc`; all request paths take `&self`.
pub struct SeatEngine<S, R> {
    store: Arc<S>,
    client: Arc<R>,
    clock: Arc<dyn Clock>,
    ledger: RedemptionLedger<S>,
    tracker: Arc<CapacityTracker<S>>,
    coordinator: RedemptionCoordinator<S, R>,
    reconciler: Arc<ReconciliationJob<S, R>>,
}

impl<S: SeatStore, R: RosterClient> SeatEngine<S, R> {
    /// Wire the engine together.
    #[must_use]
    pub fn new(store: Arc<S>, client: Arc<R>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let tracker = Arc::new(CapacityTracker::new(Arc::clone(&store)));
        let dispatcher = InviteDispatcher::new(Arc::clone(&client), config.dispatch);
        let coordinator = RedemptionCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&tracker),
            dispatcher,
            Arc::clone(&clock),
            config.redeem,
        );
        let reconciler = Arc::new(ReconciliationJob::new(
            Arc::clone(&store),
            Arc::clone(&client),
            Arc::clone(&tracker),
            Arc::clone(&clock),
            config.sync,
        ));

        Self {
            ledger: RedemptionLedger::new(Arc::clone(&store)),
            store,
            client,
            clock,
            tracker,
            coordinator,
            reconciler,
        }
    }

    // ═══════════════════════════════════════════════════════════
    // Redemption
    // ═══════════════════════════════════════════════════════════

    /// Redeem a code for an email address.
    ///
    /// # Errors
    ///
    /// See [`RedeemError`].
    pub async fn redeem(&self, code: &str, email: &str) -> Result<Redemption, RedeemError> {
        self.coordinator.redeem(code, email).await
    }

    /// Redeem a direct-link code; no sign-in is required upstream.
    ///
    /// # Errors
    ///
    /// See [`RedeemError`].
    pub async fn redeem_direct(&self, code: &str, email: &str) -> Result<Redemption, RedeemError> {
        self.coordinator.redeem_direct(code, email).await
    }

    /// Preview a code without consuming it.
    ///
    /// # Errors
    ///
    /// Returns the [`ClaimError`] a redemption would fail with.
    pub async fn inspect_code(&self, code: &str, kind: Option<CodeType>) -> Result<CodePreview, ClaimError> {
        self.ledger.inspect(code, kind, self.clock.now()).await
    }

    // ═══════════════════════════════════════════════════════════
    // Reconciliation
    // ═══════════════════════════════════════════════════════════

    /// Reconcile one Team now.
    ///
    /// # Errors
    ///
    /// See [`SyncError`].
    pub async fn sync_team(&self, team_id: TeamId) -> Result<TeamCounts, SyncError> {
        Ok(self.reconciler.sync_team(team_id).await?.counts)
    }

    /// Reconcile one Team now, with the full report.
    ///
    /// # Errors
    ///
    /// See [`SyncError`].
    pub async fn sync_team_report(&self, team_id: TeamId) -> Result<TeamSyncReport, SyncError> {
        self.reconciler.sync_team(team_id).await
    }

    /// Reconcile every active Team.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if the Team list cannot be read.
    pub async fn sync_all(&self) -> Result<SyncSummary, SyncError> {
        self.reconciler.sync_all().await
    }

    /// Start the periodic sweep. It stops when `shutdown` turns `true`.
    pub fn start_reconciliation(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        Arc::clone(&self.reconciler).spawn_periodic(shutdown)
    }

    // ═══════════════════════════════════════════════════════════
    // Operator actions
    // ═══════════════════════════════════════════════════════════

    /// Cancel a pending external invite, then re-sync the Team.
    ///
    /// # Errors
    ///
    /// See [`SyncError`].
    pub async fn cancel_invite(&self, team_id: TeamId, email: &str) -> Result<TeamSyncReport, SyncError> {
        let email = Email::parse(email).map_err(|e| SyncError::InvalidEmail(e.0))?;
        let team = self.active_team(team_id).await?;

        self.client.cancel_invite(&team, &email).await?;
        tracing::info!(team_id = %team_id, email = %email, "Invite cancelled");

        self.reconciler.sync_team(team_id).await
    }

    /// Remove a member from a Team, then re-sync the Team.
    ///
    /// # Errors
    ///
    /// See [`SyncError`].
    pub async fn remove_member(
        &self,
        team_id: TeamId,
        external_user_id: &str,
    ) -> Result<TeamSyncReport, SyncError> {
        let team = self.active_team(team_id).await?;

        self.client.remove_member(&team, external_user_id).await?;
        tracing::info!(team_id = %team_id, external_user_id, "Member removed");

        self.reconciler.sync_team(team_id).await
    }

    /// External subscription details. Informational only.
    ///
    /// # Errors
    ///
    /// See [`SyncError`].
    pub async fn subscription(&self, team_id: TeamId) -> Result<Subscription, SyncError> {
        let team = self.active_team(team_id).await?;
        Ok(self.client.subscription(&team).await?)
    }

    // ═══════════════════════════════════════════════════════════
    // Code administration
    // ═══════════════════════════════════════════════════════════

    /// Generate a batch of codes.
    ///
    /// # Errors
    ///
    /// See [`IssueError`].
    pub async fn issue_codes(&self, request: IssueCodes) -> Result<Vec<RedeemCode>, IssueError> {
        self.ledger.issue_codes(request, self.clock.now()).await
    }

    /// Enable or disable a code.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](teamseat_core::store::StoreError) if the write fails.
    pub async fn set_code_active(&self, id: CodeId, active: bool) -> StoreResult<bool> {
        self.ledger.set_active(id, active).await
    }

    /// Invite records paid for by a code, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](teamseat_core::store::StoreError) if the read fails.
    pub async fn records_for_code(&self, id: CodeId) -> StoreResult<Vec<InviteRecord>> {
        self.ledger.records_for_code(id).await
    }

    /// Seat statistics over active Teams.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](teamseat_core::store::StoreError) if the read fails.
    pub async fn seat_stats(&self) -> StoreResult<SeatStats> {
        self.tracker.seat_stats().await
    }

    async fn active_team(&self, team_id: TeamId) -> Result<Team, SyncError> {
        let team = self
            .store
            .get_team(team_id)
            .await?
            .ok_or(SyncError::TeamNotFound(team_id))?;
        if team.is_active {
            Ok(team)
        } else {
            Err(SyncError::TeamInactive(team_id))
        }
    }
}
