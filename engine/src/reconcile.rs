//! Reconciliation of local seat state with the external roster.
//!
//! External membership is ground truth. Local pending seats are only given back
//! when a record is absent from both external lists past the grace period, and a
//! counts write never lands on top of a reservation made after the snapshot.

use crate::capacity::{CapacityTracker, ReconcileWrite};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::metrics::ReconcileMetrics;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use teamseat_core::TeamId;
use teamseat_core::environment::Clock;
use teamseat_core::model::{Email, InviteStatus, Team, TeamCounts, TeamMember};
use teamseat_core::roster::{RosterClient, RosterError, RosterMember, RosterResult};
use teamseat_core::store::SeatStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};

/// Failure reason written on records the external side dropped.
pub const DROPPED_REASON: &str = "Invite not found externally after grace period";

/// Roles never flagged as unauthorized.
const PRIVILEGED_ROLES: [&str; 2] = ["owner", "admin"];

/// Result of reconciling one Team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSyncReport {
    /// Team
    pub team_id: TeamId,
    /// Counts after the sync
    pub counts: TeamCounts,
    /// Records newly observed as accepted
    pub accepted: usize,
    /// Records failed because the external side dropped them
    pub dropped: usize,
    /// Members not invited through the engine
    pub unauthorized: usize,
    /// The counts write was skipped because a reservation raced the sync
    pub stale: bool,
}

/// Result of a sweep over every active Team.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Teams reconciled
    pub teams_synced: usize,
    /// Teams whose reconciliation failed
    pub teams_failed: usize,
    /// Members over all reconciled Teams
    pub total_members: u64,
}

/// Reconciles Teams against a [`RosterClient`].
pub struct ReconciliationJob<S, R> {
    store: Arc<S>,
    client: Arc<R>,
    tracker: Arc<CapacityTracker<S>>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
}

impl<S: SeatStore, R: RosterClient> ReconciliationJob<S, R> {
    /// Create a job.
    ///
    /// `tracker` must be the one the coordinator reserves through, so in-flight
    /// reservations are visible here.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        client: Arc<R>,
        tracker: Arc<CapacityTracker<S>>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            client,
            tracker,
            clock,
            config,
        }
    }

    /// Reconcile one Team.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the Team is unknown or inactive, an external listing
    /// fails, or storage fails. Records already transitioned stay transitioned.
    #[tracing::instrument(skip_all, fields(team_id = %team_id))]
    pub async fn sync_team(&self, team_id: TeamId) -> Result<TeamSyncReport, SyncError> {
        let team = self
            .store
            .get_team(team_id)
            .await?
            .ok_or(SyncError::TeamNotFound(team_id))?;
        if !team.is_active {
            return Err(SyncError::TeamInactive(team_id));
        }

        let report = self.reconcile(&team).await;
        ReconcileMetrics::record_team(if report.is_ok() { "synced" } else { "failed" });
        report
    }

    async fn reconcile(&self, team: &Team) -> Result<TeamSyncReport, SyncError> {
        let members = dedupe_members(self.bounded(self.client.list_members(team)).await?);
        let pending: HashSet<Email> = self
            .bounded(self.client.list_pending_invites(team))
            .await?
            .into_iter()
            .map(|invite| invite.email)
            .filter(|email| !members.contains_key(email))
            .collect();

        let now = self.clock.now();
        let grace = TimeDelta::from_std(self.config.grace_period).unwrap_or(TimeDelta::MAX);

        // Snapshot before scanning records; see CapacityTracker::snapshot
        let snapshot = self
            .tracker
            .snapshot(team.id)
            .await?
            .ok_or(SyncError::TeamNotFound(team.id))?;

        let mut accepted = 0;
        let mut dropped = 0;
        let mut local_unresolved: u32 = 0;

        for record in self.store.unresolved_invites(team.id).await? {
            if members.contains_key(&record.email) {
                if self.store.mark_accepted(record.id, now).await? {
                    accepted += 1;
                    tracing::info!(invite_id = %record.id, "Invite accepted");
                }
            } else if pending.contains(&record.email) || within(record.created_at, now, grace) {
                local_unresolved = local_unresolved.saturating_add(1);
            } else if record.status == InviteStatus::Pending {
                if self
                    .store
                    .resolve_invite(record.id, InviteStatus::Failed, Some(DROPPED_REASON.to_string()))
                    .await?
                {
                    dropped += 1;
                    tracing::warn!(invite_id = %record.id, "Pending invite dropped externally");
                }
            } else {
                // Sent invite that expired or was revoked externally; it no longer holds a seat
                tracing::debug!(invite_id = %record.id, "Sent invite no longer visible externally");
            }
        }

        let write = self
            .tracker
            .reconcile_counts(
                &snapshot,
                count(members.len()),
                count(pending.len()),
                local_unresolved,
                now,
            )
            .await?;

        let (counts, stale) = match write {
            ReconcileWrite::Applied(counts) => {
                if counts != snapshot.team.counts {
                    tracing::info!(
                        before_members = snapshot.team.counts.member_count,
                        before_pending = snapshot.team.counts.pending_count,
                        members = counts.member_count,
                        pending = counts.pending_count,
                        "Team counts corrected"
                    );
                    ReconcileMetrics::record_drift();
                }
                (counts, false)
            }
            ReconcileWrite::Stale => {
                tracing::warn!(
                    snapshot_version = snapshot.version(),
                    dropped,
                    "Team counters moved during sync, keeping local counts"
                );
                for _ in 0..dropped {
                    self.tracker.release_dropped(team.id).await?;
                }
                let current = self
                    .store
                    .get_team(team.id)
                    .await?
                    .map_or(snapshot.team.counts, |t| t.counts);
                (current, true)
            }
        };

        let unauthorized = self.replace_roster(team, members, now).await?;

        ReconcileMetrics::record_transitions("accepted", accepted);
        ReconcileMetrics::record_transitions("dropped", dropped);

        tracing::info!(
            members = counts.member_count,
            pending = counts.pending_count,
            accepted,
            dropped,
            unauthorized,
            stale,
            "Team synced"
        );

        Ok(TeamSyncReport {
            team_id: team.id,
            counts,
            accepted,
            dropped,
            unauthorized,
            stale,
        })
    }

    /// Store the roster snapshot, flagging members nobody invited.
    async fn replace_roster(
        &self,
        team: &Team,
        members: BTreeMap<Email, RosterMember>,
        now: DateTime<Utc>,
    ) -> Result<usize, SyncError> {
        let invited: HashSet<Email> = self.store.invited_emails(team.id).await?.into_iter().collect();

        let snapshot: Vec<TeamMember> = members
            .into_values()
            .map(|m| {
                let is_unauthorized = !invited.contains(&m.email)
                    && !PRIVILEGED_ROLES.contains(&m.role.to_lowercase().as_str())
                    && !self.config.exempt_emails.iter().any(|e| e == m.email.as_str());
                if is_unauthorized {
                    tracing::warn!(team_id = %team.id, email = %m.email, role = %m.role, "Unauthorized member");
                }
                TeamMember {
                    team_id: team.id,
                    email: m.email,
                    role: m.role,
                    external_user_id: m.external_user_id,
                    joined_at: m.joined_at,
                    is_unauthorized,
                    synced_at: now,
                }
            })
            .collect();

        let unauthorized = snapshot.iter().filter(|m| m.is_unauthorized).count();
        ReconcileMetrics::record_unauthorized(team.id.get(), unauthorized);

        self.store.replace_roster(team.id, snapshot).await?;
        Ok(unauthorized)
    }

    /// Reconcile every active Team. One failing Team does not stop the sweep.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] only if the Team list cannot be read.
    pub async fn sync_all(&self) -> Result<SyncSummary, SyncError> {
        let teams: Vec<Team> = self
            .store
            .list_teams()
            .await?
            .into_iter()
            .filter(|t| t.is_active)
            .collect();

        let mut summary = SyncSummary::default();

        for (i, team) in teams.iter().enumerate() {
            if i > 0 && !self.config.team_spacing.is_zero() {
                sleep(self.config.team_spacing).await;
            }

            match self.sync_team(team.id).await {
                Ok(report) => {
                    summary.teams_synced += 1;
                    summary.total_members += u64::from(report.counts.member_count);
                }
                Err(e) => {
                    summary.teams_failed += 1;
                    tracing::warn!(team_id = %team.id, error = %e, "Team sync failed");
                }
            }
        }

        tracing::info!(
            teams_synced = summary.teams_synced,
            teams_failed = summary.teams_failed,
            total_members = summary.total_members,
            "Sync sweep finished"
        );
        Ok(summary)
    }

    /// Run [`sync_all`](Self::sync_all) every `interval` until `shutdown` becomes
    /// `true` or its sender is dropped.
    pub fn spawn_periodic(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(interval_secs = self.config.interval.as_secs(), "Reconciliation started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sync_all().await {
                            tracing::error!(error = %e, "Sync sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Reconciliation stopped");
        })
    }

    async fn bounded<T>(&self, call: impl Future<Output = RosterResult<T>>) -> Result<T, SyncError> {
        timeout(self.config.roster_timeout, call)
            .await
            .map_err(|_| RosterError::Timeout)?
            .map_err(SyncError::from)
    }
}

/// Members keyed by address; the first entry of a duplicated address wins.
fn dedupe_members(members: Vec<RosterMember>) -> BTreeMap<Email, RosterMember> {
    let mut seen = BTreeMap::new();
    for member in members {
        seen.entry(member.email.clone()).or_insert(member);
    }
    seen
}

fn within(created_at: DateTime<Utc>, now: DateTime<Utc>, grace: TimeDelta) -> bool {
    now.signed_duration_since(created_at) < grace
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use std::time::Duration;
    use teamseat_core::model::NewInvite;
    use teamseat_core::store::{InviteStore, TeamStore};
    use teamseat_testing::{FakeRoster, ManualClock, TeamFixture};

    struct Harness {
        store: Arc<MemoryStore>,
        roster: Arc<FakeRoster>,
        clock: Arc<ManualClock>,
        job: ReconciliationJob<MemoryStore, FakeRoster>,
        team: Team,
    }

    fn harness(team: Team) -> Harness {
        let store = Arc::new(MemoryStore::new());
        store.insert_team(team.clone()).unwrap();
        let roster = Arc::new(FakeRoster::new());
        let clock = Arc::new(ManualClock::default());
        let tracker = Arc::new(CapacityTracker::new(Arc::clone(&store)));
        let config = SyncConfig {
            interval: Duration::from_secs(60),
            grace_period: Duration::from_secs(600),
            team_spacing: Duration::ZERO,
            roster_timeout: Duration::from_secs(1),
            exempt_emails: vec!["ops@example.com".into()],
        };
        let job = ReconciliationJob::new(
            Arc::clone(&store),
            Arc::clone(&roster),
            tracker,
            Arc::clone(&clock) as Arc<dyn Clock>,
            config,
        );
        Harness { store, roster, clock, job, team }
    }

    #[tokio::test]
    async fn inactive_and_missing_teams_are_rejected() {
        let h = harness(TeamFixture::new(1).inactive().build());
        assert_eq!(h.job.sync_team(TeamId::new(1)).await.unwrap_err(), SyncError::TeamInactive(TeamId::new(1)));
        assert_eq!(h.job.sync_team(TeamId::new(9)).await.unwrap_err(), SyncError::TeamNotFound(TeamId::new(9)));
    }

    #[tokio::test]
    async fn recent_unseen_invite_keeps_its_seat() {
        let h = harness(TeamFixture::new(1).max_seats(5).counts(0, 1).build());
        let email = Email::parse("new@example.com").unwrap();
        h.store
            .insert_invite(NewInvite {
                team_id: h.team.id,
                email,
                redeem_code_id: None,
                created_at: h.clock.now(),
            })
            .await
            .unwrap();

        let report = h.job.sync_team(h.team.id).await.unwrap();
        assert_eq!(report.counts, TeamCounts { member_count: 0, pending_count: 1 });
        assert_eq!(report.dropped, 0);
    }

    #[tokio::test]
    async fn unauthorized_members_are_flagged() {
        let h = harness(TeamFixture::new(1).max_seats(5).build());
        let account = h.team.account_id.clone();
        h.roster.add_member(&account, "boss@example.com", "owner");
        h.roster.add_member(&account, "ops@example.com", "member");
        h.roster.add_member(&account, "sneaky@example.com", "member");
        h.roster.add_member(&account, "Sneaky@Example.com", "member");

        let report = h.job.sync_team(h.team.id).await.unwrap();
        assert_eq!(report.unauthorized, 1);
        assert_eq!(report.counts.member_count, 3);

        let roster = h.store.roster(h.team.id).await.unwrap();
        let flagged: Vec<&str> = roster
            .iter()
            .filter(|m| m.is_unauthorized)
            .map(|m| m.email.as_str())
            .collect();
        assert_eq!(flagged, vec!["sneaky@example.com"]);
    }

    #[tokio::test]
    async fn listing_failure_is_reported_and_sweep_continues() {
        let h = harness(TeamFixture::new(1).build());
        h.store.insert_team(TeamFixture::new(2).build()).unwrap();
        h.roster.fail_listings(&h.team.account_id, Some(RosterError::Unauthorized));

        let summary = h.job.sync_all().await.unwrap();
        assert_eq!(summary.teams_synced, 1);
        assert_eq!(summary.teams_failed, 1);
    }

    #[tokio::test]
    async fn periodic_sync_stops_on_shutdown() {
        let h = harness(TeamFixture::new(1).build());
        let team_id = h.team.id;
        let store = Arc::clone(&h.store);
        let (tx, rx) = watch::channel(false);

        let handle = Arc::new(h.job).spawn_periodic(rx);

        // First tick fires immediately
        for _ in 0..100 {
            if store.get_team(team_id).await.unwrap().unwrap().synced_at.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store.get_team(team_id).await.unwrap().unwrap().synced_at.is_some());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
