//! Seat capacity tracking.
//!
//! The tracker exclusively owns the cached seat counters of each Team. Candidate
//! ordering is a pure function ([`order_candidates`]); reservation then walks that
//! order taking one atomic per-Team step at a time, so no lock ever spans Teams.
//!
//! Reservations between the counter increment and their confirm/release are
//! counted in memory as *in flight*, which keeps reconciliation from overwriting a
//! seat whose invite record it cannot see yet.

use crate::error::CapacityError;
use crate::metrics::RedemptionMetrics;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use teamseat_core::model::{Email, SeatStats, Team, TeamCounts};
use teamseat_core::store::{SeatStore, StoreResult};
use teamseat_core::{GroupId, TeamId};

/// One reserved seat.
///
/// Not `Clone`: the only ways to dispose of a reservation are
/// [`CapacityTracker::confirm`] and [`CapacityTracker::release`].
#[must_use = "a reserved seat must be confirmed or released"]
#[derive(Debug)]
pub struct ReservationToken {
    team_id: TeamId,
}

impl ReservationToken {
    /// Team the seat is reserved on.
    #[must_use]
    pub const fn team_id(&self) -> TeamId {
        self.team_id
    }
}

/// Team state captured at the start of a reconciliation.
#[derive(Debug, Clone)]
pub struct CountsSnapshot {
    /// The Team as read
    pub team: Team,
    /// In-flight reservations, read after the Team
    pub in_flight: u32,
}

impl CountsSnapshot {
    /// Counter version the snapshot was taken at.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.team.counts_version
    }
}

/// Result of [`CapacityTracker::reconcile_counts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileWrite {
    /// The counts were written
    Applied(TeamCounts),
    /// The counters moved since the snapshot; nothing was written
    Stale,
}

/// Order the Teams a redemption may be placed on.
///
/// Keeps active Teams with at least one seat, in `group` when one is given, that
/// are not in `excluded`. The result is sorted by occupancy ratio
/// `(members + pending) / max_seats` ascending, ties broken by Team id.
#[must_use]
pub fn order_candidates(
    teams: Vec<Team>,
    group: Option<GroupId>,
    excluded: &HashSet<TeamId>,
) -> Vec<Team> {
    let mut candidates: Vec<Team> = teams
        .into_iter()
        .filter(|t| t.is_active && t.max_seats > 0)
        .filter(|t| group.is_none_or(|g| t.group_id == Some(g)))
        .filter(|t| !excluded.contains(&t.id))
        .collect();

    candidates.sort_by(|a, b| occupancy_cmp(a, b).then_with(|| a.id.cmp(&b.id)));
    candidates
}

/// Compare occupancy ratios exactly: `a.occ / a.max` vs `b.occ / b.max`.
fn occupancy_cmp(a: &Team, b: &Team) -> Ordering {
    let lhs = u64::from(a.counts.occupied()) * u64::from(b.max_seats);
    let rhs = u64::from(b.counts.occupied()) * u64::from(a.max_seats);
    lhs.cmp(&rhs)
}

/// Per-Team seat counters over a [`SeatStore`].
pub struct CapacityTracker<S> {
    store: Arc<S>,
    in_flight: Mutex<HashMap<TeamId, u32>>,
}

impl<S: SeatStore> CapacityTracker<S> {
    /// Create a tracker over `store`.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Candidate Teams for `email`, in reservation order.
    ///
    /// Teams where `email` already holds a non-failed invite or appears in the last
    /// roster snapshot are excluded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](teamseat_core::store::StoreError) if a read fails.
    pub async fn candidates(&self, group: Option<GroupId>, email: &Email) -> StoreResult<Vec<Team>> {
        let teams = self.store.list_teams().await?;

        let mut excluded: HashSet<TeamId> =
            self.store.teams_with_invite(email).await?.into_iter().collect();
        excluded.extend(self.store.teams_with_member(email).await?);

        Ok(order_candidates(teams, group, &excluded))
    }

    /// Reserve one seat on the first candidate with room.
    ///
    /// Each candidate gets one atomic check-and-increment; the next candidate is
    /// tried only when that step fails.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError::NoCapacityAvailable`] if every candidate is full.
    pub async fn select_and_reserve(
        &self,
        candidates: &[Team],
        email: &Email,
    ) -> Result<(Team, ReservationToken), CapacityError> {
        for team in candidates {
            self.enter(team.id);
            match self.store.try_reserve_seat(team.id).await {
                Ok(true) => {
                    tracing::debug!(team_id = %team.id, email = %email, "Seat reserved");
                    RedemptionMetrics::record_reservation("reserved");
                    return Ok((team.clone(), ReservationToken { team_id: team.id }));
                }
                Ok(false) => {
                    self.leave(team.id);
                    tracing::debug!(team_id = %team.id, "Team full, trying next candidate");
                }
                Err(e) => {
                    self.leave(team.id);
                    return Err(e.into());
                }
            }
        }

        RedemptionMetrics::record_reservation("no_capacity");
        Err(CapacityError::NoCapacityAvailable)
    }

    /// Convert a reservation into a durable invite. Counts are unchanged.
    pub fn confirm(&self, token: ReservationToken) {
        self.leave(token.team_id);
    }

    /// Give a reserved seat back.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](teamseat_core::store::StoreError) if the decrement fails.
    pub async fn release(&self, token: ReservationToken) -> StoreResult<()> {
        self.leave(token.team_id);
        self.release_seat(token.team_id).await
    }

    /// Give back a seat held by a record that reconciliation failed while its
    /// counts write was stale.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](teamseat_core::store::StoreError) if the decrement fails.
    pub async fn release_dropped(&self, team_id: TeamId) -> StoreResult<()> {
        self.release_seat(team_id).await
    }

    async fn release_seat(&self, team_id: TeamId) -> StoreResult<()> {
        if !self.store.release_seat(team_id).await? {
            tracing::warn!(team_id = %team_id, "Released a seat on a Team with no pending seats");
        }
        Ok(())
    }

    /// Reservations currently between reserve and confirm/release on `team_id`.
    #[must_use]
    pub fn in_flight(&self, team_id: TeamId) -> u32 {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&team_id)
            .copied()
            .unwrap_or(0)
    }

    /// Capture the Team and its in-flight count for reconciliation.
    ///
    /// The Team is read first: any reservation that starts after the read bumps
    /// `counts_version`, and any that finished before the in-flight read has its
    /// record visible to a later record scan.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](teamseat_core::store::StoreError) if the read fails.
    pub async fn snapshot(&self, team_id: TeamId) -> StoreResult<Option<CountsSnapshot>> {
        let Some(team) = self.store.get_team(team_id).await? else {
            return Ok(None);
        };
        let in_flight = self.in_flight(team_id);
        Ok(Some(CountsSnapshot { team, in_flight }))
    }

    /// Replace cached counts with observed truth.
    ///
    /// `pending_count` becomes `max(observed_pending, local_unresolved + in_flight)`
    /// so local reservations the external side cannot show yet are kept. Nothing is
    /// written if the counters moved since `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](teamseat_core::store::StoreError) if the write fails.
    pub async fn reconcile_counts(
        &self,
        snapshot: &CountsSnapshot,
        observed_members: u32,
        observed_pending: u32,
        local_unresolved: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<ReconcileWrite> {
        let counts = TeamCounts {
            member_count: observed_members,
            pending_count: observed_pending
                .max(local_unresolved.saturating_add(snapshot.in_flight)),
        };

        let applied = self
            .store
            .apply_counts(snapshot.team.id, snapshot.version(), counts, now)
            .await?;

        if applied {
            Ok(ReconcileWrite::Applied(counts))
        } else {
            Ok(ReconcileWrite::Stale)
        }
    }

    /// Aggregate seat statistics over active Teams.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](teamseat_core::store::StoreError) if the read fails.
    pub async fn seat_stats(&self) -> StoreResult<SeatStats> {
        let teams = self.store.list_teams().await?;
        let mut stats = teams
            .iter()
            .filter(|t| t.is_active)
            .fold(SeatStats::default(), |mut acc, t| {
                acc.total_seats += u64::from(t.max_seats);
                acc.members += u64::from(t.counts.member_count);
                acc.pending += u64::from(t.counts.pending_count);
                acc
            });
        stats.available = stats
            .total_seats
            .saturating_sub(stats.members)
            .saturating_sub(stats.pending);
        Ok(stats)
    }

    fn enter(&self, team_id: TeamId) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        *in_flight.entry(team_id).or_insert(0) += 1;
    }

    fn leave(&self, team_id: TeamId) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = in_flight.get_mut(&team_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                in_flight.remove(&team_id);
            }
        }
    }
}
