//! Reconciliation scenarios: acceptance, dropped invites, races with redemptions
//! and operator actions.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

mod common;

use chrono::{DateTime, Duration, Utc};
use common::harness;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use teamseat_core::environment::Clock;
use teamseat_core::model::{
    Email, InviteRecord, InviteStatus, NewCode, NewInvite, RedeemCode, Team, TeamCounts, TeamMember,
};
use teamseat_core::store::{CodeStore, InviteStore, StoreResult, TeamStore};
use teamseat_core::{CodeId, InviteId, TeamId};
use teamseat_engine::capacity::CapacityTracker;
use teamseat_engine::config::EngineConfig;
use teamseat_engine::memory::MemoryStore;
use teamseat_engine::reconcile::{DROPPED_REASON, ReconciliationJob};
use teamseat_testing::{FakeRoster, InviteScript, ManualClock, TeamFixture, code_fixture};

/// A pending invite that shows up among members is accepted; occupancy is unchanged.
#[tokio::test]
async fn accepted_invite_becomes_member() {
    let h = harness();
    let team = TeamFixture::new(1).max_seats(5).counts(4, 0).build();
    for i in 0..4 {
        h.roster.add_member(&team.account_id, &format!("old{i}@example.com"), "member");
    }
    let account = team.account_id.clone();
    h.add_team(team);
    h.add_code(code_fixture("JOIN", 1)).await;
    h.roster.script(
        "user@x.com",
        [InviteScript::Hang { delay: std::time::Duration::from_secs(2), delivered: true }],
    );

    let redemption = h.engine.redeem("JOIN", "user@x.com").await.unwrap();
    assert_eq!(redemption.status, InviteStatus::Pending);
    assert_eq!(h.team(1).await.counts.occupied(), 5);

    assert!(h.roster.accept(&account, &Email::parse("user@x.com").unwrap()));
    let report = h.engine.sync_team_report(TeamId::new(1)).await.unwrap();

    assert_eq!(report.accepted, 1);
    assert_eq!(report.counts, TeamCounts { member_count: 5, pending_count: 0 });
    assert_eq!(report.counts.occupied(), 5);

    let records = h.engine.records_for_code(h.code_id("JOIN").await).await.unwrap();
    assert_eq!(records[0].status, InviteStatus::Success);
    assert_eq!(records[0].accepted_at, Some(h.clock_now()));
}

/// A pending invite missing externally past the grace period is failed and its
/// seat is freed for the next redemption.
#[tokio::test]
async fn dropped_invite_frees_its_seat_after_grace() {
    let h = harness();
    h.add_team(TeamFixture::new(1).max_seats(1).build());
    h.add_code(code_fixture("LOST", 2)).await;
    h.roster.script(
        "lost@example.com",
        [InviteScript::Hang { delay: std::time::Duration::from_secs(2), delivered: false }],
    );

    let redemption = h.engine.redeem("LOST", "lost@example.com").await.unwrap();
    assert_eq!(redemption.status, InviteStatus::Pending);

    // Within grace: nothing is released
    let counts = h.engine.sync_team(TeamId::new(1)).await.unwrap();
    assert_eq!(counts.pending_count, 1);
    assert_eq!(
        h.engine.redeem("LOST", "next@example.com").await.unwrap_err(),
        teamseat_engine::RedeemError::NoSeatsAvailable
    );

    h.clock.advance(Duration::minutes(11));
    let report = h.engine.sync_team_report(TeamId::new(1)).await.unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(report.counts.pending_count, 0);

    let records = h.engine.records_for_code(h.code_id("LOST").await).await.unwrap();
    assert_eq!(records[0].status, InviteStatus::Failed);
    assert_eq!(records[0].failure_reason.as_deref(), Some(DROPPED_REASON));

    assert!(h.engine.redeem("LOST", "next@example.com").await.is_ok());
}

#[tokio::test]
async fn sync_all_reports_totals() {
    let h = harness();
    for id in 1..=3 {
        let team = TeamFixture::new(id).build();
        for m in 0..id {
            h.roster.add_member(&team.account_id, &format!("m{m}@example.com"), "member");
        }
        h.add_team(team);
    }
    h.add_team(TeamFixture::new(4).inactive().build());

    let summary = h.engine.sync_all().await.unwrap();
    assert_eq!(summary.teams_synced, 3);
    assert_eq!(summary.teams_failed, 0);
    assert_eq!(summary.total_members, 6);
}

#[tokio::test]
async fn members_are_excluded_from_their_own_team_after_sync() {
    let h = harness();
    let team = TeamFixture::new(1).build();
    h.roster.add_member(&team.account_id, "member@example.com", "member");
    h.add_team(team);
    let busy = TeamFixture::new(2).build();
    for i in 0..3 {
        h.roster.add_member(&busy.account_id, &format!("b{i}@example.com"), "member");
    }
    h.add_team(busy);
    h.add_code(code_fixture("AGAIN", 1)).await;

    h.engine.sync_all().await.unwrap();

    // Team 1 is emptier but the address already sits there
    let redemption = h.engine.redeem("AGAIN", "member@example.com").await.unwrap();
    assert_eq!(redemption.team_id, TeamId::new(2));
}

#[tokio::test]
async fn cancel_invite_frees_the_seat() {
    let h = harness();
    h.add_team(TeamFixture::new(1).max_seats(1).build());
    h.add_code(code_fixture("CANCEL", 2)).await;

    h.engine.redeem("CANCEL", "a@example.com").await.unwrap();
    assert_eq!(h.team(1).await.counts.pending_count, 1);

    // Still inside grace: the local record holds the seat even after the external cancel
    let report = h.engine.cancel_invite(TeamId::new(1), "a@example.com").await.unwrap();
    assert_eq!(report.counts.pending_count, 1);

    h.clock.advance(Duration::minutes(11));
    let counts = h.engine.sync_team(TeamId::new(1)).await.unwrap();
    assert_eq!(counts.pending_count, 0);
    assert!(h.engine.redeem("CANCEL", "b@example.com").await.is_ok());
}

#[tokio::test]
async fn remove_member_updates_counts() {
    let h = harness();
    let team = TeamFixture::new(1).build();
    h.roster.add_member(&team.account_id, "gone@example.com", "member");
    h.roster.add_member(&team.account_id, "stay@example.com", "member");
    let account = team.account_id.clone();
    h.add_team(team);

    assert_eq!(h.engine.sync_team(TeamId::new(1)).await.unwrap().member_count, 2);

    let gone = h
        .roster
        .members(&account)
        .into_iter()
        .find(|m| m.email.as_str() == "gone@example.com")
        .unwrap();
    let report = h.engine.remove_member(TeamId::new(1), &gone.external_user_id).await.unwrap();
    assert_eq!(report.counts.member_count, 1);

    assert!(h.engine.remove_member(TeamId::new(1), "nobody").await.is_err());
}

#[tokio::test]
async fn subscription_is_informational() {
    let h = harness();
    let team = TeamFixture::new(1).max_seats(5).build();
    h.roster.set_entitlement(&team.account_id, 2);
    h.add_team(team);
    h.add_code(code_fixture("SUB", 5)).await;

    let subscription = h.engine.subscription(TeamId::new(1)).await.unwrap();
    assert_eq!(subscription.seats_entitled, 2);

    // Admission follows max_seats, not the external entitlement
    for i in 0..3 {
        h.engine.redeem("SUB", &format!("u{i}@example.com")).await.unwrap();
    }
    assert_eq!(h.team(1).await.counts.pending_count, 3);
}

// ============================================================================
// Reservation racing a sync
// ============================================================================

/// Store that takes a seat on Team 1 the first time reconciliation scans its
/// records, as a redemption running concurrently would.
struct RacingStore {
    inner: MemoryStore,
    raced: AtomicBool,
}

impl CodeStore for RacingStore {
    async fn find_code(&self, code: &str) -> StoreResult<Option<RedeemCode>> {
        self.inner.find_code(code).await
    }
    async fn try_consume_use(&self, code: &str, now: DateTime<Utc>) -> StoreResult<Option<RedeemCode>> {
        self.inner.try_consume_use(code, now).await
    }
    async fn restore_use(&self, id: CodeId) -> StoreResult<bool> {
        self.inner.restore_use(id).await
    }
    async fn insert_code(&self, code: NewCode) -> StoreResult<Option<RedeemCode>> {
        self.inner.insert_code(code).await
    }
    async fn set_code_active(&self, id: CodeId, active: bool) -> StoreResult<bool> {
        self.inner.set_code_active(id, active).await
    }
}

impl InviteStore for RacingStore {
    async fn insert_invite(&self, invite: NewInvite) -> StoreResult<InviteRecord> {
        self.inner.insert_invite(invite).await
    }
    async fn resolve_invite(
        &self,
        id: InviteId,
        status: InviteStatus,
        reason: Option<String>,
    ) -> StoreResult<bool> {
        self.inner.resolve_invite(id, status, reason).await
    }
    async fn mark_accepted(&self, id: InviteId, at: DateTime<Utc>) -> StoreResult<bool> {
        self.inner.mark_accepted(id, at).await
    }
    async fn unresolved_invites(&self, team: TeamId) -> StoreResult<Vec<InviteRecord>> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            assert!(self.inner.try_reserve_seat(team).await?);
        }
        self.inner.unresolved_invites(team).await
    }
    async fn invited_emails(&self, team: TeamId) -> StoreResult<Vec<Email>> {
        self.inner.invited_emails(team).await
    }
    async fn teams_with_invite(&self, email: &Email) -> StoreResult<Vec<TeamId>> {
        self.inner.teams_with_invite(email).await
    }
    async fn count_failed_since(&self, email: &Email, since: DateTime<Utc>) -> StoreResult<u64> {
        self.inner.count_failed_since(email, since).await
    }
    async fn invites_for_code(&self, code: CodeId) -> StoreResult<Vec<InviteRecord>> {
        self.inner.invites_for_code(code).await
    }
}

impl TeamStore for RacingStore {
    async fn list_teams(&self) -> StoreResult<Vec<Team>> {
        self.inner.list_teams().await
    }
    async fn get_team(&self, id: TeamId) -> StoreResult<Option<Team>> {
        self.inner.get_team(id).await
    }
    async fn try_reserve_seat(&self, id: TeamId) -> StoreResult<bool> {
        self.inner.try_reserve_seat(id).await
    }
    async fn release_seat(&self, id: TeamId) -> StoreResult<bool> {
        self.inner.release_seat(id).await
    }
    async fn apply_counts(
        &self,
        id: TeamId,
        expected_version: u64,
        counts: TeamCounts,
        synced_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.inner.apply_counts(id, expected_version, counts, synced_at).await
    }
    async fn replace_roster(&self, id: TeamId, members: Vec<TeamMember>) -> StoreResult<()> {
        self.inner.replace_roster(id, members).await
    }
    async fn roster(&self, id: TeamId) -> StoreResult<Vec<TeamMember>> {
        self.inner.roster(id).await
    }
    async fn teams_with_member(&self, email: &Email) -> StoreResult<Vec<TeamId>> {
        self.inner.teams_with_member(email).await
    }
}

/// A reservation landing mid-sync makes the counts write stale. The sync then
/// keeps the racing seat and releases only the seat of the dropped record.
#[tokio::test]
async fn stale_sync_releases_dropped_seats_individually() {
    let clock = Arc::new(ManualClock::default());
    let inner = MemoryStore::new();
    // One seat held by an old record that the external side never shows
    inner.insert_team(TeamFixture::new(1).max_seats(5).counts(0, 1).build()).unwrap();
    inner
        .insert_invite(NewInvite {
            team_id: TeamId::new(1),
            email: Email::parse("old@example.com").unwrap(),
            redeem_code_id: None,
            created_at: clock.now(),
        })
        .await
        .unwrap();
    clock.advance(Duration::minutes(30));

    let store = Arc::new(RacingStore {
        inner,
        raced: AtomicBool::new(false),
    });
    let tracker = Arc::new(CapacityTracker::new(Arc::clone(&store)));
    let job = ReconciliationJob::new(
        Arc::clone(&store),
        Arc::new(FakeRoster::new()),
        tracker,
        Arc::clone(&clock) as Arc<dyn Clock>,
        EngineConfig::default().sync,
    );

    let report = job.sync_team(TeamId::new(1)).await.unwrap();

    assert!(report.stale);
    assert_eq!(report.dropped, 1);
    // 1 (old) + 1 (racing) - 1 (dropped) = 1
    assert_eq!(report.counts.pending_count, 1);
    assert_eq!(store.get_team(TeamId::new(1)).await.unwrap().unwrap().counts.pending_count, 1);

    // The next sync is not raced and writes observed truth plus nothing in flight
    let report = job.sync_team(TeamId::new(1)).await.unwrap();
    assert!(!report.stale);
    assert_eq!(report.counts.pending_count, 0);
}
