//! In-memory [`SeatStore`] for tests, demos and single-process deployments.
//!
//! Every code and Team row sits behind its own mutex, held only for the
//! check-and-set of that row; the maps themselves are behind `RwLock`s that are
//! only write-locked to insert rows. No lock is held across an `.await`.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use teamseat_core::model::{
    Email, InviteRecord, InviteStatus, NewCode, NewInvite, RedeemCode, Team, TeamCounts, TeamMember,
};
use teamseat_core::store::{CodeStore, InviteStore, StoreError, StoreResult, TeamStore};
use teamseat_core::{CodeId, InviteId, TeamId};

type Row<T> = Arc<Mutex<T>>;

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    codes: RwLock<HashMap<String, Row<RedeemCode>>>,
    teams: RwLock<BTreeMap<TeamId, Row<Team>>>,
    invites: Mutex<Vec<InviteRecord>>,
    rosters: Mutex<HashMap<TeamId, Vec<TeamMember>>>,
    next_code_id: AtomicI64,
    next_invite_id: AtomicI64,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a Team.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Poisoned`] if a lock was poisoned.
    pub fn insert_team(&self, team: Team) -> StoreResult<()> {
        self.teams
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .insert(team.id, Arc::new(Mutex::new(team)));
        Ok(())
    }

    fn code_row(&self, code: &str) -> StoreResult<Option<Row<RedeemCode>>> {
        Ok(self
            .codes
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .get(code)
            .cloned())
    }

    fn code_row_by_id(&self, id: CodeId) -> StoreResult<Option<Row<RedeemCode>>> {
        let codes = self.codes.read().map_err(|_| StoreError::Poisoned)?;
        for row in codes.values() {
            if row.lock().map_err(|_| StoreError::Poisoned)?.id == id {
                return Ok(Some(Arc::clone(row)));
            }
        }
        Ok(None)
    }

    fn team_row(&self, id: TeamId) -> StoreResult<Option<Row<Team>>> {
        Ok(self
            .teams
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .get(&id)
            .cloned())
    }

    /// Run `f` on a team row under its lock.
    fn with_team<T>(&self, id: TeamId, f: impl FnOnce(&mut Team) -> T) -> StoreResult<Option<T>> {
        let Some(row) = self.team_row(id)? else {
            return Ok(None);
        };
        let mut team = row.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(Some(f(&mut team)))
    }

    fn with_invites<T>(&self, f: impl FnOnce(&mut Vec<InviteRecord>) -> T) -> StoreResult<T> {
        let mut invites = self.invites.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut invites))
    }
}

impl CodeStore for MemoryStore {
    async fn find_code(&self, code: &str) -> StoreResult<Option<RedeemCode>> {
        match self.code_row(code)? {
            Some(row) => Ok(Some(row.lock().map_err(|_| StoreError::Poisoned)?.clone())),
            None => Ok(None),
        }
    }

    async fn try_consume_use(&self, code: &str, now: DateTime<Utc>) -> StoreResult<Option<RedeemCode>> {
        let Some(row) = self.code_row(code)? else {
            return Ok(None);
        };
        let mut code = row.lock().map_err(|_| StoreError::Poisoned)?;
        if !code.is_active || code.is_expired(now) || code.is_exhausted() {
            return Ok(None);
        }
        code.used_count += 1;
        Ok(Some(code.clone()))
    }

    async fn restore_use(&self, id: CodeId) -> StoreResult<bool> {
        let Some(row) = self.code_row_by_id(id)? else {
            return Ok(false);
        };
        let mut code = row.lock().map_err(|_| StoreError::Poisoned)?;
        if code.used_count == 0 {
            return Ok(false);
        }
        code.used_count -= 1;
        Ok(true)
    }

    async fn insert_code(&self, new: NewCode) -> StoreResult<Option<RedeemCode>> {
        let mut codes = self.codes.write().map_err(|_| StoreError::Poisoned)?;
        if codes.contains_key(&new.code) {
            return Ok(None);
        }
        let code = RedeemCode {
            id: CodeId::new(self.next_code_id.fetch_add(1, Ordering::Relaxed) + 1),
            code: new.code,
            code_type: new.code_type,
            max_uses: new.max_uses,
            used_count: 0,
            expires_at: new.expires_at,
            is_active: true,
            group_id: new.group_id,
            note: new.note,
            created_at: new.created_at,
        };
        codes.insert(code.code.clone(), Arc::new(Mutex::new(code.clone())));
        Ok(Some(code))
    }

    async fn set_code_active(&self, id: CodeId, active: bool) -> StoreResult<bool> {
        let Some(row) = self.code_row_by_id(id)? else {
            return Ok(false);
        };
        row.lock().map_err(|_| StoreError::Poisoned)?.is_active = active;
        Ok(true)
    }
}

impl InviteStore for MemoryStore {
    async fn insert_invite(&self, new: NewInvite) -> StoreResult<InviteRecord> {
        let record = InviteRecord {
            id: InviteId::new(self.next_invite_id.fetch_add(1, Ordering::Relaxed) + 1),
            team_id: new.team_id,
            email: new.email,
            redeem_code_id: new.redeem_code_id,
            status: InviteStatus::Pending,
            failure_reason: None,
            created_at: new.created_at,
            accepted_at: None,
        };
        self.with_invites(|invites| invites.push(record.clone()))?;
        Ok(record)
    }

    async fn resolve_invite(
        &self,
        id: InviteId,
        status: InviteStatus,
        reason: Option<String>,
    ) -> StoreResult<bool> {
        self.with_invites(|invites| {
            match invites
                .iter_mut()
                .find(|r| r.id == id && r.status == InviteStatus::Pending)
            {
                Some(record) => {
                    record.status = status;
                    record.failure_reason = reason;
                    true
                }
                None => false,
            }
        })
    }

    async fn mark_accepted(&self, id: InviteId, at: DateTime<Utc>) -> StoreResult<bool> {
        self.with_invites(|invites| {
            match invites.iter_mut().find(|r| {
                r.id == id && r.status != InviteStatus::Failed && r.accepted_at.is_none()
            }) {
                Some(record) => {
                    record.status = InviteStatus::Success;
                    record.accepted_at = Some(at);
                    true
                }
                None => false,
            }
        })
    }

    async fn unresolved_invites(&self, team: TeamId) -> StoreResult<Vec<InviteRecord>> {
        self.with_invites(|invites| {
            invites
                .iter()
                .filter(|r| r.team_id == team && r.holds_seat())
                .cloned()
                .collect()
        })
    }

    async fn invited_emails(&self, team: TeamId) -> StoreResult<Vec<Email>> {
        self.with_invites(|invites| {
            let emails: HashSet<&Email> = invites
                .iter()
                .filter(|r| r.team_id == team && r.status != InviteStatus::Failed)
                .map(|r| &r.email)
                .collect();
            emails.into_iter().cloned().collect()
        })
    }

    async fn teams_with_invite(&self, email: &Email) -> StoreResult<Vec<TeamId>> {
        self.with_invites(|invites| {
            let teams: HashSet<TeamId> = invites
                .iter()
                .filter(|r| &r.email == email && r.status != InviteStatus::Failed)
                .map(|r| r.team_id)
                .collect();
            teams.into_iter().collect()
        })
    }

    async fn count_failed_since(&self, email: &Email, since: DateTime<Utc>) -> StoreResult<u64> {
        self.with_invites(|invites| {
            invites
                .iter()
                .filter(|r| {
                    &r.email == email && r.status == InviteStatus::Failed && r.created_at >= since
                })
                .count() as u64
        })
    }

    async fn invites_for_code(&self, code: CodeId) -> StoreResult<Vec<InviteRecord>> {
        self.with_invites(|invites| {
            invites
                .iter()
                .rev()
                .filter(|r| r.redeem_code_id == Some(code))
                .cloned()
                .collect()
        })
    }
}

impl TeamStore for MemoryStore {
    async fn list_teams(&self) -> StoreResult<Vec<Team>> {
        let rows: Vec<Row<Team>> = self
            .teams
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .values()
            .cloned()
            .collect();

        rows.iter()
            .map(|row| row.lock().map(|t| t.clone()).map_err(|_| StoreError::Poisoned))
            .collect()
    }

    async fn get_team(&self, id: TeamId) -> StoreResult<Option<Team>> {
        self.with_team(id, |t| t.clone())
    }

    async fn try_reserve_seat(&self, id: TeamId) -> StoreResult<bool> {
        Ok(self
            .with_team(id, |t| {
                if t.is_active && t.has_free_seat() {
                    t.counts.pending_count += 1;
                    t.counts_version += 1;
                    true
                } else {
                    false
                }
            })?
            .unwrap_or(false))
    }

    async fn release_seat(&self, id: TeamId) -> StoreResult<bool> {
        Ok(self
            .with_team(id, |t| {
                if t.counts.pending_count > 0 {
                    t.counts.pending_count -= 1;
                    t.counts_version += 1;
                    true
                } else {
                    false
                }
            })?
            .unwrap_or(false))
    }

    async fn apply_counts(
        &self,
        id: TeamId,
        expected_version: u64,
        counts: TeamCounts,
        synced_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(self
            .with_team(id, |t| {
                if t.counts_version != expected_version {
                    return false;
                }
                t.counts = counts;
                t.counts_version += 1;
                t.synced_at = Some(synced_at);
                true
            })?
            .unwrap_or(false))
    }

    async fn replace_roster(&self, id: TeamId, members: Vec<TeamMember>) -> StoreResult<()> {
        self.rosters
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .insert(id, members);
        Ok(())
    }

    async fn roster(&self, id: TeamId) -> StoreResult<Vec<TeamMember>> {
        Ok(self
            .rosters
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn teams_with_member(&self, email: &Email) -> StoreResult<Vec<TeamId>> {
        Ok(self
            .rosters
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .iter()
            .filter(|(_, members)| members.iter().any(|m| &m.email == email))
            .map(|(id, _)| *id)
            .collect())
    }
}
