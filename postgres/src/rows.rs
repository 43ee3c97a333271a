//! Row types and their mapping to the domain model.
//!
//! Counters are `INTEGER`/`BIGINT` columns; a negative or oversized value read
//! back is reported as [`StoreError::Corrupt`] rather than wrapped.

use chrono::{DateTime, Utc};
use teamseat_core::model::{
    CodeType, Credentials, Email, InviteRecord, InviteStatus, RedeemCode, Team, TeamCounts,
    TeamMember,
};
use teamseat_core::store::StoreError;
use teamseat_core::{CodeId, GroupId, InviteId, TeamId};

pub(crate) const CODE_COLUMNS: &str =
    "id, code, code_type, max_uses, used_count, expires_at, is_active, group_id, note, created_at";

pub(crate) const INVITE_COLUMNS: &str =
    "id, team_id, email, redeem_code_id, status, failure_reason, created_at, accepted_at";

pub(crate) const MEMBER_COLUMNS: &str =
    "team_id, email, role, external_user_id, joined_at, is_unauthorized, synced_at";

#[derive(sqlx::FromRow)]
pub(crate) struct CodeRow {
    id: i64,
    code: String,
    code_type: String,
    max_uses: i32,
    used_count: i32,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
    group_id: Option<i64>,
    note: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CodeRow> for RedeemCode {
    type Error = StoreError;

    fn try_from(row: CodeRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: CodeId::new(row.id),
            code_type: row.code_type.parse::<CodeType>().map_err(corrupt)?,
            code: row.code,
            max_uses: from_db(row.max_uses)?,
            used_count: from_db(row.used_count)?,
            expires_at: row.expires_at,
            is_active: row.is_active,
            group_id: row.group_id.map(GroupId::new),
            note: row.note,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct TeamRow {
    id: i64,
    name: String,
    account_id: String,
    access_token: String,
    max_seats: i32,
    is_active: bool,
    group_id: Option<i64>,
    member_count: i32,
    pending_count: i32,
    counts_version: i64,
    synced_at: Option<DateTime<Utc>>,
}

impl TryFrom<TeamRow> for Team {
    type Error = StoreError;

    fn try_from(row: TeamRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: TeamId::new(row.id),
            name: row.name,
            account_id: row.account_id,
            credentials: Credentials::new(row.access_token),
            max_seats: from_db(row.max_seats)?,
            is_active: row.is_active,
            group_id: row.group_id.map(GroupId::new),
            counts: TeamCounts {
                member_count: from_db(row.member_count)?,
                pending_count: from_db(row.pending_count)?,
            },
            counts_version: u64::try_from(row.counts_version).map_err(corrupt)?,
            synced_at: row.synced_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct InviteRow {
    id: i64,
    team_id: i64,
    email: String,
    redeem_code_id: Option<i64>,
    status: String,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    accepted_at: Option<DateTime<Utc>>,
}

impl TryFrom<InviteRow> for InviteRecord {
    type Error = StoreError;

    fn try_from(row: InviteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: InviteId::new(row.id),
            team_id: TeamId::new(row.team_id),
            email: Email::parse(&row.email).map_err(corrupt)?,
            redeem_code_id: row.redeem_code_id.map(CodeId::new),
            status: row.status.parse::<InviteStatus>().map_err(corrupt)?,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            accepted_at: row.accepted_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct MemberRow {
    team_id: i64,
    email: String,
    role: String,
    external_user_id: String,
    joined_at: Option<DateTime<Utc>>,
    is_unauthorized: bool,
    synced_at: DateTime<Utc>,
}

impl TryFrom<MemberRow> for TeamMember {
    type Error = StoreError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        Ok(Self {
            team_id: TeamId::new(row.team_id),
            email: Email::parse(&row.email).map_err(corrupt)?,
            role: row.role,
            external_user_id: row.external_user_id,
            joined_at: row.joined_at,
            is_unauthorized: row.is_unauthorized,
            synced_at: row.synced_at,
        })
    }
}

/// Map every row, failing on the first one that does not convert.
pub(crate) fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

pub(crate) fn from_db(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(corrupt)
}

pub(crate) fn to_db(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(corrupt)
}

pub(crate) fn version_to_db(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(corrupt)
}

fn corrupt(e: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn negative_counters_are_corrupt() {
        assert!(matches!(from_db(-1), Err(StoreError::Corrupt(_))));
        assert_eq!(from_db(7).unwrap(), 7);
        assert!(to_db(u32::MAX).is_err());
    }

    #[test]
    fn unknown_status_is_corrupt() {
        let row = InviteRow {
            id: 1,
            team_id: 1,
            email: "a@b.io".into(),
            redeem_code_id: None,
            status: "maybe".into(),
            failure_reason: None,
            created_at: Utc::now(),
            accepted_at: None,
        };
        let err = InviteRecord::try_from(row).unwrap_err();
        assert_eq!(err, StoreError::Corrupt("Unknown invite_status value: maybe".into()));
    }
}
