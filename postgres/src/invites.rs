use crate::rows::{self, INVITE_COLUMNS, InviteRow};
use crate::{PostgresStore, db};
use chrono::{DateTime, Utc};
use teamseat_core::model::{Email, InviteRecord, InviteStatus, NewInvite};
use teamseat_core::store::{InviteStore, StoreError, StoreResult};
use teamseat_core::{CodeId, InviteId, TeamId};

impl InviteStore for PostgresStore {
    async fn insert_invite(&self, invite: NewInvite) -> StoreResult<InviteRecord> {
        let row: InviteRow = sqlx::query_as(&format!(
            r"
            INSERT INTO invite_records (team_id, email, redeem_code_id, status, created_at)
            VALUES ($1, $2, $3, 'pending', $4)
            RETURNING {INVITE_COLUMNS}
            "
        ))
        .bind(invite.team_id.get())
        .bind(invite.email.as_str())
        .bind(invite.redeem_code_id.map(CodeId::get))
        .bind(invite.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db("insert invite"))?;

        row.try_into()
    }

    async fn resolve_invite(
        &self,
        id: InviteId,
        status: InviteStatus,
        reason: Option<String>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE invite_records
            SET status = $2, failure_reason = $3
            WHERE id = $1 AND status = 'pending'
            ",
        )
        .bind(id.get())
        .bind(status.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(db("resolve invite"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_accepted(&self, id: InviteId, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE invite_records
            SET status = 'success', accepted_at = $2
            WHERE id = $1 AND status <> 'failed' AND accepted_at IS NULL
            ",
        )
        .bind(id.get())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db("mark invite accepted"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn unresolved_invites(&self, team: TeamId) -> StoreResult<Vec<InviteRecord>> {
        let rows: Vec<InviteRow> = sqlx::query_as(&format!(
            r"
            SELECT {INVITE_COLUMNS} FROM invite_records
            WHERE team_id = $1 AND status <> 'failed' AND accepted_at IS NULL
            ORDER BY id
            "
        ))
        .bind(team.get())
        .fetch_all(&self.pool)
        .await
        .map_err(db("list unresolved invites"))?;

        rows::collect(rows)
    }

    async fn invited_emails(&self, team: TeamId) -> StoreResult<Vec<Email>> {
        let emails: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT email FROM invite_records WHERE team_id = $1 AND status <> 'failed'",
        )
        .bind(team.get())
        .fetch_all(&self.pool)
        .await
        .map_err(db("list invited emails"))?;

        emails
            .into_iter()
            .map(|(email,)| Email::parse(&email).map_err(|e| StoreError::Corrupt(e.to_string())))
            .collect()
    }

    async fn teams_with_invite(&self, email: &Email) -> StoreResult<Vec<TeamId>> {
        let teams: Vec<(i64,)> = sqlx::query_as(
            "SELECT DISTINCT team_id FROM invite_records WHERE email = $1 AND status <> 'failed'",
        )
        .bind(email.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db("list teams with invite"))?;

        Ok(teams.into_iter().map(|(id,)| TeamId::new(id)).collect())
    }

    async fn count_failed_since(&self, email: &Email, since: DateTime<Utc>) -> StoreResult<u64> {
        let (count,): (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*) FROM invite_records
            WHERE email = $1 AND status = 'failed' AND created_at >= $2
            ",
        )
        .bind(email.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(db("count failed invites"))?;

        u64::try_from(count).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn invites_for_code(&self, code: CodeId) -> StoreResult<Vec<InviteRecord>> {
        let rows: Vec<InviteRow> = sqlx::query_as(&format!(
            "SELECT {INVITE_COLUMNS} FROM invite_records WHERE redeem_code_id = $1 ORDER BY id DESC"
        ))
        .bind(code.get())
        .fetch_all(&self.pool)
        .await
        .map_err(db("list invites for code"))?;

        rows::collect(rows)
    }
}
