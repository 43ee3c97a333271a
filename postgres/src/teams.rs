use crate::rows::{self, MEMBER_COLUMNS, MemberRow, TeamRow};
use crate::{PostgresStore, db, guard_rejected};
use chrono::{DateTime, Utc};
use teamseat_core::TeamId;
use teamseat_core::model::{Email, Team, TeamCounts, TeamMember};
use teamseat_core::store::{StoreResult, TeamStore};

impl TeamStore for PostgresStore {
    async fn list_teams(&self) -> StoreResult<Vec<Team>> {
        let rows: Vec<TeamRow> = sqlx::query_as("SELECT * FROM teams ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db("list teams"))?;

        rows::collect(rows)
    }

    async fn get_team(&self, id: TeamId) -> StoreResult<Option<Team>> {
        let row: Option<TeamRow> = sqlx::query_as("SELECT * FROM teams WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db("get team"))?;

        row.map(Team::try_from).transpose()
    }

    async fn try_reserve_seat(&self, id: TeamId) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE teams
            SET pending_count = pending_count + 1, counts_version = counts_version + 1
            WHERE id = $1 AND is_active AND member_count + pending_count < max_seats
            ",
        )
        .bind(id.get())
        .execute(&self.pool)
        .await
        .map_err(db("reserve seat"))?;

        let reserved = result.rows_affected() == 1;
        if !reserved {
            guard_rejected("reserve_seat");
        }
        Ok(reserved)
    }

    async fn release_seat(&self, id: TeamId) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE teams
            SET pending_count = pending_count - 1, counts_version = counts_version + 1
            WHERE id = $1 AND pending_count > 0
            ",
        )
        .bind(id.get())
        .execute(&self.pool)
        .await
        .map_err(db("release seat"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn apply_counts(
        &self,
        id: TeamId,
        expected_version: u64,
        counts: TeamCounts,
        synced_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE teams
            SET member_count = $3,
                pending_count = $4,
                counts_version = counts_version + 1,
                synced_at = $5
            WHERE id = $1 AND counts_version = $2
            ",
        )
        .bind(id.get())
        .bind(rows::version_to_db(expected_version)?)
        .bind(rows::to_db(counts.member_count)?)
        .bind(rows::to_db(counts.pending_count)?)
        .bind(synced_at)
        .execute(&self.pool)
        .await
        .map_err(db("apply team counts"))?;

        let applied = result.rows_affected() == 1;
        if !applied {
            guard_rejected("apply_counts");
        }
        Ok(applied)
    }

    async fn replace_roster(&self, id: TeamId, members: Vec<TeamMember>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db("begin roster update"))?;

        sqlx::query("DELETE FROM team_members WHERE team_id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .map_err(db("clear roster"))?;

        for member in &members {
            sqlx::query(&format!(
                r"
                INSERT INTO team_members ({MEMBER_COLUMNS})
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (team_id, email) DO NOTHING
                "
            ))
            .bind(id.get())
            .bind(member.email.as_str())
            .bind(&member.role)
            .bind(&member.external_user_id)
            .bind(member.joined_at)
            .bind(member.is_unauthorized)
            .bind(member.synced_at)
            .execute(&mut *tx)
            .await
            .map_err(db("insert roster member"))?;
        }

        tx.commit().await.map_err(db("commit roster update"))?;
        tracing::debug!(team_id = %id, members = members.len(), "Roster snapshot replaced");
        Ok(())
    }

    async fn roster(&self, id: TeamId) -> StoreResult<Vec<TeamMember>> {
        let rows: Vec<MemberRow> = sqlx::query_as(&format!(
            "SELECT {MEMBER_COLUMNS} FROM team_members WHERE team_id = $1 ORDER BY email"
        ))
        .bind(id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(db("load roster"))?;

        rows::collect(rows)
    }

    async fn teams_with_member(&self, email: &Email) -> StoreResult<Vec<TeamId>> {
        let teams: Vec<(i64,)> = sqlx::query_as("SELECT DISTINCT team_id FROM team_members WHERE email = $1")
            .bind(email.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db("list teams with member"))?;

        Ok(teams.into_iter().map(|(id,)| TeamId::new(id)).collect())
    }
}
