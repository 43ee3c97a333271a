use crate::rows::{self, CODE_COLUMNS, CodeRow};
use crate::{PostgresStore, db, guard_rejected};
use chrono::{DateTime, Utc};
use teamseat_core::CodeId;
use teamseat_core::model::{NewCode, RedeemCode};
use teamseat_core::store::{CodeStore, StoreResult};

impl CodeStore for PostgresStore {
    async fn find_code(&self, code: &str) -> StoreResult<Option<RedeemCode>> {
        let row: Option<CodeRow> =
            sqlx::query_as(&format!("SELECT {CODE_COLUMNS} FROM redeem_codes WHERE code = $1"))
                .bind(code)
                .fetch_optional(&self.pool)
                .await
                .map_err(db("find code"))?;

        row.map(RedeemCode::try_from).transpose()
    }

    async fn try_consume_use(&self, code: &str, now: DateTime<Utc>) -> StoreResult<Option<RedeemCode>> {
        let row: Option<CodeRow> = sqlx::query_as(&format!(
            r"
            UPDATE redeem_codes
            SET used_count = used_count + 1
            WHERE code = $1
              AND is_active
              AND used_count < max_uses
              AND (expires_at IS NULL OR expires_at > $2)
            RETURNING {CODE_COLUMNS}
            "
        ))
        .bind(code)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db("consume code use"))?;

        if row.is_none() {
            guard_rejected("consume_use");
        }
        row.map(RedeemCode::try_from).transpose()
    }

    async fn restore_use(&self, id: CodeId) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE redeem_codes SET used_count = used_count - 1 WHERE id = $1 AND used_count > 0",
        )
        .bind(id.get())
        .execute(&self.pool)
        .await
        .map_err(db("restore code use"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_code(&self, code: NewCode) -> StoreResult<Option<RedeemCode>> {
        let row: Option<CodeRow> = sqlx::query_as(&format!(
            r"
            INSERT INTO redeem_codes (code, code_type, max_uses, expires_at, group_id, note, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (code) DO NOTHING
            RETURNING {CODE_COLUMNS}
            "
        ))
        .bind(&code.code)
        .bind(code.code_type.as_str())
        .bind(rows::to_db(code.max_uses)?)
        .bind(code.expires_at)
        .bind(code.group_id.map(teamseat_core::GroupId::get))
        .bind(&code.note)
        .bind(code.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db("insert code"))?;

        row.map(RedeemCode::try_from).transpose()
    }

    async fn set_code_active(&self, id: CodeId, active: bool) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE redeem_codes SET is_active = $2 WHERE id = $1")
            .bind(id.get())
            .bind(active)
            .execute(&self.pool)
            .await
            .map_err(db("update code"))?;

        Ok(result.rows_affected() == 1)
    }
}
