//! `PostgreSQL` store for the teamseat engine.
//!
//! Implements [`CodeStore`], [`InviteStore`] and [`TeamStore`] from
//! `teamseat-core` on top of sqlx. Every counter mutation is one guarded
//! `UPDATE ... WHERE <guard> RETURNING` statement, so concurrent engine instances
//! sharing a database cannot overspend a code or over-reserve a Team.
//!
//! # Example
//!
//! ```ignore
//! use teamseat_postgres::{PostgresConfig, PostgresStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresStore::connect(&PostgresConfig::from_env()?).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```
//!
//! [`CodeStore`]: teamseat_core::store::CodeStore
//! [`InviteStore`]: teamseat_core::store::InviteStore
//! [`TeamStore`]: teamseat_core::store::TeamStore

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod codes;
pub mod config;
mod invites;
mod rows;
mod teams;

pub use config::{ConfigError, PostgresConfig};

use rows::TeamRow;
use sqlx::postgres::{PgPool, PgPoolOptions};
use teamseat_core::model::{Group, Team};
use teamseat_core::store::{StoreError, StoreResult};

/// `PostgreSQL` implementation of the seat store traits.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool sized by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn connect(config: &PostgresConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;

        tracing::info!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(Self::from_pool(pool))
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create a Team group.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    pub async fn insert_group(&self, name: &str) -> StoreResult<Group> {
        let (id,): (i64,) = sqlx::query_as("INSERT INTO team_groups (name) VALUES ($1) RETURNING id")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(db("insert group"))?;

        Ok(Group {
            id: id.into(),
            name: name.to_string(),
        })
    }

    /// Insert a Team, or replace its configuration and counters if the id exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the write fails, or
    /// [`StoreError::Corrupt`] if a counter does not fit the column type.
    pub async fn upsert_team(&self, team: &Team) -> StoreResult<Team> {
        let row: TeamRow = sqlx::query_as(
            r"
            INSERT INTO teams
                (id, name, account_id, access_token, max_seats, is_active, group_id,
                 member_count, pending_count, counts_version, synced_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                account_id = EXCLUDED.account_id,
                access_token = EXCLUDED.access_token,
                max_seats = EXCLUDED.max_seats,
                is_active = EXCLUDED.is_active,
                group_id = EXCLUDED.group_id,
                member_count = EXCLUDED.member_count,
                pending_count = EXCLUDED.pending_count,
                counts_version = teams.counts_version + 1,
                synced_at = EXCLUDED.synced_at
            RETURNING *
            ",
        )
        .bind(team.id.get())
        .bind(&team.name)
        .bind(&team.account_id)
        .bind(team.credentials.expose())
        .bind(rows::to_db(team.max_seats)?)
        .bind(team.is_active)
        .bind(team.group_id.map(teamseat_core::GroupId::get))
        .bind(rows::to_db(team.counts.member_count)?)
        .bind(rows::to_db(team.counts.pending_count)?)
        .bind(rows::version_to_db(team.counts_version)?)
        .bind(team.synced_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db("upsert team"))?;

        row.try_into()
    }
}

/// Map a sqlx error to [`StoreError::Database`] with the failed operation named.
fn db(op: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| {
        tracing::error!(op, error = %e, "Database operation failed");
        StoreError::Database(format!("Failed to {op}: {e}"))
    }
}

/// Count a guarded update whose guard did not hold.
fn guard_rejected(op: &'static str) {
    metrics::counter!("teamseat_store_guard_rejections_total", "op" => op).increment(1);
}
