//! Versioned Postgres schema.
//!
//! Versions are applied in ascending order, each in its own transaction
//! together with its row in `schema_migrations`, so a failed migration leaves
//! no half-applied version behind.

use sqlx::PgPool;
use tracing::{debug, info, instrument};

use crate::store::StoreError;
use crate::store::postgres::map_sqlx_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub up: &'static str,
}

const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_migrations (
        version     BIGINT PRIMARY KEY,
        description TEXT NOT NULL,
        applied_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    )
"#;

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1722266003,
        description: "Create 'product' table",
        up: r#"
            CREATE TABLE product (
                product_id VARCHAR(64)  NOT NULL,
                name       VARCHAR(255) NOT NULL,
                price      BIGINT       NOT NULL,
                created_at TIMESTAMPTZ  NOT NULL,
                updated_at TIMESTAMPTZ  NOT NULL,
                PRIMARY KEY (product_id),
                CONSTRAINT product_name_key UNIQUE (name)
            )
        "#,
    },
    Migration {
        version: 1722266004,
        description: "Create 'outbox' table",
        up: r#"
            CREATE TABLE outbox (
                event_id     VARCHAR(64)  NOT NULL,
                event_type   VARCHAR(255) NOT NULL,
                aggregate_id VARCHAR(64)  NOT NULL,
                payload      TEXT         NOT NULL,
                status       VARCHAR(16)  NOT NULL,
                created_at   TIMESTAMPTZ  NOT NULL,
                PRIMARY KEY (event_id)
            );

            CREATE INDEX outbox_pending_idx ON outbox (status, created_at, event_id);
        "#,
    },
];

/// Highest version recorded in `schema_migrations`, 0 when none.
pub async fn current_version(pool: &PgPool) -> Result<i64, StoreError> {
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("create_schema_migrations", e))?;

    let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await
        .map_err(|e| map_sqlx_error("current_version", e))?;

    Ok(row.0.unwrap_or(0))
}

/// Apply every migration newer than the recorded version. Returns how many ran.
#[instrument(skip(pool), err)]
pub async fn run(pool: &PgPool) -> Result<usize, StoreError> {
    let current = current_version(pool).await?;
    let pending = pending_after(current);

    if pending.is_empty() {
        debug!(version = current, "schema is up to date");
        return Ok(0);
    }

    for migration in pending {
        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_migration", e))?;
        sqlx::raw_sql(migration.up)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("apply_migration", e))?;
        sqlx::query("INSERT INTO schema_migrations (version, description) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.description)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("record_migration", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_migration", e))?;
    }

    info!(count = pending.len(), "database migrations completed");
    Ok(pending.len())
}

fn pending_after(version: i64) -> &'static [Migration] {
    let start = MIGRATIONS.partition_point(|m| m.version <= version);
    &MIGRATIONS[start..]
}
