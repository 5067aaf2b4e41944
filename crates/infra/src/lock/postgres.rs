//! Postgres advisory locks as a shared lock substrate.
//!
//! Each acquisition opens a dedicated lock-only transaction and takes
//! `pg_advisory_xact_lock` per name, in [`LockSet`] order. The locks live
//! exactly as long as that transaction: `release` commits it, and dropping the
//! guard (panic, cancellation) rolls it back, which frees them as well.
//!
//! Every waiter parks a connection inside `pg_advisory_xact_lock`, so the lock
//! manager must own a pool separate from the transactional store's. Sharing
//! one lets queued waiters starve the holder of the connection it needs to
//! begin its own transaction.
//!
//! Names are hashed to the 64-bit advisory key space with
//! `hashtextextended`. Two names that collide simply serialize against each
//! other; advisory locks are re-entrant within a session, so a collision inside
//! one set cannot self-deadlock.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument};

use super::{LockError, LockManager, LockSet};

#[derive(Debug, Clone)]
pub struct PostgresLockManager {
    pool: PgPool,
}

/// Pool acquire bound used when callers wait for locks without a deadline.
const UNBOUNDED_LOCK_WAIT: Duration = Duration::from_secs(60 * 60);

impl PostgresLockManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a dedicated lock pool of `max_connections`.
    ///
    /// Waiting for a pool connection is part of waiting for the lock, so it is
    /// bounded by `lock_timeout` when one is set.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        lock_timeout: Option<Duration>,
    ) -> Result<Self, LockError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(lock_timeout.unwrap_or(UNBOUNDED_LOCK_WAIT))
            .connect(database_url)
            .await
            .map_err(unavailable)?;
        Ok(Self::new(pool))
    }
}

pub struct PostgresLockGuard {
    names: Vec<String>,
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PostgresLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresLockGuard")
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LockManager for PostgresLockManager {
    type Guard = PostgresLockGuard;

    #[instrument(skip(self), fields(locks = names.len()), err)]
    async fn acquire(&self, names: &LockSet) -> Result<Self::Guard, LockError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        for name in names.iter() {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;
        }

        debug!(locks = ?names, "advisory locks acquired");
        Ok(PostgresLockGuard {
            names: names.iter().map(str::to_string).collect(),
            tx,
        })
    }

    #[instrument(skip(self, guard), fields(locks = ?guard.names), err)]
    async fn release(&self, guard: Self::Guard) -> Result<(), LockError> {
        guard.tx.commit().await.map_err(unavailable)?;
        debug!("advisory locks released");
        Ok(())
    }
}

fn unavailable(err: sqlx::Error) -> LockError {
    LockError::Unavailable(err.to_string())
}
