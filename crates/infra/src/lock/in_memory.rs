use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use super::{LockError, LockManager, LockSet};

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Process-local lock table.
///
/// Waiters queue in FIFO order on each name; nothing is rejected. Entries are
/// dropped from the table once no guard or waiter refers to them.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLockManager {
    table: LockTable,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of names currently tracked (held or waited on).
    pub fn tracked(&self) -> usize {
        self.table.lock().map(|t| t.len()).unwrap_or(0)
    }

    fn entry(&self, name: &str) -> Result<Arc<AsyncMutex<()>>, LockError> {
        let mut table = self.table.lock().map_err(|_| LockError::Poisoned)?;
        Ok(table.entry(name.to_string()).or_default().clone())
    }
}

/// Holds every lock of one [`LockSet`]. Dropping it releases them.
#[derive(Debug)]
pub struct InMemoryLockGuard {
    names: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
    table: LockTable,
}

impl Drop for InMemoryLockGuard {
    fn drop(&mut self) {
        self.guards.clear();

        let Ok(mut table) = self.table.lock() else {
            return;
        };
        for name in &self.names {
            if table.get(name).is_some_and(|m| Arc::strong_count(m) == 1) {
                table.remove(name);
            }
        }
    }
}

#[async_trait]
impl LockManager for InMemoryLockManager {
    type Guard = InMemoryLockGuard;

    async fn acquire(&self, names: &LockSet) -> Result<Self::Guard, LockError> {
        let mut guard = InMemoryLockGuard {
            names: Vec::with_capacity(names.len()),
            guards: Vec::with_capacity(names.len()),
            table: self.table.clone(),
        };

        for name in names.iter() {
            let mutex = self.entry(name)?;
            guard.names.push(name.to_string());
            guard.guards.push(mutex.lock_owned().await);
        }

        debug!(locks = ?guard.names, "locks acquired");
        Ok(guard)
    }

    async fn release(&self, guard: Self::Guard) -> Result<(), LockError> {
        debug!(locks = ?guard.names, "locks released");
        drop(guard);
        Ok(())
    }
}
