//! Unit-of-work coordinators.
//!
//! [`UnitOfWork`] opens a transaction, hands the callback a
//! [`RepositoryProvider`] bound to it, and commits on `Ok` or rolls back on
//! `Err`. A panic or cancellation inside the callback drops every transaction
//! handle, which discards the transaction as well.
//!
//! [`LockableUnitOfWork`] wraps the same sequence in a named-lock critical
//! section. Locks are acquired before `begin` and released only after commit or
//! rollback has returned, so the section strictly contains the transaction:
//!
//! ```text
//! acquire(locks) -> begin -> f(tx) -> commit | rollback -> release(locks)
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::lock::{LockError, LockManager, LockSet};
use crate::store::{StoreError, TransactionalStore};

#[derive(Debug, Clone)]
pub struct UnitOfWork<S> {
    store: S,
}

impl<S> UnitOfWork<S>
where
    S: TransactionalStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run `f` inside one transaction and propagate its error unchanged.
    ///
    /// A commit failure surfaces as `E::from(StoreError)`. A rollback failure
    /// is logged and the callback's own error is returned.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(S::Transaction) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<StoreError>,
    {
        let tx = self.store.begin().await?;

        match f(tx.clone()).await {
            Ok(value) => {
                self.store.commit(tx).await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.store.rollback(tx).await {
                    warn!(error = %rollback, "rollback failed");
                } else {
                    debug!("unit of work rolled back");
                }
                Err(err)
            }
        }
    }
}

/// Unit of work guarded by a set of named locks held for its whole duration.
///
/// Waiters queue; nothing is rejected unless a lock timeout or an explicit
/// deadline is supplied.
#[derive(Debug, Clone)]
pub struct LockableUnitOfWork<S, L> {
    inner: UnitOfWork<S>,
    locks: L,
    lock_timeout: Option<Duration>,
}

impl<S, L> LockableUnitOfWork<S, L>
where
    S: TransactionalStore,
    L: LockManager,
{
    pub fn new(store: S, locks: L) -> Self {
        Self {
            inner: UnitOfWork::new(store),
            locks,
            lock_timeout: None,
        }
    }

    /// Bound every lock acquisition by `timeout`. `None` waits indefinitely.
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn store(&self) -> &S {
        self.inner.store()
    }

    pub async fn execute<F, Fut, T, E>(&self, names: &LockSet, f: F) -> Result<T, E>
    where
        F: FnOnce(S::Transaction) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError> + From<StoreError>,
    {
        let deadline = self.lock_timeout.map(|t| Instant::now() + t);
        self.run(names, deadline, f).await
    }

    /// Like [`execute`](Self::execute) but gives up waiting for locks at
    /// `deadline` with [`LockError::Timeout`]. The deadline does not apply to
    /// the transaction once the locks are held.
    pub async fn execute_with_deadline<F, Fut, T, E>(
        &self,
        names: &LockSet,
        deadline: Instant,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(S::Transaction) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError> + From<StoreError>,
    {
        self.run(names, Some(deadline), f).await
    }

    async fn run<F, Fut, T, E>(
        &self,
        names: &LockSet,
        deadline: Option<Instant>,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(S::Transaction) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError> + From<StoreError>,
    {
        let guard = match deadline {
            None => self.locks.acquire(names).await?,
            Some(deadline) => tokio::time::timeout_at(deadline, self.locks.acquire(names))
                .await
                .map_err(|_| LockError::Timeout)??,
        };

        let result = self.inner.execute(f).await;

        // The transaction is already settled; a failed release cannot change
        // its outcome.
        if let Err(err) = self.locks.release(guard).await {
            warn!(error = %err, locks = ?names, "lock release failed");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::Utc;
    use thiserror::Error;

    use productsvc_core::ProductId;
    use productsvc_products::{FindSpec, Price, Product, ProductRepository, RepositoryError};

    use super::*;
    use crate::lock::InMemoryLockManager;
    use crate::store::{InMemoryProductStore, RepositoryProvider};

    #[derive(Debug, Error, PartialEq)]
    enum TestError {
        #[error(transparent)]
        Lock(#[from] LockError),
        #[error(transparent)]
        Store(#[from] StoreError),
        #[error(transparent)]
        Repository(#[from] RepositoryError),
        #[error("rejected")]
        Rejected,
    }

    fn product(name: &str) -> Product {
        Product::new(ProductId::new(), name, Price::new(300).unwrap(), Utc::now())
    }

    #[tokio::test]
    async fn commits_when_callback_succeeds() {
        let store = InMemoryProductStore::new();
        let uow = UnitOfWork::new(store.clone());
        let p = product("Espresso");

        let id = uow
            .execute(|tx| async move {
                tx.product_repository().store(&p).await?;
                Ok::<_, TestError>(p.product_id())
            })
            .await
            .unwrap();

        assert_eq!(store.products().unwrap()[0].product_id(), id);
    }

    #[tokio::test]
    async fn rolls_back_when_callback_fails() {
        let store = InMemoryProductStore::new();
        let uow = UnitOfWork::new(store.clone());

        let err = uow
            .execute(|tx| async move {
                tx.product_repository().store(&product("Espresso")).await?;
                Err::<(), _>(TestError::Rejected)
            })
            .await
            .unwrap_err();

        assert_eq!(err, TestError::Rejected);
        assert!(store.products().unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_failure_surfaces_as_store_error() {
        let store = InMemoryProductStore::new();
        let uow = UnitOfWork::new(store.clone());

        uow.execute(|tx| async move {
            tx.product_repository().store(&product("Espresso")).await?;
            Ok::<_, TestError>(())
        })
        .await
        .unwrap();

        // Bypasses the name check a domain service would do; the store's own
        // constraint still rejects the commit.
        let err = uow
            .execute(|tx| async move {
                tx.product_repository().store(&product("Espresso")).await?;
                Ok::<_, TestError>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TestError::Store(StoreError::UniqueViolation(_))));
        assert_eq!(store.products().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn panic_inside_critical_section_rolls_back_and_releases_locks() {
        let store = InMemoryProductStore::new();
        let locks = InMemoryLockManager::new();
        let uow = Arc::new(LockableUnitOfWork::new(store.clone(), locks.clone()));
        let names = LockSet::new(["product_name_Espresso"]);

        let task = {
            let uow = uow.clone();
            let names = names.clone();
            tokio::spawn(async move {
                uow.execute(&names, |tx| async move {
                    tx.product_repository().store(&product("Espresso")).await?;
                    let repo = tx.product_repository();
                    if repo.find(&FindSpec::ByName("Espresso".into())).await.is_ok() {
                        panic!("boom");
                    }
                    Ok::<_, TestError>(())
                })
                .await
            })
        };
        assert!(task.await.unwrap_err().is_panic());

        assert!(store.products().unwrap().is_empty());
        let again = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&names)).await;
        assert!(again.is_ok(), "lock must be free after a panic");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn lock_is_held_until_the_transaction_has_committed() {
        let store = InMemoryProductStore::new();
        let uow = Arc::new(LockableUnitOfWork::new(store.clone(), InMemoryLockManager::new()));
        let names = LockSet::new(["product_name_Espresso"]);
        let trace = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let (uow, names, trace) = (uow.clone(), names.clone(), trace.clone());
            tokio::spawn(async move {
                uow.execute(&names, |tx| async move {
                    trace.lock().unwrap().push("first:enter");
                    tx.product_repository().store(&product("Espresso")).await?;
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    trace.lock().unwrap().push("first:leave");
                    Ok::<_, TestError>(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let seen = uow
            .execute(&names, |tx| {
                let trace = trace.clone();
                async move {
                    trace.lock().unwrap().push("second:enter");
                    let found = tx
                        .product_repository()
                        .find(&FindSpec::ByName("Espresso".into()))
                        .await;
                    Ok::<_, TestError>(found.is_ok())
                }
            })
            .await
            .unwrap();
        first.await.unwrap().unwrap();

        assert!(seen, "second section must observe the first section's commit");
        assert_eq!(
            *trace.lock().unwrap(),
            vec!["first:enter", "first:leave", "second:enter"]
        );
    }

    #[tokio::test]
    async fn lock_timeout_aborts_without_running_the_callback() {
        let store = InMemoryProductStore::new();
        let locks = InMemoryLockManager::new();
        let uow = LockableUnitOfWork::new(store.clone(), locks.clone())
            .with_lock_timeout(Some(Duration::from_millis(20)));
        let names = LockSet::new(["product_name_Espresso"]);
        let _held = locks.acquire(&names).await.unwrap();

        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        let err = uow
            .execute(&names, |_tx| async move {
                *flag.lock().unwrap() = true;
                Ok::<_, TestError>(())
            })
            .await
            .unwrap_err();

        assert_eq!(err, TestError::Lock(LockError::Timeout));
        assert!(!*ran.lock().unwrap());
    }

    #[tokio::test]
    async fn explicit_deadline_in_the_past_times_out_on_contention() {
        let locks = InMemoryLockManager::new();
        let uow = LockableUnitOfWork::new(InMemoryProductStore::new(), locks.clone());
        let names = LockSet::new(["product_1"]);
        let _held = locks.acquire(&names).await.unwrap();

        let err = uow
            .execute_with_deadline(&names, Instant::now(), |_tx| async move {
                Ok::<_, TestError>(())
            })
            .await
            .unwrap_err();

        assert_eq!(err, TestError::Lock(LockError::Timeout));
    }
}
