//! Named advisory locks.
//!
//! A [`LockManager`] serializes critical sections that would otherwise race on
//! a uniqueness invariant. It is deliberately independent of the
//! transactional store: the in-memory table is enough for a single process,
//! while multi-instance deployments need a shared substrate such as
//! [`PostgresLockManager`].
//!
//! ## Ordering
//!
//! Names are always acquired in lexicographic order, whatever order the call
//! site listed them in. [`LockSet`] is the only way to hand names to a manager
//! and it sorts and de-duplicates on construction, so two sections locking
//! `{a, b}` and `{b, a}` cannot deadlock each other.
//!
//! ## Partial holds
//!
//! Acquisition either returns a guard for every name or holds nothing. A
//! failed or cancelled acquisition drops whatever it had already taken.

pub mod in_memory;
pub mod postgres;

use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;

pub use in_memory::{InMemoryLockGuard, InMemoryLockManager};
pub use postgres::{PostgresLockGuard, PostgresLockManager};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The lock substrate could not be reached. Retryable.
    #[error("lock substrate unavailable: {0}")]
    Unavailable(String),

    /// The caller's deadline passed before every lock was granted.
    #[error("timed out waiting for locks")]
    Timeout,

    #[error("lock table poisoned")]
    Poisoned,
}

impl LockError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::Unavailable(_) | LockError::Timeout)
    }
}

/// Sorted, de-duplicated set of lock names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockSet(BTreeSet<String>);

impl LockSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Names in acquisition order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for LockSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Acquire/release over a set of named locks.
///
/// `acquire` blocks until every name in the set is held by the caller. Guards
/// also release on drop, so a panicking or cancelled caller never leaks a
/// hold; `release` is the orderly path and reports substrate errors.
#[async_trait]
pub trait LockManager: Send + Sync {
    type Guard: Send + 'static;

    async fn acquire(&self, names: &LockSet) -> Result<Self::Guard, LockError>;

    async fn release(&self, guard: Self::Guard) -> Result<(), LockError>;
}

#[async_trait]
impl<L> LockManager for std::sync::Arc<L>
where
    L: LockManager + ?Sized,
{
    type Guard = L::Guard;

    async fn acquire(&self, names: &LockSet) -> Result<Self::Guard, LockError> {
        (**self).acquire(names).await
    }

    async fn release(&self, guard: Self::Guard) -> Result<(), LockError> {
        (**self).release(guard).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn lock_set_sorts_and_dedups() {
        let set = LockSet::new(["product_name_b", "product_a", "product_name_b"]);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["product_a", "product_name_b"]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn only_infrastructure_failures_are_retryable() {
        assert!(LockError::Unavailable("down".into()).is_retryable());
        assert!(LockError::Timeout.is_retryable());
        assert!(!LockError::Poisoned.is_retryable());
    }

    proptest! {
        #[test]
        fn acquisition_order_ignores_call_site_order(
            mut names in proptest::collection::vec("[a-z]{1,6}", 0..8)
        ) {
            let forward = LockSet::new(names.clone());
            names.reverse();
            let backward = LockSet::new(names);

            let order: Vec<&str> = forward.iter().collect();
            prop_assert_eq!(&order, &backward.iter().collect::<Vec<_>>());
            prop_assert!(order.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
