//! Transactional state store boundary.
//!
//! A [`TransactionalStore`] hands out transaction handles. Each handle is a
//! [`RepositoryProvider`]: every repository or outbox writer obtained from it
//! reads and writes inside that one transaction, so the entity row and its
//! outbox record commit or roll back together.
//!
//! Handles are cheap to clone and share the underlying transaction. Once the
//! coordinator commits or rolls back, any clone still lying around fails with
//! [`StoreError::TransactionClosed`]. Dropping the last handle of an open
//! transaction discards it.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use productsvc_core::EventId;
use productsvc_products::{ProductRepository, RepositoryError};

use crate::outbox::OutboxRecord;

pub use in_memory::{InMemoryProductStore, InMemoryTransaction};
pub use postgres::{PostgresProductStore, PostgresTransaction};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store's own unique constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("transaction already committed or rolled back")]
    TransactionClosed,

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("store state poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

impl From<StoreError> for RepositoryError {
    fn from(value: StoreError) -> Self {
        RepositoryError::Storage(value.to_string())
    }
}

/// Appends outbox records inside the current transaction.
#[async_trait]
pub trait OutboxWriter: Send + Sync {
    async fn append(&self, record: OutboxRecord) -> Result<(), StoreError>;
}

/// Committed outbox records, as seen by the relay.
#[async_trait]
pub trait OutboxSource: Send + Sync {
    /// Pending records in creation order, at most `limit`.
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError>;

    async fn mark_delivered(&self, ids: &[EventId]) -> Result<(), StoreError>;

    /// Park records that can never be published so they stop blocking the
    /// ones behind them.
    async fn mark_failed(&self, ids: &[EventId]) -> Result<(), StoreError>;
}

/// Repositories bound to one open transaction.
pub trait RepositoryProvider: Clone + Send + Sync + 'static {
    type Products: ProductRepository + 'static;
    type Outbox: OutboxWriter + 'static;

    fn product_repository(&self) -> Self::Products;

    fn outbox(&self) -> Self::Outbox;
}

#[async_trait]
pub trait TransactionalStore: Send + Sync {
    type Transaction: RepositoryProvider;

    async fn begin(&self) -> Result<Self::Transaction, StoreError>;

    async fn commit(&self, tx: Self::Transaction) -> Result<(), StoreError>;

    async fn rollback(&self, tx: Self::Transaction) -> Result<(), StoreError>;
}
