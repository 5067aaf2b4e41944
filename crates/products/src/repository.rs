//! Repository port for products.
//!
//! Every method is implicitly scoped to whatever unit of work produced the
//! repository handle; implementations never open their own transaction.

use async_trait::async_trait;
use thiserror::Error;

use productsvc_core::ProductId;

use crate::product::Product;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("product not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

/// Point lookup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindSpec {
    ById(ProductId),
    ByName(String),
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Next identity for a product about to be created (time-ordered).
    fn next_id(&self) -> ProductId {
        ProductId::new()
    }

    /// Insert, or update name/price/updated_at if the identity already exists.
    async fn store(&self, product: &Product) -> Result<(), RepositoryError>;

    /// Returns `RepositoryError::NotFound` when nothing matches.
    async fn find(&self, spec: &FindSpec) -> Result<Product, RepositoryError>;

    /// Physically remove the row. No tombstone is kept.
    async fn hard_delete(&self, product_id: ProductId) -> Result<(), RepositoryError>;
}

#[async_trait]
impl<R> ProductRepository for std::sync::Arc<R>
where
    R: ProductRepository + ?Sized,
{
    fn next_id(&self) -> ProductId {
        (**self).next_id()
    }

    async fn store(&self, product: &Product) -> Result<(), RepositoryError> {
        (**self).store(product).await
    }

    async fn find(&self, spec: &FindSpec) -> Result<Product, RepositoryError> {
        (**self).find(spec).await
    }

    async fn hard_delete(&self, product_id: ProductId) -> Result<(), RepositoryError> {
        (**self).hard_delete(product_id).await
    }
}
