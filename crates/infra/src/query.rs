//! Read path.
//!
//! Queries go straight to committed state. They take no locks and open no
//! unit of work, so a reader never waits behind a writer's critical section.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use productsvc_core::ProductId;
use productsvc_products::Product;

use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductView {
    pub product_id: ProductId,
    pub name: String,
    pub price: i64,
}

impl From<&Product> for ProductView {
    fn from(product: &Product) -> Self {
        Self {
            product_id: product.product_id(),
            name: product.name().to_string(),
            price: product.price().minor_units(),
        }
    }
}

#[async_trait]
pub trait ProductQueryService: Send + Sync {
    /// `Ok(None)` when no committed product has this identity.
    async fn find_product(&self, product_id: ProductId) -> Result<Option<ProductView>, StoreError>;
}
