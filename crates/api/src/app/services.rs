//! Backend selection: in-memory (dev/test) or Postgres.
//!
//! Both variants wire the same `ProductService`; they differ only in the store
//! and lock substrate behind it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::Value;

use productsvc_core::ProductId;
use productsvc_events::{EventEnvelope, InMemoryEventBus};
use productsvc_infra::config::ServiceConfig;
use productsvc_infra::lock::{InMemoryLockManager, PostgresLockManager};
use productsvc_infra::migrations;
use productsvc_infra::outbox::OutboxRelay;
use productsvc_infra::outbox::relay::RelayHandle;
use productsvc_infra::query::ProductView;
use productsvc_infra::store::{InMemoryProductStore, PostgresProductStore};
use productsvc_infra::{
    LockableUnitOfWork, ProductService, ProductServiceError, StoreProductRequest,
};

pub type RelayBus = Arc<InMemoryEventBus<EventEnvelope<Value>>>;

pub enum AppServices {
    InMemory {
        products: ProductService<InMemoryProductStore, InMemoryLockManager>,
        store: InMemoryProductStore,
    },
    Postgres {
        products: ProductService<PostgresProductStore, PostgresLockManager>,
        store: PostgresProductStore,
    },
}

impl AppServices {
    pub async fn from_config(config: &ServiceConfig) -> anyhow::Result<Self> {
        match &config.database_url {
            Some(url) => Self::postgres(config, url).await,
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory store and lock table");
                Ok(Self::in_memory(config))
            }
        }
    }

    pub fn in_memory(config: &ServiceConfig) -> Self {
        let store = InMemoryProductStore::new();
        let uow = LockableUnitOfWork::new(store.clone(), InMemoryLockManager::new())
            .with_lock_timeout(config.lock_timeout);
        AppServices::InMemory {
            products: ProductService::new(uow),
            store,
        }
    }

    pub async fn postgres(config: &ServiceConfig, database_url: &str) -> anyhow::Result<Self> {
        let store = PostgresProductStore::connect(database_url, config.db_max_connections)
            .await
            .context("failed to connect to Postgres")?;
        let applied = migrations::run(store.pool())
            .await
            .context("failed to apply migrations")?;
        tracing::info!(applied, "schema ready");

        // Lock waiters park connections; they must not drain the store's pool.
        let locks = PostgresLockManager::connect(
            database_url,
            config.db_lock_max_connections,
            config.lock_timeout,
        )
        .await
        .context("failed to open the advisory-lock pool")?;
        let uow = LockableUnitOfWork::new(store.clone(), locks)
            .with_lock_timeout(config.lock_timeout);
        Ok(AppServices::Postgres {
            products: ProductService::new(uow),
            store,
        })
    }

    pub async fn store_product(
        &self,
        request: StoreProductRequest,
    ) -> Result<ProductId, ProductServiceError> {
        match self {
            AppServices::InMemory { products, .. } => products.store_product(request).await,
            AppServices::Postgres { products, .. } => products.store_product(request).await,
        }
    }

    pub async fn delete_product(&self, product_id: ProductId) -> Result<(), ProductServiceError> {
        match self {
            AppServices::InMemory { products, .. } => products.delete_product(product_id).await,
            AppServices::Postgres { products, .. } => products.delete_product(product_id).await,
        }
    }

    pub async fn find_product(
        &self,
        product_id: ProductId,
    ) -> Result<ProductView, ProductServiceError> {
        match self {
            AppServices::InMemory { products, .. } => products.find_product(product_id).await,
            AppServices::Postgres { products, .. } => products.find_product(product_id).await,
        }
    }

    /// Start the outbox relay loop against `bus`.
    pub fn spawn_relay(&self, bus: RelayBus, interval: Duration, batch: usize) -> RelayHandle {
        match self {
            AppServices::InMemory { store, .. } => {
                OutboxRelay::new(store.clone(), bus).spawn(interval, batch)
            }
            AppServices::Postgres { store, .. } => {
                OutboxRelay::new(store.clone(), bus).spawn(interval, batch)
            }
        }
    }
}
