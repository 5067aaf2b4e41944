use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use productsvc_core::{EventId, ProductId};
use productsvc_products::{FindSpec, Product, ProductRepository, RepositoryError};

use crate::outbox::{DeliveryStatus, OutboxRecord};
use crate::query::{ProductQueryService, ProductView};

use super::{OutboxSource, OutboxWriter, RepositoryProvider, StoreError, TransactionalStore};

/// Only undelivered outbox records are retained: delivered ones are dropped
/// as soon as the relay confirms them.
#[derive(Debug, Default)]
struct CommittedState {
    products: BTreeMap<ProductId, Product>,
    outbox: VecDeque<OutboxRecord>,
    failed: Vec<OutboxRecord>,
}

/// Writes of one open transaction. `None` marks a hard delete.
#[derive(Debug, Default)]
struct StagedWrites {
    products: BTreeMap<ProductId, Option<Product>>,
    outbox: Vec<OutboxRecord>,
}

/// In-memory transactional product store.
///
/// Intended for tests/dev. Transactions read committed state overlaid with
/// their own staged writes and apply everything atomically at commit, where the
/// unique-name constraint is checked once more against committed state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductStore {
    state: Arc<RwLock<CommittedState>>,
    outbox_failure: Arc<Mutex<Option<String>>>,
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every outbox append fail with `reason` until cleared with `None`.
    pub fn set_outbox_failure(&self, reason: Option<String>) {
        if let Ok(mut failure) = self.outbox_failure.lock() {
            *failure = reason;
        }
    }

    /// Committed products, in identity order.
    pub fn products(&self) -> Result<Vec<Product>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.products.values().cloned().collect())
    }

    /// Committed outbox records not yet delivered, in append order.
    pub fn outbox_records(&self) -> Result<Vec<OutboxRecord>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.outbox.iter().cloned().collect())
    }

    /// Records the relay parked as undeliverable.
    pub fn failed_records(&self) -> Result<Vec<OutboxRecord>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.failed.clone())
    }
}

/// Handle to one open in-memory transaction.
#[derive(Debug, Clone)]
pub struct InMemoryTransaction {
    state: Arc<RwLock<CommittedState>>,
    staged: Arc<Mutex<Option<StagedWrites>>>,
    outbox_failure: Arc<Mutex<Option<String>>>,
}

impl InMemoryTransaction {
    fn with_staged<T>(
        &self,
        f: impl FnOnce(&CommittedState, &mut StagedWrites) -> T,
    ) -> Result<T, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        let mut staged = self.staged.lock().map_err(|_| StoreError::Poisoned)?;
        let staged = staged.as_mut().ok_or(StoreError::TransactionClosed)?;
        Ok(f(&state, staged))
    }
}

fn find_visible(state: &CommittedState, staged: &StagedWrites, spec: &FindSpec) -> Option<Product> {
    match spec {
        FindSpec::ById(id) => match staged.products.get(id) {
            Some(write) => write.clone(),
            None => state.products.get(id).cloned(),
        },
        FindSpec::ByName(name) => staged
            .products
            .values()
            .flatten()
            .find(|p| p.name() == name)
            .or_else(|| {
                state
                    .products
                    .values()
                    .filter(|p| !staged.products.contains_key(&p.product_id()))
                    .find(|p| p.name() == name)
            })
            .cloned(),
    }
}

fn check_unique_names(state: &CommittedState, staged: &StagedWrites) -> Result<(), StoreError> {
    let mut owners: BTreeMap<&str, ProductId> = BTreeMap::new();
    let committed = state
        .products
        .values()
        .filter(|p| !staged.products.contains_key(&p.product_id()));
    for product in staged.products.values().flatten().chain(committed) {
        if let Some(other) = owners.insert(product.name(), product.product_id()) {
            if other != product.product_id() {
                return Err(StoreError::UniqueViolation(format!(
                    "product name '{}' already used",
                    product.name()
                )));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl ProductRepository for InMemoryTransaction {
    async fn store(&self, product: &Product) -> Result<(), RepositoryError> {
        self.with_staged(|_, staged| {
            staged
                .products
                .insert(product.product_id(), Some(product.clone()));
        })?;
        Ok(())
    }

    async fn find(&self, spec: &FindSpec) -> Result<Product, RepositoryError> {
        self.with_staged(|state, staged| find_visible(state, staged, spec))?
            .ok_or(RepositoryError::NotFound)
    }

    async fn hard_delete(&self, product_id: ProductId) -> Result<(), RepositoryError> {
        self.with_staged(|_, staged| {
            staged.products.insert(product_id, None);
        })?;
        Ok(())
    }
}

#[async_trait]
impl OutboxWriter for InMemoryTransaction {
    async fn append(&self, record: OutboxRecord) -> Result<(), StoreError> {
        let failure = self
            .outbox_failure
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .clone();
        if let Some(reason) = failure {
            return Err(StoreError::Backend(reason));
        }
        self.with_staged(|_, staged| staged.outbox.push(record))
    }
}

impl RepositoryProvider for InMemoryTransaction {
    type Products = InMemoryTransaction;
    type Outbox = InMemoryTransaction;

    fn product_repository(&self) -> Self::Products {
        self.clone()
    }

    fn outbox(&self) -> Self::Outbox {
        self.clone()
    }
}

#[async_trait]
impl TransactionalStore for InMemoryProductStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Transaction, StoreError> {
        Ok(InMemoryTransaction {
            state: self.state.clone(),
            staged: Arc::new(Mutex::new(Some(StagedWrites::default()))),
            outbox_failure: self.outbox_failure.clone(),
        })
    }

    async fn commit(&self, tx: Self::Transaction) -> Result<(), StoreError> {
        let staged = tx
            .staged
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .take()
            .ok_or(StoreError::TransactionClosed)?;

        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        check_unique_names(&state, &staged)?;

        for (id, write) in staged.products {
            match write {
                Some(product) => {
                    state.products.insert(id, product);
                }
                None => {
                    state.products.remove(&id);
                }
            }
        }
        state.outbox.extend(staged.outbox);
        Ok(())
    }

    async fn rollback(&self, tx: Self::Transaction) -> Result<(), StoreError> {
        tx.staged
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .take()
            .ok_or(StoreError::TransactionClosed)?;
        Ok(())
    }
}

#[async_trait]
impl OutboxSource for InMemoryProductStore {
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.outbox.iter().take(limit).cloned().collect())
    }

    async fn mark_delivered(&self, ids: &[EventId]) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        state.outbox.retain(|r| !ids.contains(&r.id));
        Ok(())
    }

    async fn mark_failed(&self, ids: &[EventId]) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        let (failed, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut state.outbox)
            .into_iter()
            .partition(|r| ids.contains(&r.id));
        state.outbox = kept;
        state.failed.extend(failed.into_iter().map(|mut r| {
            r.status = DeliveryStatus::Failed;
            r
        }));
        Ok(())
    }
}

#[async_trait]
impl ProductQueryService for InMemoryProductStore {
    async fn find_product(&self, product_id: ProductId) -> Result<Option<ProductView>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.products.get(&product_id).map(ProductView::from))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use productsvc_products::Price;

    use super::*;

    fn product(name: &str) -> Product {
        Product::new(ProductId::new(), name, Price::new(100).unwrap(), Utc::now())
    }

    #[tokio::test]
    async fn staged_writes_are_invisible_until_commit() {
        let store = InMemoryProductStore::new();
        let tx = store.begin().await.unwrap();
        let p = product("Espresso");

        tx.store(&p).await.unwrap();
        assert_eq!(tx.find(&FindSpec::ById(p.product_id())).await.unwrap(), p);
        assert!(store.products().unwrap().is_empty());

        store.commit(tx).await.unwrap();
        assert_eq!(store.products().unwrap(), vec![p]);
    }

    #[tokio::test]
    async fn rollback_discards_products_and_outbox() {
        let store = InMemoryProductStore::new();
        let tx = store.begin().await.unwrap();
        tx.store(&product("Espresso")).await.unwrap();
        tx.append(OutboxRecord::pending("product_created", "x", "{}".into(), Utc::now()))
            .await
            .unwrap();

        store.rollback(tx).await.unwrap();

        assert!(store.products().unwrap().is_empty());
        assert!(store.outbox_records().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = InMemoryProductStore::new();
        {
            let tx = store.begin().await.unwrap();
            tx.store(&product("Espresso")).await.unwrap();
        }
        assert!(store.products().unwrap().is_empty());
    }

    #[tokio::test]
    async fn staged_delete_hides_committed_row() {
        let store = InMemoryProductStore::new();
        let p = product("Espresso");
        let tx = store.begin().await.unwrap();
        tx.store(&p).await.unwrap();
        store.commit(tx).await.unwrap();

        let tx = store.begin().await.unwrap();
        tx.hard_delete(p.product_id()).await.unwrap();
        assert_eq!(
            tx.find(&FindSpec::ByName("Espresso".into())).await.unwrap_err(),
            RepositoryError::NotFound
        );
        store.commit(tx).await.unwrap();
        assert!(store.find_product(p.product_id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_enforces_unique_names() {
        let store = InMemoryProductStore::new();
        let first = store.begin().await.unwrap();
        let second = store.begin().await.unwrap();
        first.store(&product("Espresso")).await.unwrap();
        second.store(&product("Espresso")).await.unwrap();

        store.commit(first).await.unwrap();
        let err = store.commit(second).await.unwrap_err();

        assert!(matches!(err, StoreError::UniqueViolation(_)));
        assert_eq!(store.products().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn handles_fail_after_the_transaction_closes() {
        let store = InMemoryProductStore::new();
        let tx = store.begin().await.unwrap();
        let stale = tx.clone();
        store.commit(tx).await.unwrap();

        let err = stale.store(&product("Espresso")).await.unwrap_err();
        assert_eq!(err, RepositoryError::from(StoreError::TransactionClosed));
        assert_eq!(store.rollback(stale).await.unwrap_err(), StoreError::TransactionClosed);
    }

    #[tokio::test]
    async fn relay_view_tracks_delivery_status() {
        let store = InMemoryProductStore::new();
        let tx = store.begin().await.unwrap();
        let record = OutboxRecord::pending("product_created", "x", "{}".into(), Utc::now());
        let id = record.id;
        tx.append(record).await.unwrap();
        store.commit(tx).await.unwrap();

        assert_eq!(store.pending(10).await.unwrap().len(), 1);
        store.mark_delivered(&[id]).await.unwrap();
        assert!(store.pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delivered_records_are_pruned() {
        let store = InMemoryProductStore::new();
        let tx = store.begin().await.unwrap();
        let records: Vec<OutboxRecord> = (0..3)
            .map(|i| {
                OutboxRecord::pending("product_created", format!("p{i}"), "{}".into(), Utc::now())
            })
            .collect();
        for record in &records {
            tx.append(record.clone()).await.unwrap();
        }
        store.commit(tx).await.unwrap();

        store.mark_delivered(&[records[0].id, records[2].id]).await.unwrap();

        let retained = store.outbox_records().unwrap();
        assert_eq!(retained.len(), 1);
        assert_eq!(retained[0].id, records[1].id);
    }

    #[tokio::test]
    async fn failed_records_leave_the_pending_queue() {
        let store = InMemoryProductStore::new();
        let tx = store.begin().await.unwrap();
        let bad = OutboxRecord::pending("product_created", "x", "not json".into(), Utc::now());
        let good = OutboxRecord::pending("product_created", "y", "{}".into(), Utc::now());
        tx.append(bad.clone()).await.unwrap();
        tx.append(good.clone()).await.unwrap();
        store.commit(tx).await.unwrap();

        store.mark_failed(&[bad.id]).await.unwrap();

        let pending = store.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, good.id);
        let failed = store.failed_records().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, DeliveryStatus::Failed);
    }
}
