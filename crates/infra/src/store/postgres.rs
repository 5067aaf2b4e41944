//! Postgres-backed transactional product store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL code | Result |
//! |------------|-----------------|--------|
//! | Database (unique violation) | `23505` | `StoreError::UniqueViolation` |
//! | anything else | - | `StoreError::Backend` |
//!
//! A transaction handle wraps one `sqlx::Transaction`. The product repository
//! and the outbox writer handed out by the same handle share it, which is what
//! puts the entity row and its outbox row in one commit.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, instrument};

use productsvc_core::{EventId, ProductId};
use productsvc_products::{FindSpec, Price, Product, ProductRepository, RepositoryError};

use crate::outbox::{DeliveryStatus, OutboxRecord};
use crate::query::{ProductQueryService, ProductView};

use super::{OutboxSource, OutboxWriter, RepositoryProvider, StoreError, TransactionalStore};

#[derive(Debug, Clone)]
pub struct PostgresProductStore {
    pool: PgPool,
}

impl PostgresProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Clone)]
pub struct PostgresTransaction {
    tx: Arc<AsyncMutex<Option<Transaction<'static, Postgres>>>>,
}

impl std::fmt::Debug for PostgresTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresTransaction").finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct ProductRow {
    product_id: String,
    name: String,
    price: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            product_id: row.try_get("product_id")?,
            name: row.try_get("name")?,
            price: row.try_get("price")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let product_id = ProductId::from_str(&row.product_id)
            .map_err(|e| StoreError::backend(format!("corrupt product row: {e}")))?;
        let price = Price::new(row.price)
            .map_err(|e| StoreError::backend(format!("corrupt product row: {e}")))?;
        Ok(Product::from_parts(
            product_id,
            row.name,
            price,
            row.created_at,
            row.updated_at,
        ))
    }
}

#[derive(Debug)]
struct OutboxRow {
    event_id: String,
    event_type: String,
    aggregate_id: String,
    payload: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for OutboxRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(OutboxRow {
            event_id: row.try_get("event_id")?,
            event_type: row.try_get("event_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let id = EventId::from_str(&row.event_id)
            .map_err(|e| StoreError::backend(format!("corrupt outbox row: {e}")))?;
        let status = DeliveryStatus::parse(&row.status)
            .ok_or_else(|| StoreError::backend(format!("unknown outbox status '{}'", row.status)))?;
        Ok(OutboxRecord {
            id,
            event_type: row.event_type,
            aggregate_id: row.aggregate_id,
            payload: row.payload,
            status,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl ProductRepository for PostgresTransaction {
    #[instrument(skip(self, product), fields(product_id = %product.product_id()), err)]
    async fn store(&self, product: &Product) -> Result<(), RepositoryError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;

        sqlx::query(
            r#"
            INSERT INTO product (product_id, name, price, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (product_id) DO UPDATE SET
                name = EXCLUDED.name,
                price = EXCLUDED.price,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(product.product_id().to_string())
        .bind(product.name())
        .bind(product.price().minor_units())
        .bind(product.created_at())
        .bind(product.updated_at())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("store_product", e))?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn find(&self, spec: &FindSpec) -> Result<Product, RepositoryError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;

        let (clause, value) = match spec {
            FindSpec::ById(id) => ("product_id = $1", id.to_string()),
            FindSpec::ByName(name) => ("name = $1", name.clone()),
        };
        let sql = format!(
            "SELECT product_id, name, price, created_at, updated_at FROM product WHERE {clause}"
        );

        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("find_product", e))?
            .ok_or(RepositoryError::NotFound)?;

        let row = ProductRow::from_row(&row).map_err(|e| map_sqlx_error("decode_product", e))?;
        Ok(Product::try_from(row)?)
    }

    #[instrument(skip(self), err)]
    async fn hard_delete(&self, product_id: ProductId) -> Result<(), RepositoryError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;

        sqlx::query("DELETE FROM product WHERE product_id = $1")
            .bind(product_id.to_string())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("delete_product", e))?;

        Ok(())
    }
}

#[async_trait]
impl OutboxWriter for PostgresTransaction {
    #[instrument(
        skip(self, record),
        fields(event_id = %record.id, event_type = %record.event_type),
        err
    )]
    async fn append(&self, record: OutboxRecord) -> Result<(), StoreError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;

        sqlx::query(
            r#"
            INSERT INTO outbox (event_id, event_type, aggregate_id, payload, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.event_type)
        .bind(&record.aggregate_id)
        .bind(&record.payload)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("append_outbox", e))?;

        Ok(())
    }
}

impl RepositoryProvider for PostgresTransaction {
    type Products = PostgresTransaction;
    type Outbox = PostgresTransaction;

    fn product_repository(&self) -> Self::Products {
        self.clone()
    }

    fn outbox(&self) -> Self::Outbox {
        self.clone()
    }
}

#[async_trait]
impl TransactionalStore for PostgresProductStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Transaction, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PostgresTransaction {
            tx: Arc::new(AsyncMutex::new(Some(tx))),
        })
    }

    #[instrument(skip(self, tx), err)]
    async fn commit(&self, tx: Self::Transaction) -> Result<(), StoreError> {
        let inner = tx.tx.lock().await.take().ok_or(StoreError::TransactionClosed)?;
        inner
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        debug!("transaction committed");
        Ok(())
    }

    #[instrument(skip(self, tx), err)]
    async fn rollback(&self, tx: Self::Transaction) -> Result<(), StoreError> {
        let inner = tx.tx.lock().await.take().ok_or(StoreError::TransactionClosed)?;
        inner
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))?;
        debug!("transaction rolled back");
        Ok(())
    }
}

#[async_trait]
impl OutboxSource for PostgresProductStore {
    #[instrument(skip(self), err)]
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, event_type, aggregate_id, payload, status, created_at
            FROM outbox
            WHERE status = $1
            ORDER BY created_at ASC, event_id ASC
            LIMIT $2
            "#,
        )
        .bind(DeliveryStatus::Pending.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("pending_outbox", e))?;

        rows.iter()
            .map(|row| {
                OutboxRow::from_row(row)
                    .map_err(|e| map_sqlx_error("decode_outbox", e))
                    .and_then(OutboxRecord::try_from)
            })
            .collect()
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn mark_delivered(&self, ids: &[EventId]) -> Result<(), StoreError> {
        self.set_status(ids, DeliveryStatus::Delivered, "mark_delivered").await
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn mark_failed(&self, ids: &[EventId]) -> Result<(), StoreError> {
        self.set_status(ids, DeliveryStatus::Failed, "mark_failed").await
    }
}

impl PostgresProductStore {
    async fn set_status(
        &self,
        ids: &[EventId],
        status: DeliveryStatus,
        operation: &str,
    ) -> Result<(), StoreError> {
        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
        sqlx::query("UPDATE outbox SET status = $1 WHERE event_id = ANY($2)")
            .bind(status.as_str())
            .bind(&ids)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(())
    }
}

#[async_trait]
impl ProductQueryService for PostgresProductStore {
    #[instrument(skip(self), err)]
    async fn find_product(&self, product_id: ProductId) -> Result<Option<ProductView>, StoreError> {
        let row = sqlx::query("SELECT product_id, name, price FROM product WHERE product_id = $1")
            .bind(product_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_product_view", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let name: String = row.try_get("name").map_err(|e| map_sqlx_error("decode_product", e))?;
        let price: i64 = row.try_get("price").map_err(|e| map_sqlx_error("decode_product", e))?;
        Ok(Some(ProductView {
            product_id,
            name,
            price,
        }))
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    if is_unique_violation(&err) {
        return StoreError::UniqueViolation(format!("{operation}: {err}"));
    }
    StoreError::Backend(format!("{operation}: {err}"))
}
