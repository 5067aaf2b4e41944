//! Application service for products.
//!
//! Turns a request into a lock set, opens a lockable unit of work and lets the
//! domain service decide inside it. Lock names:
//!
//! | resource | name |
//! |----------|------|
//! | identity | `product_<uuid>` |
//! | name     | `product_name_<name>` |
//!
//! Creation locks only the target name. Update and delete of an existing
//! product also lock its identity, which serializes two renames of different
//! products onto the same target name.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use productsvc_core::{DomainError, ProductId};
use productsvc_events::DispatchError;
use productsvc_products::{ProductDomainService, ProductError, RepositoryError};

use crate::lock::{LockError, LockManager, LockSet};
use crate::outbox::OutboxEventDispatcher;
use crate::query::{ProductQueryService, ProductView};
use crate::store::{RepositoryProvider, StoreError, TransactionalStore};
use crate::unit_of_work::LockableUnitOfWork;

const BASE_PRODUCT_LOCK: &str = "product_";

pub fn product_lock(product_id: ProductId) -> String {
    format!("{BASE_PRODUCT_LOCK}{product_id}")
}

pub fn product_name_lock(name: &str) -> String {
    format!("{BASE_PRODUCT_LOCK}name_{name}")
}

/// Create when `product_id` is `None`, update otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreProductRequest {
    #[serde(default)]
    pub product_id: Option<ProductId>,
    pub name: String,
    pub price: i64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProductServiceError {
    #[error("product not found")]
    NotFound,

    #[error("product name already used")]
    NameAlreadyUsed,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("repository failure: {0}")]
    Repository(RepositoryError),
}

impl ProductServiceError {
    /// Business-rule rejection, returned verbatim and never retried.
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::NameAlreadyUsed | Self::Validation(_)
        )
    }

    /// Infrastructure failure a caller may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Lock(err) => err.is_retryable(),
            Self::Store(StoreError::Backend(_)) => true,
            _ => false,
        }
    }
}

impl From<DomainError> for ProductServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::NotFound => Self::NotFound,
            DomainError::NameAlreadyUsed => Self::NameAlreadyUsed,
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
        }
    }
}

impl From<ProductError> for ProductServiceError {
    fn from(value: ProductError) -> Self {
        match value {
            ProductError::Domain(err) => err.into(),
            ProductError::Repository(err) => Self::Repository(err),
            ProductError::Dispatch(err) => Self::Dispatch(err),
        }
    }
}

type TxDomainService<P> = ProductDomainService<
    <P as RepositoryProvider>::Products,
    OutboxEventDispatcher<<P as RepositoryProvider>::Outbox>,
>;

/// Domain service wired to one transaction: repository and outbox share it.
fn domain_service<P: RepositoryProvider>(tx: &P) -> TxDomainService<P> {
    ProductDomainService::new(tx.product_repository(), OutboxEventDispatcher::new(tx.outbox()))
}

#[derive(Debug, Clone)]
pub struct ProductService<S, L> {
    uow: LockableUnitOfWork<S, L>,
}

impl<S, L> ProductService<S, L>
where
    S: TransactionalStore + ProductQueryService,
    L: LockManager,
{
    pub fn new(uow: LockableUnitOfWork<S, L>) -> Self {
        Self { uow }
    }

    #[instrument(
        skip(self, request),
        fields(product_id = ?request.product_id, name = %request.name)
    )]
    pub async fn store_product(
        &self,
        request: StoreProductRequest,
    ) -> Result<ProductId, ProductServiceError> {
        let StoreProductRequest {
            product_id,
            name,
            price,
        } = request;

        let mut names = Vec::with_capacity(2);
        if let Some(id) = product_id {
            names.push(product_lock(id));
        }
        names.push(product_name_lock(&name));
        let locks = LockSet::new(names);

        let result: Result<ProductId, ProductServiceError> = self
            .uow
            .execute(&locks, |tx| async move {
                let service = domain_service(&tx);
                let id = match product_id {
                    None => service.create_product(&name, price).await?,
                    Some(id) => {
                        service.update_product(id, &name, price).await?;
                        id
                    }
                };
                Ok::<_, ProductServiceError>(id)
            })
            .await;

        log_rejection(&result);
        result
    }

    /// The name lock is taken for whatever name the read path shows right
    /// now. A concurrent rename can make it stale, which only costs
    /// serialization against the old name; a delete never claims a name.
    #[instrument(skip(self))]
    pub async fn delete_product(&self, product_id: ProductId) -> Result<(), ProductServiceError> {
        let mut names = vec![product_lock(product_id)];
        if let Some(view) = self.uow.store().find_product(product_id).await? {
            names.push(product_name_lock(&view.name));
        }

        let result: Result<(), ProductServiceError> = self
            .uow
            .execute(&LockSet::new(names), |tx| async move {
                domain_service(&tx).delete_product(product_id).await?;
                Ok::<_, ProductServiceError>(())
            })
            .await;

        log_rejection(&result);
        result
    }

    /// Read path: committed state only, no locks, no unit of work.
    pub async fn find_product(
        &self,
        product_id: ProductId,
    ) -> Result<ProductView, ProductServiceError> {
        self.uow
            .store()
            .find_product(product_id)
            .await?
            .ok_or(ProductServiceError::NotFound)
    }
}

fn log_rejection<T>(result: &Result<T, ProductServiceError>) {
    if let Err(err) = result {
        if err.is_business() {
            info!(error = %err, "product request rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_names_are_scoped_by_resource() {
        let id = ProductId::new();
        assert_eq!(product_lock(id), format!("product_{id}"));
        assert_eq!(product_name_lock("Espresso"), "product_name_Espresso");
    }

    #[test]
    fn name_lock_never_collides_with_identity_lock() {
        let id = ProductId::new();
        assert_ne!(product_lock(id), product_name_lock(&id.to_string()));
    }

    #[test]
    fn domain_errors_map_to_business_errors() {
        let cases = [
            (ProductError::Domain(DomainError::NotFound), ProductServiceError::NotFound),
            (
                ProductError::Domain(DomainError::NameAlreadyUsed),
                ProductServiceError::NameAlreadyUsed,
            ),
            (
                ProductError::Domain(DomainError::validation("name cannot be empty")),
                ProductServiceError::Validation("name cannot be empty".into()),
            ),
        ];
        for (input, expected) in cases {
            let mapped = ProductServiceError::from(input);
            assert!(mapped.is_business());
            assert!(!mapped.is_retryable());
            assert_eq!(mapped, expected);
        }
    }

    #[test]
    fn infrastructure_errors_are_not_business_errors() {
        let unavailable = ProductServiceError::from(LockError::Unavailable("conn refused".into()));
        assert!(!unavailable.is_business());
        assert!(unavailable.is_retryable());

        let poisoned = ProductServiceError::from(LockError::Poisoned);
        assert!(!poisoned.is_retryable());

        let dispatch =
            ProductServiceError::from(ProductError::Dispatch(DispatchError::Append("down".into())));
        assert!(!dispatch.is_business());
        assert!(matches!(dispatch, ProductServiceError::Dispatch(_)));

        let repo =
            ProductServiceError::from(ProductError::Repository(RepositoryError::storage("io")));
        assert_eq!(repo, ProductServiceError::Repository(RepositoryError::storage("io")));
    }

    #[test]
    fn request_without_identity_deserializes_as_create() {
        let req: StoreProductRequest =
            serde_json::from_str(r#"{"name":"Espresso","price":300}"#).unwrap();
        assert_eq!(req.product_id, None);
    }
}
