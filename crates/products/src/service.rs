//! Domain service: business-invariant enforcement for products.
//!
//! Each operation is a read-check-write sequence against the repository
//! followed by exactly one emitted event (or none, for a no-op update). The
//! service does no locking of its own: the uniqueness check and the store that
//! follows are only safe when the caller holds the name-scoped lock for the
//! whole operation.

use chrono::Utc;
use thiserror::Error;

use productsvc_core::{DomainError, ProductId};
use productsvc_events::{DispatchError, EventDispatcher};

use crate::product::{
    Price, Product, ProductCreated, ProductDeleted, ProductEvent, ProductUpdated, UpdatedFields,
};
use crate::repository::{FindSpec, ProductRepository, RepositoryError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProductError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("repository failure: {0}")]
    Repository(RepositoryError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl From<RepositoryError> for ProductError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => ProductError::Domain(DomainError::NotFound),
            other => ProductError::Repository(other),
        }
    }
}

pub struct ProductDomainService<R, D> {
    repository: R,
    dispatcher: D,
}

impl<R, D> ProductDomainService<R, D>
where
    R: ProductRepository,
    D: EventDispatcher<ProductEvent>,
{
    pub fn new(repository: R, dispatcher: D) -> Self {
        Self {
            repository,
            dispatcher,
        }
    }

    pub async fn create_product(&self, name: &str, price: i64) -> Result<ProductId, ProductError> {
        let price = validate(name, price)?;

        match self.repository.find(&FindSpec::ByName(name.to_string())).await {
            Ok(_) => return Err(DomainError::NameAlreadyUsed.into()),
            Err(RepositoryError::NotFound) => {}
            Err(e) => return Err(ProductError::Repository(e)),
        }

        let product_id = self.repository.next_id();
        let now = Utc::now();
        self.repository
            .store(&Product::new(product_id, name, price, now))
            .await?;

        self.dispatcher
            .dispatch(ProductEvent::Created(ProductCreated {
                product_id,
                name: name.to_string(),
                price,
                created_at: now,
            }))
            .await?;

        Ok(product_id)
    }

    /// Both `name` and `price` are required. When both equal the stored values
    /// the call succeeds without writing or emitting anything.
    pub async fn update_product(
        &self,
        product_id: ProductId,
        name: &str,
        price: i64,
    ) -> Result<(), ProductError> {
        let price = validate(name, price)?;

        let mut product = self.repository.find(&FindSpec::ById(product_id)).await?;
        if product.is_unchanged(name, price) {
            return Ok(());
        }

        if product.name() != name {
            match self.repository.find(&FindSpec::ByName(name.to_string())).await {
                Ok(existing) if existing.product_id() != product_id => {
                    return Err(DomainError::NameAlreadyUsed.into());
                }
                Ok(_) | Err(RepositoryError::NotFound) => {}
                Err(e) => return Err(ProductError::Repository(e)),
            }
        }

        let now = Utc::now();
        product.apply_update(name.to_string(), price, now);
        self.repository.store(&product).await?;

        // The delta always carries both fields: either nothing changed (no-op
        // above) or the caller supplied both as the new values.
        self.dispatcher
            .dispatch(ProductEvent::Updated(ProductUpdated {
                product_id,
                updated_fields: UpdatedFields {
                    name: Some(name.to_string()),
                    price: Some(price),
                },
                updated_at: now,
            }))
            .await?;

        Ok(())
    }

    pub async fn delete_product(&self, product_id: ProductId) -> Result<(), ProductError> {
        self.repository.find(&FindSpec::ById(product_id)).await?;
        self.repository.hard_delete(product_id).await?;

        self.dispatcher
            .dispatch(ProductEvent::Deleted(ProductDeleted {
                product_id,
                deleted_at: Utc::now(),
            }))
            .await?;

        Ok(())
    }
}

fn validate(name: &str, price: i64) -> Result<Price, DomainError> {
    if name.trim().is_empty() {
        return Err(DomainError::validation("name cannot be empty"));
    }
    Price::new(price)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;

    // --- Mocks ---

    #[derive(Default)]
    struct MockProductRepository {
        products: Mutex<HashMap<ProductId, Product>>,
        simulate_error: Mutex<Option<RepositoryError>>,
    }

    impl MockProductRepository {
        fn fail_with(&self, err: RepositoryError) {
            *self.simulate_error.lock().unwrap() = Some(err);
        }

        fn check(&self) -> Result<(), RepositoryError> {
            match self.simulate_error.lock().unwrap().clone() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        fn get(&self, id: ProductId) -> Option<Product> {
            self.products.lock().unwrap().get(&id).cloned()
        }

        fn len(&self) -> usize {
            self.products.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ProductRepository for MockProductRepository {
        async fn store(&self, product: &Product) -> Result<(), RepositoryError> {
            self.check()?;
            self.products
                .lock()
                .unwrap()
                .insert(product.product_id(), product.clone());
            Ok(())
        }

        async fn find(&self, spec: &FindSpec) -> Result<Product, RepositoryError> {
            self.check()?;
            let products = self.products.lock().unwrap();
            let found = match spec {
                FindSpec::ById(id) => products.get(id).cloned(),
                FindSpec::ByName(name) => products.values().find(|p| p.name() == name).cloned(),
            };
            found.ok_or(RepositoryError::NotFound)
        }

        async fn hard_delete(&self, product_id: ProductId) -> Result<(), RepositoryError> {
            self.check()?;
            self.products.lock().unwrap().remove(&product_id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockEventDispatcher {
        dispatched: Mutex<Vec<ProductEvent>>,
    }

    impl MockEventDispatcher {
        fn events(&self) -> Vec<ProductEvent> {
            self.dispatched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventDispatcher<ProductEvent> for MockEventDispatcher {
        async fn dispatch(&self, event: ProductEvent) -> Result<(), DispatchError> {
            self.dispatched.lock().unwrap().push(event);
            Ok(())
        }
    }

    type Service = ProductDomainService<Arc<MockProductRepository>, Arc<MockEventDispatcher>>;

    fn setup() -> (Service, Arc<MockProductRepository>, Arc<MockEventDispatcher>) {
        let repository = Arc::new(MockProductRepository::default());
        let dispatcher = Arc::new(MockEventDispatcher::default());
        let service = ProductDomainService::new(repository.clone(), dispatcher.clone());
        (service, repository, dispatcher)
    }

    #[tokio::test]
    async fn create_product_stores_and_emits_created() {
        let (service, repository, dispatcher) = setup();

        let id = service.create_product("Espresso", 300).await.unwrap();

        let stored = repository.get(id).unwrap();
        assert_eq!(stored.name(), "Espresso");
        assert_eq!(stored.price().minor_units(), 300);
        assert_eq!(stored.created_at(), stored.updated_at());

        match dispatcher.events().as_slice() {
            [ProductEvent::Created(e)] => {
                assert_eq!(e.product_id, id);
                assert_eq!(e.name, "Espresso");
                assert_eq!(e.price.minor_units(), 300);
                assert_eq!(e.created_at, stored.created_at());
            }
            other => panic!("expected one ProductCreated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_product_rejects_used_name_without_side_effects() {
        let (service, repository, dispatcher) = setup();
        service.create_product("Espresso", 300).await.unwrap();

        let err = service.create_product("Espresso", 500).await.unwrap_err();

        assert_eq!(err, ProductError::Domain(DomainError::NameAlreadyUsed));
        assert_eq!(repository.len(), 1);
        assert_eq!(dispatcher.events().len(), 1);
    }

    #[tokio::test]
    async fn create_product_surfaces_repository_errors_unchanged() {
        let (service, repository, dispatcher) = setup();
        repository.fail_with(RepositoryError::storage("connection reset"));

        let err = service.create_product("Espresso", 300).await.unwrap_err();

        assert_eq!(
            err,
            ProductError::Repository(RepositoryError::storage("connection reset"))
        );
        assert!(dispatcher.events().is_empty());
    }

    #[tokio::test]
    async fn create_product_validates_before_lookup() {
        let (service, repository, _) = setup();
        repository.fail_with(RepositoryError::storage("must not be reached"));

        let err = service.create_product("  ", 300).await.unwrap_err();
        assert!(matches!(err, ProductError::Domain(DomainError::Validation(_))));

        let err = service.create_product("Espresso", -1).await.unwrap_err();
        assert!(matches!(err, ProductError::Domain(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn update_with_identical_values_is_a_no_op() {
        let (service, repository, dispatcher) = setup();
        let id = service.create_product("Espresso", 300).await.unwrap();
        let before = repository.get(id).unwrap();

        service.update_product(id, "Espresso", 300).await.unwrap();

        assert_eq!(repository.get(id).unwrap().updated_at(), before.updated_at());
        assert_eq!(dispatcher.events().len(), 1);
    }

    #[tokio::test]
    async fn update_price_only_emits_delta_with_unchanged_name() {
        let (service, repository, dispatcher) = setup();
        let id = service.create_product("Espresso", 300).await.unwrap();

        service.update_product(id, "Espresso", 320).await.unwrap();

        let stored = repository.get(id).unwrap();
        assert_eq!(stored.price().minor_units(), 320);
        match dispatcher.events().last() {
            Some(ProductEvent::Updated(e)) => {
                assert_eq!(e.product_id, id);
                assert_eq!(e.updated_fields.price, Some(Price::new(320).unwrap()));
                assert_eq!(e.updated_fields.name.as_deref(), Some("Espresso"));
                assert_eq!(e.updated_at, stored.updated_at());
            }
            other => panic!("expected ProductUpdated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_rename_to_free_name_succeeds() {
        let (service, repository, dispatcher) = setup();
        let id = service.create_product("Espresso", 300).await.unwrap();

        service.update_product(id, "Latte", 350).await.unwrap();

        assert_eq!(repository.get(id).unwrap().name(), "Latte");
        match dispatcher.events().last() {
            Some(ProductEvent::Updated(e)) => {
                assert_eq!(e.updated_fields.name.as_deref(), Some("Latte"));
                assert_eq!(e.updated_fields.price, Some(Price::new(350).unwrap()));
            }
            other => panic!("expected ProductUpdated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_rename_to_taken_name_fails() {
        let (service, repository, dispatcher) = setup();
        let espresso = service.create_product("Espresso", 300).await.unwrap();
        service.create_product("Latte", 350).await.unwrap();

        let err = service
            .update_product(espresso, "Latte", 300)
            .await
            .unwrap_err();

        assert_eq!(err, ProductError::Domain(DomainError::NameAlreadyUsed));
        assert_eq!(repository.get(espresso).unwrap().name(), "Espresso");
        assert_eq!(dispatcher.events().len(), 2);
    }

    #[tokio::test]
    async fn update_missing_product_is_not_found() {
        let (service, _, dispatcher) = setup();

        let err = service
            .update_product(ProductId::new(), "Latte", 350)
            .await
            .unwrap_err();

        assert_eq!(err, ProductError::Domain(DomainError::NotFound));
        assert!(dispatcher.events().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_row_and_emits_deleted() {
        let (service, repository, dispatcher) = setup();
        let id = service.create_product("Espresso", 300).await.unwrap();

        service.delete_product(id).await.unwrap();

        assert!(repository.get(id).is_none());
        match dispatcher.events().last() {
            Some(ProductEvent::Deleted(e)) => assert_eq!(e.product_id, id),
            other => panic!("expected ProductDeleted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_missing_product_is_not_found_and_silent() {
        let (service, _, dispatcher) = setup();

        let err = service.delete_product(ProductId::new()).await.unwrap_err();

        assert_eq!(err, ProductError::Domain(DomainError::NotFound));
        assert!(dispatcher.events().is_empty());
    }

    #[tokio::test]
    async fn deleted_name_can_be_reused() {
        let (service, _, _) = setup();
        let id = service.create_product("Espresso", 300).await.unwrap();
        service.delete_product(id).await.unwrap();

        let again = service.create_product("Espresso", 310).await.unwrap();
        assert_ne!(again, id);
    }
}
