use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use productsvc_core::{DomainError, DomainResult, Entity, ProductId, ValueObject};
use productsvc_events::Event;

/// Price in the smallest currency unit (e.g. cents). Never a float.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(i64);

impl Price {
    pub fn new(minor_units: i64) -> DomainResult<Self> {
        if minor_units < 0 {
            return Err(DomainError::validation("price cannot be negative"));
        }
        Ok(Self(minor_units))
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }
}

impl ValueObject for Price {}

impl core::fmt::Display for Price {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity: Product.
///
/// Exactly one live product may hold a given name at any time. There is no
/// status field: a product exists until it is hard-deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    product_id: ProductId,
    name: String,
    price: Price,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Product {
    /// A freshly created product; both timestamps are `at`.
    pub fn new(
        product_id: ProductId,
        name: impl Into<String>,
        price: Price,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id,
            name: name.into(),
            price,
            created_at: at,
            updated_at: at,
        }
    }

    /// Rebuild a product from persisted columns.
    pub fn from_parts(
        product_id: ProductId,
        name: String,
        price: Price,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id,
            name,
            price,
            created_at,
            updated_at,
        }
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> Price {
        self.price
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// True when `name` and `price` are exactly what is stored.
    pub fn is_unchanged(&self, name: &str, price: Price) -> bool {
        self.name == name && self.price == price
    }

    pub(crate) fn apply_update(&mut self, name: String, price: Price, at: DateTime<Utc>) {
        self.name = name;
        self.price = price;
        self.updated_at = at;
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.product_id
    }
}

/// Event: ProductCreated. Carries the full initial state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub product_id: ProductId,
    pub name: String,
    pub price: Price,
    pub created_at: DateTime<Utc>,
}

/// Changed-field deltas of an update. A field is `Some` only if it is part of
/// the delta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedFields {
    pub name: Option<String>,
    pub price: Option<Price>,
}

/// Event: ProductUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductUpdated {
    pub product_id: ProductId,
    pub updated_fields: UpdatedFields,
    pub updated_at: DateTime<Utc>,
}

/// Event: ProductDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDeleted {
    pub product_id: ProductId,
    pub deleted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    Created(ProductCreated),
    Updated(ProductUpdated),
    Deleted(ProductDeleted),
}

impl ProductEvent {
    pub fn product_id(&self) -> ProductId {
        match self {
            ProductEvent::Created(e) => e.product_id,
            ProductEvent::Updated(e) => e.product_id,
            ProductEvent::Deleted(e) => e.product_id,
        }
    }
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::Created(_) => "product_created",
            ProductEvent::Updated(_) => "product_updated",
            ProductEvent::Deleted(_) => "product_deleted",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::Created(e) => e.created_at,
            ProductEvent::Updated(e) => e.updated_at,
            ProductEvent::Deleted(e) => e.deleted_at,
        }
    }

    fn aggregate_id(&self) -> String {
        self.product_id().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn negative_price_is_rejected() {
        assert_eq!(
            Price::new(-1).unwrap_err(),
            DomainError::validation("price cannot be negative")
        );
    }

    #[test]
    fn update_refreshes_only_the_update_timestamp() {
        let created = Utc::now();
        let price = Price::new(300).unwrap();
        let mut product = Product::new(ProductId::new(), "Espresso", price, created);
        let later = created + chrono::Duration::seconds(5);

        product.apply_update("Latte".to_string(), Price::new(350).unwrap(), later);

        assert_eq!(product.name(), "Latte");
        assert_eq!(product.price().minor_units(), 350);
        assert_eq!(product.created_at(), created);
        assert_eq!(product.updated_at(), later);
    }

    #[test]
    fn event_type_tags_are_stable() {
        let id = ProductId::new();
        let now = Utc::now();
        let deleted = ProductEvent::Deleted(ProductDeleted {
            product_id: id,
            deleted_at: now,
        });
        assert_eq!(deleted.event_type(), "product_deleted");
        assert_eq!(deleted.aggregate_id(), id.to_string());
        assert_eq!(deleted.occurred_at(), now);
    }

    proptest! {
        #[test]
        fn any_non_negative_amount_is_a_valid_price(minor in 0i64..=i64::MAX) {
            prop_assert_eq!(Price::new(minor).unwrap().minor_units(), minor);
        }

        #[test]
        fn any_negative_amount_is_rejected(minor in i64::MIN..0i64) {
            prop_assert!(Price::new(minor).is_err());
        }
    }
}
