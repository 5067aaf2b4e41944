//! Stable external representation of product events.
//!
//! Field names are part of the contract with downstream consumers. Identities
//! are rendered as canonical UUID strings, timestamps as integer epoch seconds
//! and prices as integer minor units. The match over [`ProductEvent`] is
//! exhaustive: a new variant does not compile until it has a payload here.

use serde::Serialize;

use productsvc_events::DispatchError;
use productsvc_products::ProductEvent;

#[derive(Debug, Serialize)]
struct ProductCreatedPayload<'a> {
    product_id: String,
    name: &'a str,
    price: i64,
    created_at: i64,
}

#[derive(Debug, Serialize)]
struct UpdatedFieldsPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ProductUpdatedPayload<'a> {
    product_id: String,
    updated_fields: UpdatedFieldsPayload<'a>,
    updated_at: i64,
}

#[derive(Debug, Serialize)]
struct ProductDeletedPayload {
    product_id: String,
    deleted_at: i64,
}

pub fn serialize_event(event: &ProductEvent) -> Result<String, DispatchError> {
    let encoded = match event {
        ProductEvent::Created(e) => serde_json::to_string(&ProductCreatedPayload {
            product_id: e.product_id.to_string(),
            name: &e.name,
            price: e.price.minor_units(),
            created_at: e.created_at.timestamp(),
        }),
        ProductEvent::Updated(e) => serde_json::to_string(&ProductUpdatedPayload {
            product_id: e.product_id.to_string(),
            updated_fields: UpdatedFieldsPayload {
                name: e.updated_fields.name.as_deref(),
                price: e.updated_fields.price.map(|p| p.minor_units()),
            },
            updated_at: e.updated_at.timestamp(),
        }),
        ProductEvent::Deleted(e) => serde_json::to_string(&ProductDeletedPayload {
            product_id: e.product_id.to_string(),
            deleted_at: e.deleted_at.timestamp(),
        }),
    };

    encoded.map_err(|e| DispatchError::Serialize(e.to_string()))
}
