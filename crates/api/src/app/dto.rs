use serde::{Deserialize, Serialize};

use productsvc_core::ProductId;
use productsvc_infra::StoreProductRequest;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// Body of `PUT /products`. A missing, null, or blank `product_id` creates.
#[derive(Debug, Deserialize)]
pub struct StoreProductBody {
    #[serde(default)]
    pub product_id: Option<String>,
    pub name: String,
    pub price: i64,
}

impl StoreProductBody {
    pub fn into_request(self) -> Result<StoreProductRequest, axum::response::Response> {
        let product_id = self
            .product_id
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(parse_product_id)
            .transpose()?;
        Ok(StoreProductRequest {
            product_id,
            name: self.name,
            price: self.price,
        })
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct StoreProductResponse {
    pub product_id: String,
}

// -------------------------
// Helpers
// -------------------------

pub fn parse_product_id(raw: &str) -> Result<ProductId, axum::response::Response> {
    raw.parse::<ProductId>().map_err(|e| {
        errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "invalid_id",
            e.to_string(),
        )
    })
}
