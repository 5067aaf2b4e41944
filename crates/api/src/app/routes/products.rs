use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", put(store_product))
        .route("/:id", get(get_product).delete(delete_product))
}

/// Create (no `product_id`) answers 201, update answers 200.
pub async fn store_product(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::StoreProductBody>,
) -> axum::response::Response {
    let request = match body.into_request() {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let status = if request.product_id.is_some() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    match services.store_product(request).await {
        Ok(id) => (
            status,
            Json(dto::StoreProductResponse {
                product_id: id.to_string(),
            }),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id = match dto::parse_product_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.find_product(product_id).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn delete_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id = match dto::parse_product_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.delete_product(product_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
