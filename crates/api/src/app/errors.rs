use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use productsvc_infra::ProductServiceError;
use productsvc_infra::lock::LockError;

pub fn service_error_to_response(err: ProductServiceError) -> axum::response::Response {
    match err {
        ProductServiceError::NotFound => {
            json_error(StatusCode::NOT_FOUND, "not_found", "product not found")
        }
        ProductServiceError::NameAlreadyUsed => json_error(
            StatusCode::CONFLICT,
            "name_already_used",
            "product name already used",
        ),
        ProductServiceError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        ProductServiceError::Lock(LockError::Timeout) => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "lock_timeout",
            "timed out waiting for locks",
        ),
        other => {
            tracing::error!(
                error = %other,
                retryable = other.is_retryable(),
                "product request failed"
            );
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", other.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
