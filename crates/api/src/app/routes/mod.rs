use axum::Router;

pub mod products;
pub mod system;

pub fn router() -> Router {
    Router::new().nest("/products", products::router())
}
