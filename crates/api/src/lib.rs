//! HTTP API: router, handlers, and request/response mapping for the product
//! service.

pub mod app;
