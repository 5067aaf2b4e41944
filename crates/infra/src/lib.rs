//! Infrastructure layer: locks, transactional stores, unit of work, outbox,
//! schema, config and the product application service.

pub mod config;
pub mod lock;
pub mod migrations;
pub mod outbox;
pub mod product_service;
pub mod query;
pub mod store;
pub mod unit_of_work;


pub use product_service::{ProductService, ProductServiceError, StoreProductRequest};
pub use unit_of_work::{LockableUnitOfWork, UnitOfWork};
