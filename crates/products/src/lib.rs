//! Products domain module.
//!
//! Business rules for the product catalogue: the entity, its events, the
//! repository port and the domain service that enforces name uniqueness and
//! no-op detection. No IO happens here; storage and locking are injected.

pub mod product;
pub mod repository;
pub mod service;

pub use product::{
    Price, Product, ProductCreated, ProductDeleted, ProductEvent, ProductUpdated, UpdatedFields,
};
pub use repository::{FindSpec, ProductRepository, RepositoryError};
pub use service::{ProductDomainService, ProductError};
