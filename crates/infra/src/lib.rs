//! Infrastructure layer: store drivers, cache, rating recomputation, write/read
//! orchestration, event channel adapters and configuration.

pub mod cache;
pub mod catalog_service;
pub mod config;
pub mod deadline;
pub mod event_bus;
pub mod rating;
pub mod store;


pub use cache::{CacheConfig, CacheGeneration, CacheKey, CacheValue, ReadThroughCache};
pub use catalog_service::{CatalogError, CatalogResult, CatalogService};
pub use config::{ConfigError, ServiceConfig};
pub use deadline::Deadline;
pub use rating::recompute_average_rating;
pub use store::{CatalogStore, InMemoryCatalogStore, PostgresCatalogStore, StoreError, StoreResult, StoreTx};
