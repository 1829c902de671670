//! Catalog store driver boundary.
//!
//! The store is the system of record for products and reviews. It exposes
//! committed-state reads plus transactions with an exclusive per-product row lock
//! ("load with exclusive intent"), independent of the backing engine.

use async_trait::async_trait;
use thiserror::Error;

use prodreview_catalog::{Product, Review};
use prodreview_core::{ProductId, ReviewId};

use crate::deadline::Deadline;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryCatalogStore;
pub use postgres::PostgresCatalogStore;

/// Store operation error.
///
/// These are **infrastructure errors** (missing rows, locking, deadlines, database
/// failures) as opposed to domain errors (validation).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("row lock not acquired: {0}")]
    LockTimeout(String),

    #[error("transaction conflict: {0}")]
    Conflict(String),

    #[error("deadline exceeded during {0}")]
    DeadlineExceeded(String),

    #[error("{operation} affected {actual} rows, expected {expected}")]
    UnexpectedRowCount {
        operation: String,
        expected: u64,
        actual: u64,
    },

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn product_not_found(id: &ProductId) -> Self {
        Self::NotFound(format!("product {id}"))
    }

    pub fn review_not_found(id: &ReviewId) -> Self {
        Self::NotFound(format!("review {id}"))
    }

    /// Fail unless exactly one row was affected.
    pub fn expect_one_row(operation: &str, actual: u64) -> StoreResult<()> {
        if actual == 1 {
            Ok(())
        } else {
            Err(Self::UnexpectedRowCount {
                operation: operation.to_string(),
                expected: 1,
                actual,
            })
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Catalog store driver.
///
/// Reads outside a transaction observe committed state only. Every call is bound to
/// the caller's deadline.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Start a transaction. Locks taken inside it are held until commit/rollback.
    async fn begin(&self, deadline: Deadline) -> StoreResult<Box<dyn StoreTx>>;

    /// Load a product together with all of its reviews.
    async fn get_product(&self, id: &ProductId, deadline: Deadline) -> StoreResult<Product>;

    /// Load every product together with its reviews.
    async fn list_products(&self, deadline: Deadline) -> StoreResult<Vec<Product>>;

    /// Load a single review.
    async fn get_review(&self, id: &ReviewId, deadline: Deadline) -> StoreResult<Review>;

    /// Load all reviews of a product. Fails with `NotFound` for an unknown product.
    async fn list_reviews(&self, product_id: &ProductId, deadline: Deadline) -> StoreResult<Vec<Review>>;
}

/// An open store transaction.
///
/// Dropping a transaction without committing rolls it back and releases its locks.
#[async_trait]
pub trait StoreTx: Send {
    /// Take the exclusive row lock on a product and load it (without reviews).
    ///
    /// Blocks while another transaction holds the lock, up to the deadline.
    async fn lock_and_load_product(&mut self, id: &ProductId) -> StoreResult<Product>;

    /// Load the product's reviews as seen by this transaction.
    async fn load_reviews(&mut self, product_id: &ProductId) -> StoreResult<Vec<Review>>;

    /// Load a review as seen by this transaction.
    async fn load_review(&mut self, id: &ReviewId) -> StoreResult<Review>;

    async fn insert_product(&mut self, product: &Product) -> StoreResult<()>;

    /// Persist name, description and price. Exactly one row must change.
    async fn update_product(&mut self, product: &Product) -> StoreResult<()>;

    /// Persist a recomputed average. Exactly one row must change.
    async fn set_average_rating(&mut self, id: &ProductId, average: f64) -> StoreResult<()>;

    /// Delete a product and, with it, its reviews. Returns the number of products removed.
    async fn delete_product(&mut self, id: &ProductId) -> StoreResult<u64>;

    async fn insert_review(&mut self, review: &Review) -> StoreResult<()>;

    /// Persist names, text and rating. The product reference cannot change.
    async fn update_review(&mut self, review: &Review) -> StoreResult<()>;

    /// Delete a review. Returns the number of rows removed.
    async fn delete_review(&mut self, id: &ReviewId) -> StoreResult<u64>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
