//! Catalog write/read orchestration.
//!
//! Every write runs as:
//!
//! ```text
//! validate → Store (transaction, commit) → Cache (invalidate) → Event Bus (publish)
//! ```
//!
//! and every read as:
//!
//! ```text
//! Cache (lookup) → Store (on miss) → Cache (populate)
//! ```
//!
//! Cache calls never happen while a row lock is held: invalidation starts only after
//! the transaction is gone. Publication is a post-commit side effect whose failure
//! is returned to the caller; the committed write stays in place.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use prodreview_catalog::{NewProduct, NewReview, Product, ProductPatch, Review, ReviewPatch};
use prodreview_core::{DomainError, ProductId, ReviewId};
use prodreview_events::{EventBus, ReviewAction, ReviewNotification};

use crate::cache::{CacheGeneration, CacheKey, CacheValue, ReadThroughCache};
use crate::deadline::Deadline;
use crate::rating::recompute_average_rating;
use crate::store::{CatalogStore, StoreError, StoreTx};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Lock timeout, transaction conflict or deadline exceeded. Nothing was written.
    #[error("concurrency error: {0}")]
    Concurrency(String),

    #[error("store error: {0}")]
    Store(StoreError),

    /// The write is committed; only the notification failed.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<DomainError> for CatalogError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::NotFound(msg) => Self::NotFound(msg),
        }
    }
}

impl From<StoreError> for CatalogError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => Self::NotFound(msg),
            StoreError::LockTimeout(_) | StoreError::Conflict(_) | StoreError::DeadlineExceeded(_) => {
                Self::Concurrency(e.to_string())
            }
            other => Self::Store(other),
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Orchestrates store, cache and event bus for catalog operations.
pub struct CatalogService<B> {
    store: Arc<dyn CatalogStore>,
    cache: Arc<ReadThroughCache>,
    bus: Arc<B>,
}

impl<B> Clone for CatalogService<B> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cache: self.cache.clone(),
            bus: self.bus.clone(),
        }
    }
}

impl<B> CatalogService<B>
where
    B: EventBus<String> + 'static,
{
    pub fn new(store: Arc<dyn CatalogStore>, cache: Arc<ReadThroughCache>, bus: Arc<B>) -> Self {
        Self { store, cache, bus }
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<ReadThroughCache> {
        &self.cache
    }

    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }

    // ---------------------------------------------------------------------
    // Products
    // ---------------------------------------------------------------------

    pub async fn create_product(&self, input: NewProduct, deadline: Deadline) -> CatalogResult<Product> {
        let product = Product::create(input)?;
        info!(product_id = %product.id, name = %product.name, "creating product");

        let mut tx = self.store.begin(deadline).await?;
        let outcome = tx.insert_product(&product).await.map_err(CatalogError::from);
        finish(tx, outcome).await?;

        Ok(product)
    }

    pub async fn get_product(&self, id: &str, deadline: Deadline) -> CatalogResult<Arc<Product>> {
        let id = ProductId::parse(id)?;

        if let Some(product) = self.cache.get_product(&id) {
            debug!(product_id = %id, "product cache hit");
            return Ok(product);
        }
        debug!(product_id = %id, "product cache miss");

        let key = CacheKey::Product(id.clone());
        let generation = self.cache.generation(&key);
        let product = Arc::new(self.store.get_product(&id, deadline).await?);
        self.populate(key, generation, CacheValue::Product(product.clone()));
        Ok(product)
    }

    /// All products with their reviews. Listings are not cached.
    pub async fn list_products(&self, deadline: Deadline) -> CatalogResult<Vec<Product>> {
        Ok(self.store.list_products(deadline).await?)
    }

    pub async fn edit_product(&self, id: &str, patch: ProductPatch, deadline: Deadline) -> CatalogResult<Product> {
        let id = ProductId::parse(id)?;
        patch.validate()?;
        info!(product_id = %id, "editing product");

        let mut tx = self.store.begin(deadline).await?;
        let outcome = apply_product_patch(tx.as_mut(), &id, &patch).await;
        let product = finish(tx, outcome).await?;

        self.cache.delete_product(&id);
        debug!(product_id = %id, "invalidated product entry");
        Ok(product)
    }

    /// Delete a product and its reviews. Deleting an absent product succeeds.
    pub async fn delete_product(&self, id: &str, deadline: Deadline) -> CatalogResult<()> {
        let id = ProductId::parse(id)?;
        info!(product_id = %id, "deleting product");

        let mut tx = self.store.begin(deadline).await?;
        let outcome = remove_product(tx.as_mut(), &id).await;
        let cascaded = finish(tx, outcome).await?;

        self.cache.delete_product(&id);
        self.cache.delete_reviews(&id);
        for review in &cascaded {
            self.cache.delete_review(&review.id);
        }
        debug!(product_id = %id, cascaded_reviews = cascaded.len(), "invalidated product entries");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Reviews
    // ---------------------------------------------------------------------

    pub async fn create_review(&self, input: NewReview, deadline: Deadline) -> CatalogResult<Review> {
        let review = Review::create(input)?;
        info!(review_id = %review.id, product_id = %review.product_id, rating = %review.rating, "creating review");

        let mut tx = self.store.begin(deadline).await?;
        let outcome = insert_review(tx.as_mut(), &review).await;
        let average = finish(tx, outcome).await?;
        debug!(product_id = %review.product_id, average, "review committed");

        self.invalidate_review_entries(&review.product_id, None);
        self.publish(ReviewAction::Created, &review, deadline).await?;
        Ok(review)
    }

    pub async fn get_review(&self, id: &str, deadline: Deadline) -> CatalogResult<Arc<Review>> {
        let id = ReviewId::parse(id)?;

        if let Some(review) = self.cache.get_review(&id) {
            debug!(review_id = %id, "review cache hit");
            return Ok(review);
        }
        debug!(review_id = %id, "review cache miss");

        let key = CacheKey::Review(id.clone());
        let generation = self.cache.generation(&key);
        let review = Arc::new(self.store.get_review(&id, deadline).await?);
        self.populate(key, generation, CacheValue::Review(review.clone()));
        Ok(review)
    }

    pub async fn get_reviews_by_product(&self, product_id: &str, deadline: Deadline) -> CatalogResult<Arc<Vec<Review>>> {
        let product_id = ProductId::parse(product_id)?;

        if let Some(reviews) = self.cache.get_reviews(&product_id) {
            debug!(%product_id, "review list cache hit");
            return Ok(reviews);
        }
        debug!(%product_id, "review list cache miss");

        let key = CacheKey::ReviewsForProduct(product_id.clone());
        let generation = self.cache.generation(&key);
        let reviews = Arc::new(self.store.list_reviews(&product_id, deadline).await?);
        self.populate(key, generation, CacheValue::Reviews(reviews.clone()));
        Ok(reviews)
    }

    /// Partially update a review. Empty fields and out-of-range ratings are ignored.
    pub async fn edit_review(&self, id: &str, patch: ReviewPatch, deadline: Deadline) -> CatalogResult<Review> {
        let id = ReviewId::parse(id)?;
        info!(review_id = %id, "editing review");

        let mut tx = self.store.begin(deadline).await?;
        let outcome = apply_review_patch(tx.as_mut(), &id, &patch).await;
        let review = finish(tx, outcome).await?;

        self.invalidate_review_entries(&review.product_id, Some(&review.id));
        self.publish(ReviewAction::Modified, &review, deadline).await?;
        Ok(review)
    }

    /// Delete a review and return it as it was. A missing review is `NotFound`.
    pub async fn delete_review(&self, id: &str, deadline: Deadline) -> CatalogResult<Review> {
        let id = ReviewId::parse(id)?;
        info!(review_id = %id, "deleting review");

        let mut tx = self.store.begin(deadline).await?;
        let outcome = remove_review(tx.as_mut(), &id).await;
        let review = finish(tx, outcome).await?;

        self.invalidate_review_entries(&review.product_id, Some(&review.id));
        self.publish(ReviewAction::Deleted, &review, deadline).await?;
        Ok(review)
    }

    /// Store a freshly loaded value unless a writer invalidated the key during the load.
    /// The caller still returns what it loaded.
    fn populate(&self, key: CacheKey, generation: CacheGeneration, value: CacheValue) {
        if !self.cache.set_if_generation(key.clone(), generation, value) {
            debug!(?key, "skipped populate; key was invalidated during the load");
        }
    }

    fn invalidate_review_entries(&self, product_id: &ProductId, review_id: Option<&ReviewId>) {
        self.cache.delete_product(product_id);
        self.cache.delete_reviews(product_id);
        if let Some(review_id) = review_id {
            self.cache.delete_review(review_id);
        }
        debug!(%product_id, "invalidated product and review list entries");
    }

    /// Publish on the blocking pool, bounded by the request deadline.
    ///
    /// The deadline bounds the wait, not the publish itself: a bus call still running
    /// when it passes keeps going on the blocking pool and may deliver the message after
    /// `Publish` has been returned. Consumers must tolerate such late notifications.
    async fn publish(&self, action: ReviewAction, review: &Review, deadline: Deadline) -> CatalogResult<()> {
        let message = ReviewNotification {
            action,
            rating: review.rating,
            first_name: review.first_name.clone(),
            last_name: review.last_name.clone(),
            product_id: review.product_id.clone(),
        }
        .message();

        let bus = self.bus.clone();
        let task = tokio::task::spawn_blocking(move || bus.publish(message).map_err(|e| format!("{e:?}")));

        let failure = match tokio::time::timeout_at(deadline.instant(), task).await {
            Ok(Ok(Ok(()))) => {
                debug!(review_id = %review.id, action = %action, "review notification published");
                return Ok(());
            }
            Ok(Ok(Err(e))) => e,
            Ok(Err(join_err)) => format!("publisher task failed: {join_err}"),
            Err(_) => "deadline exceeded while publishing".to_string(),
        };

        warn!(review_id = %review.id, action = %action, error = %failure, "review notification not published");
        Err(CatalogError::Publish(failure))
    }
}

/// Commit on success, roll back on failure.
///
/// A rollback error is logged; the first error is what the caller sees.
async fn finish<T>(tx: Box<dyn StoreTx>, outcome: CatalogResult<T>) -> CatalogResult<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(e)
        }
    }
}

async fn apply_product_patch(tx: &mut dyn StoreTx, id: &ProductId, patch: &ProductPatch) -> CatalogResult<Product> {
    let mut product = tx.lock_and_load_product(id).await?;
    product.apply_patch(patch)?;
    tx.update_product(&product).await?;
    product.reviews = tx.load_reviews(id).await?;
    Ok(product)
}

/// Returns the reviews removed by the cascade.
async fn remove_product(tx: &mut dyn StoreTx, id: &ProductId) -> CatalogResult<Vec<Review>> {
    match tx.lock_and_load_product(id).await {
        Ok(_) => {}
        Err(StoreError::NotFound(_)) => {
            debug!(product_id = %id, "product already absent");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    }

    let reviews = tx.load_reviews(id).await?;
    let removed = tx.delete_product(id).await?;
    StoreError::expect_one_row("delete_product", removed)?;
    Ok(reviews)
}

/// Returns the product's new average rating.
async fn insert_review(tx: &mut dyn StoreTx, review: &Review) -> CatalogResult<f64> {
    tx.lock_and_load_product(&review.product_id).await?;
    tx.insert_review(review).await?;
    Ok(recompute_average_rating(tx, &review.product_id).await?)
}

async fn apply_review_patch(tx: &mut dyn StoreTx, id: &ReviewId, patch: &ReviewPatch) -> CatalogResult<Review> {
    let review = tx.load_review(id).await?;
    tx.lock_and_load_product(&review.product_id).await?;

    // Re-read under the product lock so the patch applies to the latest committed review.
    let mut review = tx.load_review(id).await?;
    review.apply_patch(patch);
    tx.update_review(&review).await?;
    recompute_average_rating(tx, &review.product_id).await?;
    Ok(review)
}

async fn remove_review(tx: &mut dyn StoreTx, id: &ReviewId) -> CatalogResult<Review> {
    let review = tx.load_review(id).await?;
    tx.lock_and_load_product(&review.product_id).await?;

    let review = tx.load_review(id).await?;
    let removed = tx.delete_review(id).await?;
    StoreError::expect_one_row("delete_review", removed)?;
    recompute_average_rating(tx, &review.product_id).await?;
    Ok(review)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_validation_and_not_found() {
        let e: CatalogError = DomainError::validation("rating must be within [1, 5]").into();
        assert!(matches!(e, CatalogError::Validation(_)));

        let e: CatalogError = DomainError::invalid_id("product is not specified").into();
        assert!(matches!(e, CatalogError::Validation(_)));

        let e: CatalogError = DomainError::not_found("product x").into();
        assert!(matches!(e, CatalogError::NotFound(_)));
    }

    #[test]
    fn store_errors_are_classified() {
        let e: CatalogError = StoreError::LockTimeout("product p".into()).into();
        assert!(matches!(e, CatalogError::Concurrency(_)));

        let e: CatalogError = StoreError::DeadlineExceeded("commit".into()).into();
        assert!(matches!(e, CatalogError::Concurrency(_)));

        let e: CatalogError = StoreError::NotFound("review r".into()).into();
        assert!(matches!(e, CatalogError::NotFound(_)));

        let e: CatalogError = StoreError::UnexpectedRowCount {
            operation: "update_review".into(),
            expected: 1,
            actual: 0,
        }
        .into();
        assert!(matches!(e, CatalogError::Store(_)));
    }
}
