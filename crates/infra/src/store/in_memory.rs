//! In-memory catalog store for tests/dev.
//!
//! Committed rows live behind a `RwLock`. Each product row has its own async mutex
//! that plays the role of the exclusive row lock. A transaction stages its writes in a
//! private overlay, applies them in one step at commit, and only then releases its
//! row locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use prodreview_catalog::{Product, Review};
use prodreview_core::{Price, ProductId, ReviewId};

use super::{CatalogStore, StoreError, StoreResult, StoreTx};
use crate::deadline::Deadline;

#[derive(Debug, Clone)]
struct ProductRow {
    id: ProductId,
    name: String,
    description: String,
    price: Price,
    average_rating: f64,
    created_at: DateTime<Utc>,
}

impl ProductRow {
    fn from_product(product: &Product) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            description: product.description.clone(),
            price: product.price.clone(),
            average_rating: product.average_rating,
            created_at: product.created_at,
        }
    }

    fn into_product(self, reviews: Vec<Review>) -> Product {
        let mut product = Product {
            id: self.id,
            name: self.name,
            description: self.description,
            price: self.price,
            average_rating: self.average_rating,
            reviews,
            created_at: self.created_at,
        };
        product.sort_reviews();
        product
    }
}

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<ProductId, ProductRow>,
    reviews: HashMap<ReviewId, Review>,
}

impl Tables {
    fn reviews_of(&self, product_id: &ProductId) -> Vec<Review> {
        self.reviews
            .values()
            .filter(|r| &r.product_id == product_id)
            .cloned()
            .collect()
    }
}

/// Per-product exclusive locks, created on first use and dropped once nobody holds or
/// waits for them.
#[derive(Debug, Default)]
struct RowLocks {
    locks: Mutex<HashMap<ProductId, Arc<tokio::sync::Mutex<()>>>>,
}

impl RowLocks {
    fn handle(&self, id: &ProductId) -> StoreResult<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StoreError::Database("row lock table poisoned".to_string()))?;
        Ok(locks.entry(id.clone()).or_default().clone())
    }

    /// Forget the locks in `ids` that only the table itself still references.
    ///
    /// Waiters clone the handle before awaiting it, so a count of one means no holder
    /// and no waiter.
    fn prune<'a>(&self, ids: impl IntoIterator<Item = &'a ProductId>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        for id in ids {
            if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(id);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

/// Row locks held by one transaction. Released (and pruned) on drop.
struct HeldLocks {
    table: Arc<RowLocks>,
    guards: HashMap<ProductId, OwnedMutexGuard<()>>,
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        let ids: Vec<ProductId> = self.guards.drain().map(|(id, _guard)| id).collect();
        self.table.prune(&ids);
    }
}

/// In-memory catalog store.
///
/// Intended for tests/dev. Cloning yields another handle to the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalogStore {
    tables: Arc<RwLock<Tables>>,
    row_locks: Arc<RowLocks>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> StoreResult<T> {
        read_tables(&self.tables, f)
    }
}

fn read_tables<T>(tables: &RwLock<Tables>, f: impl FnOnce(&Tables) -> T) -> StoreResult<T> {
    let tables = tables
        .read()
        .map_err(|_| StoreError::Database("lock poisoned".to_string()))?;
    Ok(f(&tables))
}

fn check_deadline(deadline: &Deadline, operation: &str) -> StoreResult<()> {
    if deadline.is_expired() {
        return Err(StoreError::DeadlineExceeded(operation.to_string()));
    }
    Ok(())
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn begin(&self, deadline: Deadline) -> StoreResult<Box<dyn StoreTx>> {
        check_deadline(&deadline, "begin")?;
        Ok(Box::new(InMemoryTx {
            tables: self.tables.clone(),
            deadline,
            held: HeldLocks {
                table: self.row_locks.clone(),
                guards: HashMap::new(),
            },
            products: HashMap::new(),
            reviews: HashMap::new(),
        }))
    }

    async fn get_product(&self, id: &ProductId, deadline: Deadline) -> StoreResult<Product> {
        check_deadline(&deadline, "get_product")?;
        self.read(|t| {
            t.products
                .get(id)
                .cloned()
                .map(|row| row.into_product(t.reviews_of(id)))
        })?
        .ok_or_else(|| StoreError::product_not_found(id))
    }

    async fn list_products(&self, deadline: Deadline) -> StoreResult<Vec<Product>> {
        check_deadline(&deadline, "list_products")?;
        let mut products = self.read(|t| {
            t.products
                .values()
                .cloned()
                .map(|row| {
                    let reviews = t.reviews_of(&row.id);
                    row.into_product(reviews)
                })
                .collect::<Vec<_>>()
        })?;
        products.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(products)
    }

    async fn get_review(&self, id: &ReviewId, deadline: Deadline) -> StoreResult<Review> {
        check_deadline(&deadline, "get_review")?;
        self.read(|t| t.reviews.get(id).cloned())?
            .ok_or_else(|| StoreError::review_not_found(id))
    }

    async fn list_reviews(&self, product_id: &ProductId, deadline: Deadline) -> StoreResult<Vec<Review>> {
        check_deadline(&deadline, "list_reviews")?;
        let reviews = self.read(|t| {
            t.products
                .contains_key(product_id)
                .then(|| t.reviews_of(product_id))
        })?;
        let mut reviews = reviews.ok_or_else(|| StoreError::product_not_found(product_id))?;
        sort_reviews(&mut reviews);
        Ok(reviews)
    }
}

fn sort_reviews(reviews: &mut [Review]) {
    reviews.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// Open in-memory transaction.
///
/// `products`/`reviews` hold staged writes (`None` marks a deletion). Reads consult the
/// overlay first and fall back to committed rows.
struct InMemoryTx {
    tables: Arc<RwLock<Tables>>,
    deadline: Deadline,
    held: HeldLocks,
    products: HashMap<ProductId, Option<ProductRow>>,
    reviews: HashMap<ReviewId, Option<Review>>,
}

impl InMemoryTx {
    /// Acquire the exclusive lock on a product row (re-entrant within this transaction).
    async fn lock_row(&mut self, id: &ProductId) -> StoreResult<()> {
        if self.held.guards.contains_key(id) {
            return Ok(());
        }

        let handle = self.held.table.handle(id)?;
        let acquired = tokio::time::timeout_at(self.deadline.instant(), handle.lock_owned()).await;
        match acquired {
            Ok(guard) => {
                self.held.guards.insert(id.clone(), guard);
                Ok(())
            }
            Err(_) => {
                self.held.table.prune([id]);
                Err(StoreError::LockTimeout(format!("product {id}")))
            }
        }
    }

    fn product_row(&self, id: &ProductId) -> StoreResult<Option<ProductRow>> {
        if let Some(staged) = self.products.get(id) {
            return Ok(staged.clone());
        }
        read_tables(&self.tables, |t| t.products.get(id).cloned())
    }

    fn review(&self, id: &ReviewId) -> StoreResult<Option<Review>> {
        if let Some(staged) = self.reviews.get(id) {
            return Ok(staged.clone());
        }
        read_tables(&self.tables, |t| t.reviews.get(id).cloned())
    }

    fn reviews_of(&self, product_id: &ProductId) -> StoreResult<Vec<Review>> {
        let committed = read_tables(&self.tables, |t| t.reviews_of(product_id))?;

        let mut reviews: Vec<Review> = committed
            .into_iter()
            .filter(|r| !self.reviews.contains_key(&r.id))
            .collect();
        reviews.extend(
            self.reviews
                .values()
                .flatten()
                .filter(|r| &r.product_id == product_id)
                .cloned(),
        );
        sort_reviews(&mut reviews);
        Ok(reviews)
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn lock_and_load_product(&mut self, id: &ProductId) -> StoreResult<Product> {
        self.lock_row(id).await?;
        self.product_row(id)?
            .map(|row| row.into_product(Vec::new()))
            .ok_or_else(|| StoreError::product_not_found(id))
    }

    async fn load_reviews(&mut self, product_id: &ProductId) -> StoreResult<Vec<Review>> {
        self.reviews_of(product_id)
    }

    async fn load_review(&mut self, id: &ReviewId) -> StoreResult<Review> {
        self.review(id)?.ok_or_else(|| StoreError::review_not_found(id))
    }

    async fn insert_product(&mut self, product: &Product) -> StoreResult<()> {
        self.lock_row(&product.id).await?;
        if self.product_row(&product.id)?.is_some() {
            return Err(StoreError::AlreadyExists(format!("product {}", product.id)));
        }
        self.products
            .insert(product.id.clone(), Some(ProductRow::from_product(product)));
        Ok(())
    }

    async fn update_product(&mut self, product: &Product) -> StoreResult<()> {
        self.lock_row(&product.id).await?;
        let Some(mut row) = self.product_row(&product.id)? else {
            return StoreError::expect_one_row("update_product", 0);
        };
        row.name = product.name.clone();
        row.description = product.description.clone();
        row.price = product.price.clone();
        self.products.insert(product.id.clone(), Some(row));
        Ok(())
    }

    async fn set_average_rating(&mut self, id: &ProductId, average: f64) -> StoreResult<()> {
        self.lock_row(id).await?;
        let Some(mut row) = self.product_row(id)? else {
            return StoreError::expect_one_row("set_average_rating", 0);
        };
        row.average_rating = average;
        self.products.insert(id.clone(), Some(row));
        Ok(())
    }

    async fn delete_product(&mut self, id: &ProductId) -> StoreResult<u64> {
        self.lock_row(id).await?;
        if self.product_row(id)?.is_none() {
            return Ok(0);
        }
        for review in self.reviews_of(id)? {
            self.reviews.insert(review.id, None);
        }
        self.products.insert(id.clone(), None);
        Ok(1)
    }

    async fn insert_review(&mut self, review: &Review) -> StoreResult<()> {
        self.lock_row(&review.product_id).await?;
        if self.product_row(&review.product_id)?.is_none() {
            return Err(StoreError::product_not_found(&review.product_id));
        }
        if self.review(&review.id)?.is_some() {
            return Err(StoreError::AlreadyExists(format!("review {}", review.id)));
        }
        self.reviews.insert(review.id.clone(), Some(review.clone()));
        Ok(())
    }

    async fn update_review(&mut self, review: &Review) -> StoreResult<()> {
        let Some(existing) = self.review(&review.id)? else {
            return StoreError::expect_one_row("update_review", 0);
        };
        self.lock_row(&existing.product_id).await?;

        // Re-read under the lock: a concurrent transaction may have removed it meanwhile.
        let Some(existing) = self.review(&review.id)? else {
            return StoreError::expect_one_row("update_review", 0);
        };
        if existing.product_id != review.product_id {
            return Err(StoreError::Conflict(format!(
                "review {} belongs to product {} and cannot be moved",
                review.id, existing.product_id
            )));
        }

        let updated = Review {
            first_name: review.first_name.clone(),
            last_name: review.last_name.clone(),
            review_text: review.review_text.clone(),
            rating: review.rating,
            ..existing
        };
        self.reviews.insert(review.id.clone(), Some(updated));
        Ok(())
    }

    async fn delete_review(&mut self, id: &ReviewId) -> StoreResult<u64> {
        let Some(existing) = self.review(id)? else {
            return Ok(0);
        };
        self.lock_row(&existing.product_id).await?;
        if self.review(id)?.is_none() {
            return Ok(0);
        }
        self.reviews.insert(id.clone(), None);
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        {
            let mut tables = this
                .tables
                .write()
                .map_err(|_| StoreError::Database("lock poisoned".to_string()))?;

            for (id, row) in this.products {
                match row {
                    Some(row) => {
                        tables.products.insert(id, row);
                    }
                    None => {
                        tables.products.remove(&id);
                    }
                }
            }
            for (id, review) in this.reviews {
                match review {
                    Some(review) => {
                        tables.reviews.insert(id, review);
                    }
                    None => {
                        tables.reviews.remove(&id);
                    }
                }
            }
        }

        // Row locks go last, after the writes are visible.
        drop(this.held);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
