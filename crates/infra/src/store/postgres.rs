//! Postgres-backed catalog store.
//!
//! Products and reviews live in two tables; reviews reference their product with
//! `ON DELETE CASCADE`. The exclusive row lock is `SELECT ... FOR UPDATE` on the
//! product row, held until the surrounding transaction ends.
//!
//! ## Deadlines
//!
//! Each transaction sets `lock_timeout` and `statement_timeout` from the caller's
//! remaining time, and every round-trip is also bounded client-side.
//!
//! ## Error Mapping
//!
//! | SQLSTATE | Meaning | StoreError |
//! |----------|---------|------------|
//! | `55P03` | lock not available | `LockTimeout` |
//! | `57014` | query canceled (statement timeout) | `DeadlineExceeded` |
//! | `40001` / `40P01` | serialization failure / deadlock | `Conflict` |
//! | `23505` | unique violation | `AlreadyExists` |
//! | `23503` | foreign key violation | `NotFound` |
//! | other | | `Database` |

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use prodreview_catalog::{Product, Review};
use prodreview_core::{Price, ProductId, Rating, ReviewId};

use super::{CatalogStore, StoreError, StoreResult, StoreTx};
use crate::deadline::Deadline;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id              TEXT PRIMARY KEY,
        name            TEXT NOT NULL,
        description     TEXT NOT NULL,
        price           TEXT NOT NULL,
        average_rating  DOUBLE PRECISION NOT NULL DEFAULT 0,
        created_at      TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reviews (
        id           TEXT PRIMARY KEY,
        product_id   TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
        first_name   TEXT NOT NULL,
        last_name    TEXT NOT NULL,
        review_text  TEXT NOT NULL DEFAULT '',
        rating       SMALLINT NOT NULL CHECK (rating BETWEEN 1 AND 5),
        created_at   TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS reviews_product_id_idx ON reviews (product_id, created_at, id)",
];

const PRODUCT_COLUMNS: &str = "id, name, description, price, average_rating, created_at";
const REVIEW_COLUMNS: &str = "id, product_id, first_name, last_name, review_text, rating, created_at";

/// Postgres-backed catalog store.
///
/// `Send + Sync`; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct PostgresCatalogStore {
    pool: Arc<PgPool>,
}

impl PostgresCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(*statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }

    async fn fetch_reviews(&self, product_id: &ProductId) -> StoreResult<Vec<Review>> {
        let rows = sqlx::query(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE product_id = $1 ORDER BY created_at, id"
        ))
        .bind(product_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_reviews", e))?;

        rows.iter().map(review_from_row).collect()
    }

    async fn product_exists(&self, id: &ProductId) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM products WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("product_exists", e))?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl CatalogStore for PostgresCatalogStore {
    #[instrument(skip(self), err)]
    async fn begin(&self, deadline: Deadline) -> StoreResult<Box<dyn StoreTx>> {
        let pool = self.pool.clone();
        let tx = deadline
            .bound("begin", async move {
                let mut tx = pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;

                // SET does not take bind parameters; the value is a plain integer.
                let budget_ms = deadline.remaining().as_millis().max(1);
                sqlx::query(&format!("SET LOCAL lock_timeout = {budget_ms}"))
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;
                sqlx::query(&format!("SET LOCAL statement_timeout = {budget_ms}"))
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("set_statement_timeout", e))?;
                Ok(tx)
            })
            .await?;

        Ok(Box::new(PostgresTx { tx, deadline }))
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn get_product(&self, id: &ProductId, deadline: Deadline) -> StoreResult<Product> {
        deadline
            .bound("get_product", async {
                let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
                    .bind(id.as_str())
                    .fetch_optional(&*self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("get_product", e))?
                    .ok_or_else(|| StoreError::product_not_found(id))?;

                let reviews = self.fetch_reviews(id).await?;
                product_from_row(&row, reviews)
            })
            .await
    }

    #[instrument(skip(self), err)]
    async fn list_products(&self, deadline: Deadline) -> StoreResult<Vec<Product>> {
        deadline
            .bound("list_products", async {
                let product_rows = sqlx::query(&format!(
                    "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY created_at, id"
                ))
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("list_products", e))?;

                let review_rows = sqlx::query(&format!(
                    "SELECT {REVIEW_COLUMNS} FROM reviews ORDER BY created_at, id"
                ))
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("list_products_reviews", e))?;

                let mut by_product: HashMap<ProductId, Vec<Review>> = HashMap::new();
                for row in &review_rows {
                    let review = review_from_row(row)?;
                    by_product.entry(review.product_id.clone()).or_default().push(review);
                }

                product_rows
                    .iter()
                    .map(|row| {
                        let id = ProductId::parse(row_string(row, "id")?)
                            .map_err(|e| StoreError::Database(format!("invalid product row: {e}")))?;
                        product_from_row(row, by_product.remove(&id).unwrap_or_default())
                    })
                    .collect()
            })
            .await
    }

    #[instrument(skip(self), fields(review_id = %id), err)]
    async fn get_review(&self, id: &ReviewId, deadline: Deadline) -> StoreResult<Review> {
        deadline
            .bound("get_review", async {
                let row = sqlx::query(&format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = $1"))
                    .bind(id.as_str())
                    .fetch_optional(&*self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("get_review", e))?
                    .ok_or_else(|| StoreError::review_not_found(id))?;
                review_from_row(&row)
            })
            .await
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn list_reviews(&self, product_id: &ProductId, deadline: Deadline) -> StoreResult<Vec<Review>> {
        deadline
            .bound("list_reviews", async {
                if !self.product_exists(product_id).await? {
                    return Err(StoreError::product_not_found(product_id));
                }
                self.fetch_reviews(product_id).await
            })
            .await
    }
}

/// Open Postgres transaction. Dropping it without commit rolls back.
struct PostgresTx {
    tx: Transaction<'static, Postgres>,
    deadline: Deadline,
}

#[async_trait]
impl StoreTx for PostgresTx {
    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn lock_and_load_product(&mut self, id: &ProductId) -> StoreResult<Product> {
        let tx = &mut self.tx;
        self.deadline
            .bound("lock_and_load_product", async move {
                let row = sqlx::query(&format!(
                    "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR UPDATE"
                ))
                .bind(id.as_str())
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("lock_and_load_product", e))?
                .ok_or_else(|| StoreError::product_not_found(id))?;
                product_from_row(&row, Vec::new())
            })
            .await
    }

    async fn load_reviews(&mut self, product_id: &ProductId) -> StoreResult<Vec<Review>> {
        let tx = &mut self.tx;
        self.deadline
            .bound("load_reviews", async move {
                let rows = sqlx::query(&format!(
                    "SELECT {REVIEW_COLUMNS} FROM reviews WHERE product_id = $1 ORDER BY created_at, id"
                ))
                .bind(product_id.as_str())
                .fetch_all(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("load_reviews", e))?;
                rows.iter().map(review_from_row).collect()
            })
            .await
    }

    async fn load_review(&mut self, id: &ReviewId) -> StoreResult<Review> {
        let tx = &mut self.tx;
        self.deadline
            .bound("load_review", async move {
                let row = sqlx::query(&format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = $1"))
                    .bind(id.as_str())
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(|e| map_sqlx_error("load_review", e))?
                    .ok_or_else(|| StoreError::review_not_found(id))?;
                review_from_row(&row)
            })
            .await
    }

    #[instrument(skip(self, product), fields(product_id = %product.id), err)]
    async fn insert_product(&mut self, product: &Product) -> StoreResult<()> {
        let tx = &mut self.tx;
        self.deadline
            .bound("insert_product", async move {
                sqlx::query(
                    r#"
                    INSERT INTO products (id, name, description, price, average_rating, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(product.id.as_str())
                .bind(&product.name)
                .bind(&product.description)
                .bind(product.price.as_str())
                .bind(product.average_rating)
                .bind(product.created_at)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("insert_product", e))?;
                Ok(())
            })
            .await
    }

    #[instrument(skip(self, product), fields(product_id = %product.id), err)]
    async fn update_product(&mut self, product: &Product) -> StoreResult<()> {
        let tx = &mut self.tx;
        self.deadline
            .bound("update_product", async move {
                let result = sqlx::query(
                    "UPDATE products SET name = $2, description = $3, price = $4 WHERE id = $1",
                )
                .bind(product.id.as_str())
                .bind(&product.name)
                .bind(&product.description)
                .bind(product.price.as_str())
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("update_product", e))?;
                StoreError::expect_one_row("update_product", result.rows_affected())
            })
            .await
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn set_average_rating(&mut self, id: &ProductId, average: f64) -> StoreResult<()> {
        let tx = &mut self.tx;
        self.deadline
            .bound("set_average_rating", async move {
                let result = sqlx::query("UPDATE products SET average_rating = $2 WHERE id = $1")
                    .bind(id.as_str())
                    .bind(average)
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| map_sqlx_error("set_average_rating", e))?;
                StoreError::expect_one_row("set_average_rating", result.rows_affected())
            })
            .await
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn delete_product(&mut self, id: &ProductId) -> StoreResult<u64> {
        let tx = &mut self.tx;
        self.deadline
            .bound("delete_product", async move {
                let result = sqlx::query("DELETE FROM products WHERE id = $1")
                    .bind(id.as_str())
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| map_sqlx_error("delete_product", e))?;
                Ok(result.rows_affected())
            })
            .await
    }

    #[instrument(skip(self, review), fields(review_id = %review.id, product_id = %review.product_id), err)]
    async fn insert_review(&mut self, review: &Review) -> StoreResult<()> {
        let tx = &mut self.tx;
        self.deadline
            .bound("insert_review", async move {
                sqlx::query(
                    r#"
                    INSERT INTO reviews (id, product_id, first_name, last_name, review_text, rating, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(review.id.as_str())
                .bind(review.product_id.as_str())
                .bind(&review.first_name)
                .bind(&review.last_name)
                .bind(&review.review_text)
                .bind(review.rating.value() as i16)
                .bind(review.created_at)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("insert_review", e))?;
                Ok(())
            })
            .await
    }

    #[instrument(skip(self, review), fields(review_id = %review.id), err)]
    async fn update_review(&mut self, review: &Review) -> StoreResult<()> {
        let tx = &mut self.tx;
        self.deadline
            .bound("update_review", async move {
                let result = sqlx::query(
                    r#"
                    UPDATE reviews
                    SET first_name = $3, last_name = $4, review_text = $5, rating = $6
                    WHERE id = $1 AND product_id = $2
                    "#,
                )
                .bind(review.id.as_str())
                .bind(review.product_id.as_str())
                .bind(&review.first_name)
                .bind(&review.last_name)
                .bind(&review.review_text)
                .bind(review.rating.value() as i16)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("update_review", e))?;
                StoreError::expect_one_row("update_review", result.rows_affected())
            })
            .await
    }

    #[instrument(skip(self), fields(review_id = %id), err)]
    async fn delete_review(&mut self, id: &ReviewId) -> StoreResult<u64> {
        let tx = &mut self.tx;
        self.deadline
            .bound("delete_review", async move {
                let result = sqlx::query("DELETE FROM reviews WHERE id = $1")
                    .bind(id.as_str())
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| map_sqlx_error("delete_review", e))?;
                Ok(result.rows_affected())
            })
            .await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let PostgresTx { tx, deadline } = *self;
        deadline
            .bound("commit", async move {
                tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
            })
            .await
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("{} in {}", db_err.message(), operation);
            match db_err.code().as_deref() {
                Some("55P03") => StoreError::LockTimeout(msg),
                Some("57014") => StoreError::DeadlineExceeded(operation.to_string()),
                Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                Some("23505") => StoreError::AlreadyExists(msg),
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolTimedOut => StoreError::DeadlineExceeded(format!("{operation} (pool)")),
        sqlx::Error::PoolClosed => StoreError::Database(format!("connection pool closed in {operation}")),
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("row in {operation}")),
        _ => StoreError::Database(format!("sqlx error in {operation}: {err}")),
    }
}

// SQLx row types

fn row_string(row: &PgRow, column: &str) -> StoreResult<String> {
    row.try_get(column)
        .map_err(|e| StoreError::Database(format!("failed to read {column}: {e}")))
}

#[derive(Debug)]
struct ProductRow {
    id: String,
    name: String,
    description: String,
    price: String,
    average_rating: f64,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            price: row.try_get("price")?,
            average_rating: row.try_get("average_rating")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn product_from_row(row: &PgRow, reviews: Vec<Review>) -> StoreResult<Product> {
    let row = ProductRow::from_row(row)
        .map_err(|e| StoreError::Database(format!("failed to deserialize product row: {e}")))?;
    let invalid = |e: prodreview_core::DomainError| StoreError::Database(format!("invalid product row: {e}"));

    let mut product = Product {
        id: ProductId::parse(&row.id).map_err(invalid)?,
        name: row.name,
        description: row.description,
        price: Price::parse(&row.price).map_err(invalid)?,
        average_rating: row.average_rating,
        reviews,
        created_at: row.created_at,
    };
    product.sort_reviews();
    Ok(product)
}

#[derive(Debug)]
struct ReviewRow {
    id: String,
    product_id: String,
    first_name: String,
    last_name: String,
    review_text: String,
    rating: i16,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ReviewRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ReviewRow {
            id: row.try_get("id")?,
            product_id: row.try_get("product_id")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            review_text: row.try_get("review_text")?,
            rating: row.try_get("rating")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn review_from_row(row: &PgRow) -> StoreResult<Review> {
    let row = ReviewRow::from_row(row)
        .map_err(|e| StoreError::Database(format!("failed to deserialize review row: {e}")))?;
    let invalid = |e: prodreview_core::DomainError| StoreError::Database(format!("invalid review row: {e}"));

    Ok(Review {
        id: ReviewId::parse(&row.id).map_err(invalid)?,
        product_id: ProductId::parse(&row.product_id).map_err(invalid)?,
        first_name: row.first_name,
        last_name: row.last_name,
        review_text: row.review_text,
        rating: Rating::new(i32::from(row.rating)).map_err(invalid)?,
        created_at: row.created_at,
    })
}

#[cfg(test)]
mod tests {
    //! Run against a live database by setting `DATABASE_URL`; skipped otherwise.

    use std::time::Duration;

    use super::*;
    use prodreview_catalog::{NewProduct, NewReview};

    async fn test_store() -> Option<PostgresCatalogStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let store = PostgresCatalogStore::connect(&url, 4).await.ok()?;
        store.migrate().await.ok()?;
        Some(store)
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    async fn seeded(store: &PostgresCatalogStore) -> Product {
        let p = Product::create(NewProduct::new("Widget", "desc", "9.99")).unwrap();
        let mut tx = store.begin(deadline()).await.unwrap();
        tx.insert_product(&p).await.unwrap();
        tx.commit().await.unwrap();
        p
    }

    #[tokio::test]
    async fn product_round_trips_with_reviews() {
        let Some(store) = test_store().await else { return };
        let p = seeded(&store).await;
        let review = Review::create(NewReview {
            product_id: p.id.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            review_text: "fine".to_string(),
            rating: 4,
        })
        .unwrap();

        let mut tx = store.begin(deadline()).await.unwrap();
        tx.lock_and_load_product(&p.id).await.unwrap();
        tx.insert_review(&review).await.unwrap();
        tx.set_average_rating(&p.id, 4.0).await.unwrap();
        tx.commit().await.unwrap();

        let loaded = store.get_product(&p.id, deadline()).await.unwrap();
        assert_eq!(loaded.average_rating, 4.0);
        assert_eq!(loaded.reviews.len(), 1);
        assert_eq!(loaded.reviews[0].id, review.id);
        assert_eq!(loaded.price.as_str(), "9.99");
    }

    #[tokio::test]
    async fn delete_cascades_to_reviews() {
        let Some(store) = test_store().await else { return };
        let p = seeded(&store).await;
        let review = Review::create(NewReview {
            product_id: p.id.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            review_text: String::new(),
            rating: 2,
        })
        .unwrap();

        let mut tx = store.begin(deadline()).await.unwrap();
        tx.insert_review(&review).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin(deadline()).await.unwrap();
        assert_eq!(tx.delete_product(&p.id).await.unwrap(), 1);
        tx.commit().await.unwrap();

        assert!(matches!(
            store.get_review(&review.id, deadline()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn lock_wait_times_out_as_lock_timeout() {
        let Some(store) = test_store().await else { return };
        let p = seeded(&store).await;

        let mut holder = store.begin(deadline()).await.unwrap();
        holder.lock_and_load_product(&p.id).await.unwrap();

        let mut waiter = store
            .begin(Deadline::after(Duration::from_millis(200)))
            .await
            .unwrap();
        let err = waiter.lock_and_load_product(&p.id).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::LockTimeout(_) | StoreError::DeadlineExceeded(_)
        ));
    }
}
