//! Average-rating recomputation inside a write transaction.
//!
//! The product row is locked for update before its reviews are read. While the lock is
//! held no other writer can change the product's reviews, so the average written here
//! is the mean of exactly the committed review set plus this transaction's own change.
//! Taking the lock again inside a transaction that already holds it is a no-op.

use tracing::debug;

use prodreview_catalog::average_rating;
use prodreview_core::ProductId;

use crate::store::{StoreResult, StoreTx};

/// Recompute and persist a product's average rating from its current reviews.
///
/// Returns the new average (`0.0` when the product has no reviews). Never begins, commits
/// or rolls back the transaction.
pub async fn recompute_average_rating(tx: &mut dyn StoreTx, product_id: &ProductId) -> StoreResult<f64> {
    tx.lock_and_load_product(product_id).await?;
    let reviews = tx.load_reviews(product_id).await?;
    let average = average_rating(&reviews);
    tx.set_average_rating(product_id, average).await?;

    debug!(%product_id, review_count = reviews.len(), average, "average rating recomputed");
    Ok(average)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::deadline::Deadline;
    use crate::store::{CatalogStore, InMemoryCatalogStore};
    use prodreview_catalog::{NewProduct, NewReview, Product, Review};

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn review(product: &Product, rating: i32) -> Review {
        Review::create(NewReview {
            product_id: product.id.to_string(),
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            review_text: String::new(),
            rating,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn average_covers_committed_and_staged_reviews() {
        let store = InMemoryCatalogStore::new();
        let product = Product::create(NewProduct::new("Widget", "desc", "1.00")).unwrap();

        let mut tx = store.begin(deadline()).await.unwrap();
        tx.insert_product(&product).await.unwrap();
        tx.insert_review(&review(&product, 5)).await.unwrap();
        tx.insert_review(&review(&product, 4)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin(deadline()).await.unwrap();
        tx.insert_review(&review(&product, 2)).await.unwrap();
        let average = recompute_average_rating(tx.as_mut(), &product.id).await.unwrap();
        tx.commit().await.unwrap();

        assert!((average - 11.0 / 3.0).abs() < 1e-9);
        let stored = store.get_product(&product.id, deadline()).await.unwrap();
        assert_eq!(stored.average_rating, average);
    }

    #[tokio::test]
    async fn no_reviews_means_zero() {
        let store = InMemoryCatalogStore::new();
        let product = Product::create(NewProduct::new("Gadget", "desc", "2")).unwrap();

        let mut tx = store.begin(deadline()).await.unwrap();
        tx.insert_product(&product).await.unwrap();
        tx.set_average_rating(&product.id, 3.0).await.unwrap();
        let average = recompute_average_rating(tx.as_mut(), &product.id).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(average, 0.0);
    }

    #[tokio::test]
    async fn unknown_product_is_not_found() {
        let store = InMemoryCatalogStore::new();
        let mut tx = store.begin(deadline()).await.unwrap();
        let err = recompute_average_rating(tx.as_mut(), &ProductId::new()).await.unwrap_err();
        assert!(matches!(err, crate::store::StoreError::NotFound(_)));
    }
}
