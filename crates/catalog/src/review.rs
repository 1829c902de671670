use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use prodreview_core::{DomainResult, ProductId, Rating, ReviewId};

use crate::product::{non_empty, required};

/// Review record. The product back-reference is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub product_id: ProductId,
    pub first_name: String,
    pub last_name: String,
    pub review_text: String,
    pub rating: Rating,
    pub created_at: DateTime<Utc>,
}

impl Review {
    /// Build a new review for an existing product. The review text may be empty; like
    /// the names, it is stored trimmed.
    pub fn create(input: NewReview) -> DomainResult<Self> {
        let product_id = ProductId::parse(&input.product_id)?;
        let first_name = required(input.first_name, "reviewer's first name")?;
        let last_name = required(input.last_name, "reviewer's last name")?;
        let rating = Rating::new(input.rating)?;

        Ok(Self {
            id: ReviewId::new(),
            product_id,
            first_name,
            last_name,
            review_text: input.review_text.trim().to_string(),
            rating,
            created_at: Utc::now(),
        })
    }

    /// Apply a partial update.
    ///
    /// Empty or absent fields leave the current value in place, and so does a rating
    /// outside `[1, 5]`. The product reference is never touched.
    pub fn apply_patch(&mut self, patch: &ReviewPatch) {
        if let Some(first_name) = non_empty(&patch.first_name) {
            self.first_name = first_name.to_string();
        }
        if let Some(last_name) = non_empty(&patch.last_name) {
            self.last_name = last_name.to_string();
        }
        if let Some(text) = non_empty(&patch.review_text) {
            self.review_text = text.to_string();
        }
        if let Some(rating) = patch.rating.and_then(|r| Rating::new(r).ok()) {
            self.rating = rating;
        }
    }
}

/// Input for creating a review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReview {
    pub product_id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub review_text: String,
    pub rating: i32,
}

/// Partial update of a review.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewPatch {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub review_text: Option<String>,
    #[serde(default)]
    pub rating: Option<i32>,
}

impl ReviewPatch {
    /// Patch that only changes the rating.
    pub fn rating(rating: i32) -> Self {
        Self {
            rating: Some(rating),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prodreview_core::DomainError;

    fn input(rating: i32) -> NewReview {
        NewReview {
            product_id: "product-1".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            review_text: String::new(),
            rating,
        }
    }

    #[test]
    fn create_accepts_empty_text() {
        let review = Review::create(input(4)).unwrap();
        assert!(review.id.as_str().starts_with("review-"));
        assert_eq!(review.product_id.as_str(), "product-1");
        assert_eq!(review.rating.value(), 4);
        assert!(review.review_text.is_empty());
    }

    #[test]
    fn text_is_trimmed_on_create_and_patch_alike() {
        let mut review = Review::create(NewReview {
            review_text: "  solid  ".to_string(),
            ..input(4)
        })
        .unwrap();
        assert_eq!(review.review_text, "solid");

        review.apply_patch(&ReviewPatch {
            first_name: None,
            last_name: None,
            review_text: Some("  sturdy\n".to_string()),
            rating: None,
        });
        assert_eq!(review.review_text, "sturdy");
    }

    #[test]
    fn create_rejects_out_of_range_rating() {
        assert!(matches!(Review::create(input(0)), Err(DomainError::Validation(_))));
        assert!(matches!(Review::create(input(6)), Err(DomainError::Validation(_))));
    }

    #[test]
    fn create_requires_reviewer_identity_and_product() {
        let mut missing_last = input(3);
        missing_last.last_name = " ".to_string();
        assert!(matches!(Review::create(missing_last), Err(DomainError::Validation(_))));

        let mut missing_product = input(3);
        missing_product.product_id = String::new();
        assert!(matches!(Review::create(missing_product), Err(DomainError::InvalidId(_))));
    }

    #[test]
    fn rating_only_patch_keeps_identity_and_text() {
        let mut review = Review::create(NewReview {
            review_text: "solid".to_string(),
            ..input(2)
        })
        .unwrap();
        let before = review.clone();

        review.apply_patch(&ReviewPatch {
            first_name: Some(String::new()),
            last_name: None,
            review_text: Some(String::new()),
            rating: Some(5),
        });

        assert_eq!(review.rating.value(), 5);
        assert_eq!(review.first_name, before.first_name);
        assert_eq!(review.last_name, before.last_name);
        assert_eq!(review.review_text, "solid");
        assert_eq!(review.product_id, before.product_id);
    }

    #[test]
    fn out_of_range_patch_rating_is_ignored() {
        let mut review = Review::create(input(3)).unwrap();
        review.apply_patch(&ReviewPatch::rating(9));
        assert_eq!(review.rating.value(), 3);
        review.apply_patch(&ReviewPatch::rating(0));
        assert_eq!(review.rating.value(), 3);
    }
}
