use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use prodreview_core::{DomainError, DomainResult, Price, ProductId};

use crate::review::Review;

/// Product record together with its owned reviews.
///
/// `average_rating` is derived: it is only ever written by the rating recomputation
/// that runs inside a review mutation, never taken from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub price: Price,
    pub average_rating: f64,
    pub reviews: Vec<Review>,
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Build a brand-new product (no reviews yet, so the average starts at 0).
    pub fn create(input: NewProduct) -> DomainResult<Self> {
        let name = required(input.name, "product name")?;
        let description = required(input.description, "product description")?;
        let price = Price::parse(&input.price)?;

        Ok(Self {
            id: ProductId::new(),
            name,
            description,
            price,
            average_rating: 0.0,
            reviews: Vec::new(),
            created_at: Utc::now(),
        })
    }

    /// Apply a partial update. Empty or absent fields leave the current value in place.
    pub fn apply_patch(&mut self, patch: &ProductPatch) -> DomainResult<()> {
        if let Some(name) = non_empty(&patch.name) {
            self.name = name.to_string();
        }
        if let Some(description) = non_empty(&patch.description) {
            self.description = description.to_string();
        }
        if let Some(price) = non_empty(&patch.price) {
            self.price = Price::parse(price)?;
        }
        Ok(())
    }

    pub fn review_count(&self) -> usize {
        self.reviews.len()
    }

    /// Sort reviews into their stable presentation order.
    pub fn sort_reviews(&mut self) {
        self.reviews
            .sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    }
}

/// Input for creating a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: String,
}

impl NewProduct {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        price: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            price: price.into(),
        }
    }
}

/// Partial update of a product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
}

impl ProductPatch {
    /// Reject patches that could only fail after touching the store.
    pub fn validate(&self) -> DomainResult<()> {
        if let Some(price) = non_empty(&self.price) {
            Price::parse(price)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        non_empty(&self.name).is_none()
            && non_empty(&self.description).is_none()
            && non_empty(&self.price).is_none()
    }
}

pub(crate) fn required(value: String, what: &str) -> DomainResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{what} is not specified")));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget() -> Product {
        Product::create(NewProduct::new("Widget", "desc", "9.99")).unwrap()
    }

    #[test]
    fn create_starts_with_zero_average_and_no_reviews() {
        let product = widget();
        assert!(product.id.as_str().starts_with("product-"));
        assert_eq!(product.average_rating, 0.0);
        assert_eq!(product.review_count(), 0);
        assert_eq!(product.price.as_str(), "9.99");
    }

    #[test]
    fn create_rejects_missing_fields() {
        for input in [
            NewProduct::new(" ", "desc", "1"),
            NewProduct::new("Widget", "", "1"),
            NewProduct::new("Widget", "desc", ""),
        ] {
            match Product::create(input) {
                Err(DomainError::Validation(_)) => {}
                other => panic!("expected validation error, got {other:?}"),
            }
        }
    }

    #[test]
    fn create_rejects_malformed_price() {
        assert!(Product::create(NewProduct::new("Widget", "desc", "cheap")).is_err());
    }

    #[test]
    fn patch_only_touches_supplied_fields() {
        let mut product = widget();
        let patch = ProductPatch {
            name: Some("Gadget".to_string()),
            description: Some(String::new()),
            price: None,
        };
        product.apply_patch(&patch).unwrap();

        assert_eq!(product.name, "Gadget");
        assert_eq!(product.description, "desc");
        assert_eq!(product.price.as_str(), "9.99");
    }

    #[test]
    fn patch_validation_catches_bad_price() {
        let patch = ProductPatch {
            price: Some("1,50".to_string()),
            ..ProductPatch::default()
        };
        assert!(patch.validate().is_err());
        assert!(ProductPatch::default().validate().is_ok());
        assert!(ProductPatch::default().is_empty());
    }
}
