use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use prodreview_catalog::{NewProduct, NewReview, Product, ProductPatch, Review, ReviewPatch};

// -------------------------
// Request DTOs
// -------------------------

/// Missing fields deserialize as empty so validation reports them, not the JSON decoder.
#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: String,
}

impl From<CreateProductRequest> for NewProduct {
    fn from(body: CreateProductRequest) -> Self {
        NewProduct::new(body.name, body.description, body.price)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<String>,
}

impl From<UpdateProductRequest> for ProductPatch {
    fn from(body: UpdateProductRequest) -> Self {
        ProductPatch {
            name: body.name,
            description: body.description,
            price: body.price,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateReviewRequest {
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub review_text: String,
    #[serde(default)]
    pub rating: i32,
}

impl From<CreateReviewRequest> for NewReview {
    fn from(body: CreateReviewRequest) -> Self {
        NewReview {
            product_id: body.product_id,
            first_name: body.first_name,
            last_name: body.last_name,
            review_text: body.review_text,
            rating: body.rating,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateReviewRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub review_text: Option<String>,
    pub rating: Option<i32>,
}

impl From<UpdateReviewRequest> for ReviewPatch {
    fn from(body: UpdateReviewRequest) -> Self {
        ReviewPatch {
            first_name: body.first_name,
            last_name: body.last_name,
            review_text: body.review_text,
            rating: body.rating,
        }
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    pub id: String,
    pub product_id: String,
    pub first_name: String,
    pub last_name: String,
    pub review_text: String,
    pub rating: i32,
    pub created_at: DateTime<Utc>,
}

impl From<&Review> for ReviewResponse {
    fn from(r: &Review) -> Self {
        Self {
            id: r.id.to_string(),
            product_id: r.product_id.to_string(),
            first_name: r.first_name.clone(),
            last_name: r.last_name.clone(),
            review_text: r.review_text.clone(),
            rating: r.rating.value(),
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: String,
    pub average_rating: f64,
    pub reviews: Vec<ReviewResponse>,
    pub created_at: DateTime<Utc>,
}

impl From<&Product> for ProductResponse {
    fn from(p: &Product) -> Self {
        Self {
            id: p.id.to_string(),
            name: p.name.clone(),
            description: p.description.clone(),
            price: p.price.to_string(),
            average_rating: p.average_rating,
            reviews: p.reviews.iter().map(ReviewResponse::from).collect(),
            created_at: p.created_at,
        }
    }
}

pub fn reviews_json(reviews: &[Review]) -> Vec<ReviewResponse> {
    reviews.iter().map(ReviewResponse::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_create_fields_become_empty() {
        let body: CreateReviewRequest = serde_json::from_str(r#"{"rating": 4}"#).unwrap();
        let input = NewReview::from(body);
        assert_eq!(input.product_id, "");
        assert_eq!(input.first_name, "");
        assert_eq!(input.rating, 4);
    }

    #[test]
    fn product_response_carries_price_as_string() {
        let product = Product::create(NewProduct::new("Widget", "desc", "9.99")).unwrap();
        let json = serde_json::to_value(ProductResponse::from(&product)).unwrap();
        assert_eq!(json["price"], "9.99");
        assert_eq!(json["average_rating"], 0.0);
        assert!(json["reviews"].as_array().unwrap().is_empty());
    }
}
