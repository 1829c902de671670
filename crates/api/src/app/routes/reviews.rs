use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use prodreview_infra::CatalogError;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_review))
        .route("/:id", get(get_review).patch(update_review).delete(delete_review))
}

/// A `publish_error` (502) still means the review was stored.
pub async fn create_review(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateReviewRequest>,
) -> axum::response::Response {
    match services.create_review(body.into()).await {
        Ok(review) => (StatusCode::CREATED, Json(dto::ReviewResponse::from(&review))).into_response(),
        Err(e) => {
            if matches!(e, CatalogError::Publish(_)) {
                tracing::warn!(error = %e, "review stored but not announced");
            }
            errors::catalog_error_to_response(e)
        }
    }
}

pub async fn get_review(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match services.get_review(&id).await {
        Ok(review) => (StatusCode::OK, Json(dto::ReviewResponse::from(review.as_ref()))).into_response(),
        Err(e) => errors::catalog_error_to_response(e),
    }
}

pub async fn update_review(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateReviewRequest>,
) -> axum::response::Response {
    match services.edit_review(&id, body.into()).await {
        Ok(review) => (StatusCode::OK, Json(dto::ReviewResponse::from(&review))).into_response(),
        Err(e) => errors::catalog_error_to_response(e),
    }
}

pub async fn delete_review(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match services.delete_review(&id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::catalog_error_to_response(e),
    }
}
