use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/:id", get(get_product).patch(update_product).delete(delete_product))
        .route("/:id/reviews", get(list_product_reviews))
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateProductRequest>,
) -> axum::response::Response {
    match services.create_product(body.into()).await {
        Ok(product) => (StatusCode::CREATED, Json(dto::ProductResponse::from(&product))).into_response(),
        Err(e) => errors::catalog_error_to_response(e),
    }
}

pub async fn list_products(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.list_products().await {
        Ok(products) => {
            let body: Vec<dto::ProductResponse> = products.iter().map(dto::ProductResponse::from).collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => errors::catalog_error_to_response(e),
    }
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match services.get_product(&id).await {
        Ok(product) => (StatusCode::OK, Json(dto::ProductResponse::from(product.as_ref()))).into_response(),
        Err(e) => errors::catalog_error_to_response(e),
    }
}

pub async fn update_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateProductRequest>,
) -> axum::response::Response {
    match services.edit_product(&id, body.into()).await {
        Ok(product) => (StatusCode::OK, Json(dto::ProductResponse::from(&product))).into_response(),
        Err(e) => errors::catalog_error_to_response(e),
    }
}

pub async fn delete_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match services.delete_product(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::catalog_error_to_response(e),
    }
}

pub async fn list_product_reviews(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match services.get_reviews_by_product(&id).await {
        Ok(reviews) => (StatusCode::OK, Json(dto::reviews_json(&reviews))).into_response(),
        Err(e) => errors::catalog_error_to_response(e),
    }
}
