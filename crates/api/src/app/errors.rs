use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use prodreview_infra::CatalogError;

pub fn catalog_error_to_response(err: CatalogError) -> axum::response::Response {
    match err {
        CatalogError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        CatalogError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        CatalogError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        CatalogError::Store(e) => {
            tracing::error!(error = %e, "store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
        CatalogError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
