use std::sync::Arc;

use axum::{
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use pantry_core::TransactionId;
use pantry_infra::RequestContext;

use crate::app::dto;
use crate::app::errors;
use crate::app::services::{AppServices, blocking};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_return))
        .route("/:transaction_id", get(returns_for))
}

pub async fn create_return(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Result<Json<dto::CreateReturnRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::rejection_to_response(e),
    };
    let original: TransactionId = match dto::parse_id("transaction", &body.original_transaction_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let result = blocking(move || {
        services
            .returns
            .process_return(ctx, original, body.items, &body.reason)
    })
    .await;

    match result {
        Ok(ret) => (StatusCode::CREATED, Json(ret)).into_response(),
        Err(resp) => resp,
    }
}

/// The original sale (sold vs returned per line) and every return booked against it.
pub async fn returns_for(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(transaction_id): Path<String>,
) -> axum::response::Response {
    let transaction_id: TransactionId = match dto::parse_id("transaction", &transaction_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match blocking(move || services.returns.returns_for(ctx, transaction_id)).await {
        Ok((sale, returns)) => (
            StatusCode::OK,
            Json(json!({
                "sale": sale,
                "returns": returns,
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}
