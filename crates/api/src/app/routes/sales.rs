use std::sync::Arc;

use axum::{
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use pantry_infra::RequestContext;

use crate::app::dto;
use crate::app::errors;
use crate::app::services::{AppServices, blocking};

pub fn router() -> Router {
    Router::new().route("/", post(create_sale))
}

/// Counter sale: stock leaves at once, and the returned `transaction_id` is
/// what returns are booked against.
pub async fn create_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Result<Json<dto::CreateSaleRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::rejection_to_response(e),
    };

    match blocking(move || services.sales.sell(ctx, body.items, body.discount)).await {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(resp) => resp,
    }
}
