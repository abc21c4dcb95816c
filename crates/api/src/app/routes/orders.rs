use std::sync::Arc;

use axum::{
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use pantry_core::OrderId;
use pantry_infra::RequestContext;

use crate::app::dto::{self, OrderResponse};
use crate::app::errors;
use crate::app::services::{AppServices, blocking};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_order))
        .route("/:id", get(get_order).patch(update_status))
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Result<Json<dto::CreateOrderRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::rejection_to_response(e),
    };

    match blocking(move || services.orders.place_order(ctx, body.items, body.discount)).await {
        Ok(order) => (StatusCode::CREATED, Json(OrderResponse::new(&order, None))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match dto::parse_id("order", &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let result = blocking(move || {
        let order = services.orders.order(ctx, order_id)?;
        let reservations = services.orders.reservations(ctx, order_id)?;
        Ok((order, reservations))
    })
    .await;

    match result {
        Ok((order, reservations)) => {
            (StatusCode::OK, Json(OrderResponse::new(&order, Some(reservations)))).into_response()
        }
        Err(resp) => resp,
    }
}

/// Status transitions drive the reservation lifecycle (confirm reserves,
/// cancel releases, deliver converts).
pub async fn update_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::UpdateOrderRequest>, JsonRejection>,
) -> axum::response::Response {
    let order_id: OrderId = match dto::parse_id("order", &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::rejection_to_response(e),
    };

    match blocking(move || services.orders.transition(ctx, order_id, body.status)).await {
        Ok(order) => (StatusCode::OK, Json(OrderResponse::new(&order, None))).into_response(),
        Err(resp) => resp,
    }
}
