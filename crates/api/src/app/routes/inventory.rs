use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use pantry_infra::RequestContext;
use pantry_infra::services::{LevelFilter, RegisterProduct};
use pantry_inventory::{StockKey, StockStatus};

use crate::app::dto::{self, InventoryResponse, MovementResponse};
use crate::app::errors;
use crate::app::services::{AppServices, blocking};

pub fn router() -> Router {
    Router::new()
        .route("/levels", get(levels))
        .route("/value", get(total_value))
        .route("/products", post(register_product))
        .route("/adjust", post(adjust))
        .route("/receive", post(receive))
        .route("/transfer", post(transfer))
        .route("/movements/recent", get(recent_movements))
        .route("/history/:product_id", get(history))
        .route("/audit/:product_id", get(audit))
}

pub async fn levels(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Query(q): Query<dto::LevelsQuery>,
) -> axum::response::Response {
    let status = match q.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => match raw.parse::<StockStatus>() {
            Ok(s) => Some(s),
            Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        },
        None => None,
    };
    let filter = LevelFilter {
        search: q.search,
        status,
    };

    match blocking(move || services.monitor.levels(ctx, &filter)).await {
        Ok(levels) => (StatusCode::OK, Json(levels)).into_response(),
        Err(resp) => resp,
    }
}

pub async fn total_value(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> axum::response::Response {
    match blocking(move || services.monitor.total_value(ctx)).await {
        Ok(total) => (StatusCode::OK, Json(json!({ "total_value": total }))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn register_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Result<Json<RegisterProduct>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::rejection_to_response(e),
    };

    match blocking(move || services.adjustments.register_product(ctx, body)).await {
        Ok(row) => (StatusCode::CREATED, Json(InventoryResponse::from(row))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn adjust(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Result<Json<dto::AdjustRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::rejection_to_response(e),
    };
    let (kind, quantity) = match body.plan() {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let result = blocking(move || {
        services.adjustments.adjust(
            ctx,
            body.product_id,
            kind,
            quantity,
            &body.reason,
            body.reference,
        )
    })
    .await;

    match result {
        Ok(row) => (StatusCode::OK, Json(InventoryResponse::from(row))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn receive(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Result<Json<dto::ReceiveRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::rejection_to_response(e),
    };

    let result = blocking(move || {
        services
            .adjustments
            .receive(ctx, body.product_id, body.quantity, body.unit_cost, body.reference)
    })
    .await;

    match result {
        Ok(row) => (StatusCode::OK, Json(InventoryResponse::from(row))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Result<Json<dto::TransferRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::rejection_to_response(e),
    };

    let result = blocking(move || {
        services
            .adjustments
            .transfer(ctx, body.product_id, body.to_store_id, body.quantity, body.reason)
    })
    .await;

    match result {
        Ok(receipt) => (
            StatusCode::OK,
            Json(json!({
                "transfer_id": receipt.transfer_id,
                "from": InventoryResponse::from(receipt.from),
                "to": InventoryResponse::from(receipt.to),
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn recent_movements(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Query(q): Query<dto::LimitQuery>,
) -> axum::response::Response {
    let limit = q.clamped(20, 500);
    match blocking(move || services.ledger.recent(ctx.store_id, limit)).await {
        Ok(movements) => {
            let body: Vec<MovementResponse> = movements.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(resp) => resp,
    }
}

pub async fn history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(product_id): Path<String>,
    Query(q): Query<dto::LimitQuery>,
) -> axum::response::Response {
    let product_id = match dto::parse_id("product", &product_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let limit = q.clamped(100, 1000);
    let key = StockKey::new(ctx.store_id, product_id);

    match blocking(move || services.ledger.history(key, limit)).await {
        Ok(movements) => {
            let body: Vec<MovementResponse> = movements.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(resp) => resp,
    }
}

pub async fn audit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(product_id): Path<String>,
) -> axum::response::Response {
    let product_id = match dto::parse_id("product", &product_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let key = StockKey::new(ctx.store_id, product_id);

    match blocking(move || services.ledger.audit(key)).await {
        Ok(audit) => (StatusCode::OK, Json(audit)).into_response(),
        Err(resp) => resp,
    }
}
