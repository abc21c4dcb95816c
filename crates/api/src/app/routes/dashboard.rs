use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use pantry_infra::RequestContext;
use pantry_infra::services::LevelFilter;
use pantry_inventory::StockStatus;

use crate::app::services::{AppServices, blocking};

/// Order counts and revenue come from the event-fed projection, so they may
/// trail the latest commit slightly; stock figures are read from the rows.
pub async fn summary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> axum::response::Response {
    let orders = services.dashboard.summary(ctx.store_id);

    let stock = blocking(move || {
        let levels = services.monitor.levels(ctx, &LevelFilter::default())?;
        let count = |status| levels.iter().filter(|l| l.status == status).count();
        Ok(json!({
            "products": levels.len(),
            "low_stock": count(StockStatus::LowStock),
            "out_of_stock": count(StockStatus::OutOfStock),
            "total_value": services.monitor.total_value(ctx)?,
        }))
    })
    .await;

    match stock {
        Ok(stock) => (
            StatusCode::OK,
            Json(json!({
                "orders": orders,
                "stock": stock,
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}
