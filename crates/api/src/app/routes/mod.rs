use axum::{routing::get, Router};

pub mod dashboard;
pub mod inventory;
pub mod orders;
pub mod returns;
pub mod sales;
pub mod system;

/// Router for all store-scoped endpoints (require a request context).
pub fn router() -> Router {
    Router::new()
        .route("/dashboard", get(dashboard::summary))
        .nest("/inventory", inventory::router())
        .nest("/orders", orders::router())
        .nest("/sales", sales::router())
        .nest("/returns", returns::router())
}
