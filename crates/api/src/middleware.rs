use axum::{http::StatusCode, middleware::Next, response::Response};

use crate::app::errors;
use crate::context;

/// Resolve the request context from headers and attach it as an extension.
///
/// Requests without a usable context never reach a handler.
pub async fn context_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    match context::from_headers(req.headers()) {
        Ok(ctx) => {
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(e) => errors::json_error(StatusCode::BAD_REQUEST, "missing_context", e.to_string()),
    }
}
