use axum::http::HeaderMap;
use thiserror::Error;

use pantry_core::{ActorId, StoreId};
use pantry_infra::RequestContext;

pub const STORE_HEADER: &str = "x-store-id";
pub const ACTOR_HEADER: &str = "x-actor-id";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("missing {0} header")]
    Missing(&'static str),

    #[error("invalid {header} header: {message}")]
    Invalid {
        header: &'static str,
        message: String,
    },
}

/// Build the request context from the `x-store-id` / `x-actor-id` headers.
///
/// Both are required on every domain route; nothing falls back to a default store.
pub fn from_headers(headers: &HeaderMap) -> Result<RequestContext, ContextError> {
    let store_id: StoreId = header(headers, STORE_HEADER)?;
    let actor_id: ActorId = header(headers, ACTOR_HEADER)?;
    Ok(RequestContext::new(store_id, actor_id))
}

fn header<T>(headers: &HeaderMap, name: &'static str) -> Result<T, ContextError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    let raw = headers
        .get(name)
        .ok_or(ContextError::Missing(name))?
        .to_str()
        .map_err(|e| ContextError::Invalid {
            header: name,
            message: e.to_string(),
        })?
        .trim();
    if raw.is_empty() {
        return Err(ContextError::Missing(name));
    }
    raw.parse().map_err(|e: T::Err| ContextError::Invalid {
        header: name,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn both_headers_are_required() {
        let store = StoreId::new();
        let actor = ActorId::new();
        let mut headers = HeaderMap::new();
        assert_eq!(from_headers(&headers), Err(ContextError::Missing(STORE_HEADER)));

        headers.insert(STORE_HEADER, HeaderValue::from_str(&store.to_string()).unwrap());
        assert_eq!(from_headers(&headers), Err(ContextError::Missing(ACTOR_HEADER)));

        headers.insert(ACTOR_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert!(matches!(
            from_headers(&headers),
            Err(ContextError::Invalid { header: ACTOR_HEADER, .. })
        ));

        headers.insert(ACTOR_HEADER, HeaderValue::from_str(&actor.to_string()).unwrap());
        assert_eq!(from_headers(&headers), Ok(RequestContext::new(store, actor)));
    }
}
