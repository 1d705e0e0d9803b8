//! Identity verification for inbound connections.
//!
//! Both the WebSocket handshake and the chat-history REST route carry a
//! session token in the `token` cookie (this channel has no bearer-header
//! fallback). The token is resolved against the session table; absent,
//! unknown, or expired credentials refuse the request before any handler
//! runs.

use axum::http::{header, HeaderMap};
use chrono::Utc;

use matcha_store::{StoreError, User};

use crate::api::AppState;
use crate::error::ServerError;

/// Pull the `token` cookie out of the request headers.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;

    cookie_header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "token" && !value.is_empty()).then(|| value.to_string())
    })
}

/// Resolve the request's credential to a user.
pub async fn authenticate(headers: &HeaderMap, state: &AppState) -> Result<User, ServerError> {
    let token = extract_token(headers).ok_or(ServerError::Unauthorized)?;

    let db = state.store.lock().await;

    let session = db
        .find_session(&token)?
        .ok_or(ServerError::Unauthorized)?;

    if session.is_expired(Utc::now()) {
        return Err(ServerError::Unauthorized);
    }

    db.get_user(session.user_id).map_err(|e| match e {
        StoreError::NotFound => ServerError::Unauthorized,
        other => ServerError::Store(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn token_is_extracted_among_other_cookies() {
        let headers = headers_with_cookie("theme=dark; token=abc123; lang=en");
        assert_eq!(extract_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn missing_or_empty_token_yields_none() {
        assert_eq!(extract_token(&HeaderMap::new()), None);
        assert_eq!(extract_token(&headers_with_cookie("theme=dark")), None);
        assert_eq!(extract_token(&headers_with_cookie("token=")), None);
    }

    #[test]
    fn token_name_must_match_exactly() {
        let headers = headers_with_cookie("xtoken=abc; tokenx=def");
        assert_eq!(extract_token(&headers), None);
    }
}
