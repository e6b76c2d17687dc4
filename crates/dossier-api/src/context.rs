//! Per-request caller context.

use axum::http::request::Parts;
use axum::http::{header, HeaderMap};

use crate::error::ApiError;

/// Header carrying the client's upload session.
pub const SESSION_HEADER: &str = "x-session-id";

/// Bearer token and session id taken from request headers.
///
/// A missing token is kept as an empty string so upload operations can
/// report `UNAUTHORIZED` in their own result shape; read endpoints call
/// [`RequestContext::require_token`].
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub token: String,
    pub session_id: String,
}

impl RequestContext {
    pub fn require_token(&self) -> Result<&str, ApiError> {
        if self.token.is_empty() {
            return Err(ApiError::Unauthorized("Missing bearer token".to_string()));
        }
        Ok(&self.token)
    }
}

/// Token from an `Authorization: Bearer ...` header, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session_id = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::BadRequest("Missing X-Session-Id header".to_string()))?
            .to_string();

        Ok(RequestContext {
            token: bearer_token(&parts.headers).unwrap_or_default(),
            session_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc123"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(bearer_token(&headers), None);
    }
}
