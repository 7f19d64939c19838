//! Request context extraction.
//!
//! The fronting gateway authenticates the user and forwards their id in
//! `X-User-Id`. Every response echoes a request id, taken from the caller's
//! `X-Request-Id` or generated here.

use axum::async_trait;
use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::header::HeaderName;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use core_auth::UserId;
use tracing::Instrument;

use crate::error::ApiError;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const USER_ID_HEADER: &str = "x-user-id";

/// Correlation id of the request being served.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// The user a request acts for.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = header_string(&parts.headers, USER_ID_HEADER)
            .ok_or_else(|| ApiError::unauthorized("missing X-User-Id header"))?;
        let user = UserId::parse(raw).map_err(|e| ApiError::bad_request(e.to_string()))?;
        Ok(Self(user))
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn add_request_id_header(response: &mut Response, request_id: &str) {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
}

/// Middleware that tags the request with an id and echoes it back.
pub async fn request_id_middleware(mut req: Request<Body>, next: Next) -> Response {
    let request_id = header_string(req.headers(), REQUEST_ID_HEADER)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let span = tracing::info_span!("request", request_id = %request_id);
    let mut response = next.run(req).instrument(span).await;
    add_request_id_header(&mut response, &request_id);
    response
}
