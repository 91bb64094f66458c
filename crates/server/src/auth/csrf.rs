//! CSRF protection for state-changing requests.
//!
//! The expected token is the one stored on the caller's session; the
//! presented token comes from the `X-CSRF-Token` header or, for
//! url-encoded forms, a `csrf_token` field. Only an exact match passes.

use axum::{
    body::Body,
    extract::{Form, FromRequest, Request},
    http::{Method, header},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;

use crate::auth::CurrentUser;
use crate::error::AuthError;

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_FORM_FIELD: &str = "csrf_token";

/// Upper bound on a buffered form body.
const FORM_LIMIT: usize = 64 * 1024;

/// Callback paths are protected by the OAuth state instead.
const EXEMPT_PATHS: [&str; 2] = ["/auth/google/callback", "/auth/github/callback"];

#[derive(Deserialize)]
struct CsrfForm {
    csrf_token: Option<String>,
}

pub fn is_exempt(method: &Method, path: &str) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) || EXEMPT_PATHS.contains(&path)
}

/// Byte comparison whose running time depends only on the lengths.
pub fn constant_time_equal(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

/// Compare a presented token against the session's.
pub fn check_token(expected: &str, presented: Option<&str>) -> Result<(), AuthError> {
    if expected.is_empty() {
        return Err(AuthError::CsrfMissing);
    }
    match presented.filter(|t| !t.is_empty()) {
        None => Err(AuthError::CsrfMissing),
        Some(token) if constant_time_equal(token, expected) => Ok(()),
        Some(_) => Err(AuthError::CsrfMismatch),
    }
}

fn is_urlencoded_form(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"))
}

/// Pull `csrf_token` out of a form body, handing back a request whose body
/// is intact for the downstream handler.
async fn take_form_token(req: Request) -> Result<(Request, Option<String>), AuthError> {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, FORM_LIMIT)
        .await
        .map_err(|_| AuthError::Validation("Request body too large".into()))?;

    let form_req = Request::builder()
        .method(Method::POST)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(bytes.clone()))
        .map_err(|e| AuthError::Internal(format!("failed to rebuild request: {e}")))?;
    let token = Form::<CsrfForm>::from_request(form_req, &())
        .await
        .ok()
        .and_then(|Form(form)| form.csrf_token);

    Ok((Request::from_parts(parts, Body::from(bytes)), token))
}

/// Middleware rejecting unsafe requests without a valid token (403).
///
/// Must run after [`authenticate`](crate::auth::middleware::authenticate).
pub async fn csrf_guard(req: Request, next: Next) -> Result<Response, AuthError> {
    if is_exempt(req.method(), req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let Some(expected) =
        CurrentUser::from_extensions(req.extensions()).map(|u| u.session.csrf_token.clone())
    else {
        tracing::warn!(path = %req.uri().path(), "csrf check without session");
        return Err(AuthError::CsrfMissing);
    };

    let header_token = req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|t| !t.is_empty());

    let (req, presented) = match header_token {
        Some(token) => (req, Some(token)),
        None if is_urlencoded_form(&req) => take_form_token(req).await?,
        None => (req, None),
    };

    if let Err(e) = check_token(&expected, presented.as_deref()) {
        tracing::warn!(path = %req.uri().path(), error = %e, "csrf check failed");
        return Err(e);
    }
    Ok(next.run(req).await)
}
