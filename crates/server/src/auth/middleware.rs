//! Resolves the caller's identity from the session cookie on every request.
//!
//! [`authenticate`] never rejects; it only decides whether a [`CurrentUser`]
//! is attached to the request. Rejection is left to the gates
//! [`require_authenticated`] and [`require_guest`] and to handlers taking
//! [`CurrentUser`] as an extractor.

use axum::{
    Json,
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;

use crate::AuthState;
use crate::accounts::Account;
use crate::auth::Session;
use crate::auth::cookies::{self, SESSION_COOKIE};
use crate::error::{AuthError, ErrorBody};

/// Identity attached to an authenticated request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub account: Account,
    pub session: Session,
}

impl CurrentUser {
    /// Optional lookup for handlers serving both guests and members.
    pub fn from_extensions(extensions: &axum::http::Extensions) -> Option<&CurrentUser> {
        extensions.get::<CurrentUser>()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::SessionNotFound)
    }
}

enum Resolution {
    NoCookie,
    Invalid,
    Authenticated(CurrentUser),
}

async fn resolve(state: &AuthState, jar: &CookieJar) -> Resolution {
    let Some(token) = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
    else {
        return Resolution::NoCookie;
    };

    let session = match state.sessions.get_by_token(&token).await {
        Ok(session) => session,
        Err(AuthError::SessionNotFound | AuthError::SessionExpired) => {
            return Resolution::Invalid;
        }
        Err(e) => {
            // Storage trouble is not proof the cookie is bad; keep it.
            tracing::error!(error = %e, "session lookup failed");
            return Resolution::NoCookie;
        }
    };

    match state.accounts.get_by_id(&session.account_id).await {
        Ok(account) => Resolution::Authenticated(CurrentUser { account, session }),
        Err(AuthError::AccountNotFound) => {
            tracing::warn!(account_id = %session.account_id, "session references missing account");
            Resolution::Invalid
        }
        Err(e) => {
            tracing::error!(error = %e, "account lookup failed");
            Resolution::NoCookie
        }
    }
}

/// Attach [`CurrentUser`] when the session cookie resolves; clear the cookie
/// when it names a missing or expired session or a vanished account.
pub async fn authenticate(
    State(state): State<AuthState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    match resolve(&state, &jar).await {
        Resolution::NoCookie => next.run(req).await,
        Resolution::Invalid => {
            let response = next.run(req).await;
            // A login on this request already replaced the cookie.
            if sets_cookie(response.headers(), SESSION_COOKIE) {
                return response;
            }
            (cookies::without_session(jar), response).into_response()
        }
        Resolution::Authenticated(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
    }
}

fn sets_cookie(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.strip_prefix(name).is_some_and(|rest| rest.starts_with('=')))
}

fn wants_json(headers: &HeaderMap) -> bool {
    [header::ACCEPT, header::CONTENT_TYPE].iter().any(|name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"))
    })
}

/// 401 JSON for API callers, 303 to `/login` for browsers.
pub async fn require_authenticated(req: Request, next: Next) -> Response {
    if CurrentUser::from_extensions(req.extensions()).is_some() {
        return next.run(req).await;
    }
    if wants_json(req.headers()) {
        let status = StatusCode::UNAUTHORIZED;
        (status, Json(ErrorBody::new(status, "Authentication required"))).into_response()
    } else {
        Redirect::to("/login").into_response()
    }
}

/// Bounce signed-in users to `/`.
pub async fn require_guest(req: Request, next: Next) -> Response {
    if CurrentUser::from_extensions(req.extensions()).is_some() {
        return Redirect::to("/").into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn json_detection_uses_accept_or_content_type() {
        let mut headers = HeaderMap::new();
        assert!(!wants_json(&headers));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        assert!(!wants_json(&headers));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        assert!(wants_json(&headers));
    }

    #[test]
    fn set_cookie_detection_matches_exact_name() {
        let mut headers = HeaderMap::new();
        headers.append(
            header::SET_COOKIE,
            HeaderValue::from_static("session_id_old=x; Path=/"),
        );
        assert!(!sets_cookie(&headers, SESSION_COOKIE));
        headers.append(
            header::SET_COOKIE,
            HeaderValue::from_static("session_id=tok; HttpOnly; Path=/"),
        );
        assert!(sets_cookie(&headers, SESSION_COOKIE));
    }
}
