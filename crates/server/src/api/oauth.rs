//! OAuth login redirect and provider callback (`/auth/{provider}/*`).

use axum::{
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use utoipa::IntoParams;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::AuthState;
use crate::api::session::open_session;
use crate::auth::ClientIp;
use crate::auth::cookies::{self, OAUTH_STATE_COOKIE};
use crate::auth::csrf::constant_time_equal;
use crate::error::{AuthError, ErrorBody};

/// Tag for OpenAPI documentation.
pub const OAUTH_TAG: &str = "OAuth";

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackQuery {
    /// Authorization code issued by the provider
    pub code: Option<String>,
    /// State value issued by `/auth/{provider}/login`
    pub state: Option<String>,
    /// Set by the provider when the user denied access
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Login redirect; mounted behind the guest gate.
pub fn login_router() -> OpenApiRouter<AuthState> {
    OpenApiRouter::new().routes(routes!(oauth_login))
}

pub fn callback_router() -> OpenApiRouter<AuthState> {
    OpenApiRouter::new().routes(routes!(oauth_callback))
}

#[tracing::instrument(skip(state, jar))]
#[utoipa::path(
    get,
    path = "/auth/{provider}/login",
    tag = OAUTH_TAG,
    operation_id = "OAuth Login",
    summary = "Start an OAuth login",
    description = "Issues a single-use state bound to the provider and caller, stores it in the \
                   `oauth_state` cookie and redirects to the provider's consent page.",
    params(("provider" = String, Path, description = "Provider name", example = "github")),
    responses(
        (status = 307, description = "Redirect to the provider"),
        (status = 303, description = "Already logged in"),
        (status = 404, description = "Unknown or disabled provider", body = ErrorBody)
    )
)]
pub async fn oauth_login(
    State(state): State<AuthState>,
    Path(provider): Path<String>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AuthError> {
    let (provider, adapter) = state.providers.resolve(&provider)?;
    let oauth_state = state.oauth_states.issue(provider, Some(&ip)).await?;
    let url = adapter.authorize_url(&oauth_state).map_err(|e| {
        tracing::error!(%provider, error = %e, "cannot build authorization url");
        AuthError::Internal(e.to_string())
    })?;

    let jar = jar.add(cookies::oauth_state_cookie(
        &oauth_state,
        state.oauth_states.ttl(),
        state.config.session.cookie_secure,
    ));
    Ok((jar, Redirect::temporary(&url)))
}

#[tracing::instrument(skip(state, jar, query))]
#[utoipa::path(
    get,
    path = "/auth/{provider}/callback",
    tag = OAUTH_TAG,
    operation_id = "OAuth Callback",
    summary = "Complete an OAuth login",
    description = "Consumes the state, exchanges the code, resolves or creates the local account, \
                   starts a session and redirects to the front-end.",
    params(
        ("provider" = String, Path, description = "Provider name", example = "google"),
        CallbackQuery
    ),
    responses(
        (status = 302, description = "Logged in; redirect to the front-end"),
        (status = 400, description = "Invalid state parameter, provider error or missing code", body = ErrorBody),
        (status = 404, description = "Unknown or disabled provider", body = ErrorBody),
        (status = 409, description = "Provider identity linked to another account", body = ErrorBody),
        (status = 502, description = "Authentication with the provider failed", body = ErrorBody)
    )
)]
pub async fn oauth_callback(
    State(state): State<AuthState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
) -> Result<Response, AuthError> {
    let (provider, adapter) = state.providers.resolve(&provider)?;

    if let Some(error) = query.error.as_deref() {
        tracing::warn!(
            %provider,
            error,
            description = query.error_description.as_deref().unwrap_or_default(),
            "provider returned an error"
        );
        return Err(AuthError::Validation(format!(
            "OAuth provider returned an error: {error}"
        )));
    }

    let presented = query
        .state
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(AuthError::OAuthStateNotFound)?;

    // Consume first: a presented value is spent whatever happens next.
    state.oauth_states.validate(presented, provider).await?;

    let cookie_matches = jar
        .get(OAUTH_STATE_COOKIE)
        .is_some_and(|c| constant_time_equal(c.value(), presented));
    if !cookie_matches {
        tracing::warn!(%provider, "oauth state does not match cookie");
        return Err(AuthError::OAuthStateNotFound);
    }

    let code = query
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AuthError::Validation("Missing authorization code".into()))?;

    let tokens = adapter.exchange_code(code).await.map_err(|e| {
        tracing::warn!(%provider, error = %e, "oauth code exchange failed");
        AuthError::from(e)
    })?;
    let profile = adapter
        .fetch_profile(&tokens.access_token)
        .await
        .map_err(|e| {
            tracing::warn!(%provider, error = %e, "oauth profile fetch failed");
            AuthError::from(e)
        })?;

    let resolved = state.linker.resolve(provider, &profile, &tokens).await?;
    let (jar, _) = open_session(&state, jar, &resolved.account, &ip).await?;
    let jar = cookies::without_oauth_state(jar);
    tracing::info!(
        %provider,
        account_id = %resolved.account.id,
        outcome = ?resolved.outcome,
        "oauth login"
    );

    let target = format!(
        "{}{}",
        state.config.frontend_url.trim_end_matches('/'),
        state.config.oauth.success_redirect
    );
    Ok((jar, (StatusCode::FOUND, [(header::LOCATION, target)])).into_response())
}
