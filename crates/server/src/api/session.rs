//! Password login, registration and session endpoints (`/session/*`).

use axum::{Json, extract::State, http::StatusCode};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::AuthState;
use crate::accounts::{self, Account, NewAccount};
use crate::auth::cookies::{self, SESSION_COOKIE};
use crate::auth::credentials;
use crate::auth::{ClientIp, CurrentUser, Session, generate_token};
use crate::entity::oauth_account;
use crate::error::{AuthError, ErrorBody};

/// Tag for OpenAPI documentation.
pub const SESSION_TAG: &str = "Session";

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "jane@example.com")]
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[schema(example = "jane_doe")]
    pub username: String,
    #[schema(example = "jane@example.com")]
    pub email: String,
    pub password: String,
}

/// Public view of an account.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserView {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&Account> for UserView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            username: account.username.clone(),
            email: account.email.clone(),
            created_at: account.created_at,
        }
    }
}

/// Returned by login, registration and verify.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub user: UserView,
    /// Session token, also set as the `session_id` cookie
    pub session_id: String,
    /// Token to echo in `X-CSRF-Token` on state-changing requests
    pub csrf_token: String,
}

impl SessionResponse {
    fn new(account: &Account, session: &Session) -> Self {
        Self {
            user: account.into(),
            session_id: session.session_token.clone(),
            csrf_token: session.csrf_token.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LinkedProviderView {
    pub provider: String,
    pub provider_username: Option<String>,
    pub provider_email: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub linked_at: OffsetDateTime,
}

impl From<oauth_account::Model> for LinkedProviderView {
    fn from(link: oauth_account::Model) -> Self {
        Self {
            provider: link.provider,
            provider_username: link.provider_username,
            provider_email: link.provider_email,
            avatar_url: link.avatar_url,
            linked_at: link.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProfileResponse {
    pub user: UserView,
    pub providers: Vec<LinkedProviderView>,
    pub has_password: bool,
}

/// Create a session for `account` and attach its cookies.
pub(crate) async fn open_session(
    state: &AuthState,
    jar: CookieJar,
    account: &Account,
    ip: &str,
) -> Result<(CookieJar, SessionResponse), AuthError> {
    let csrf_token = generate_token()?;
    let session = state
        .sessions
        .create(&account.id, Some(ip), &csrf_token)
        .await?;
    let jar = cookies::with_session(jar, &session, state.config.session.cookie_secure);
    Ok((jar, SessionResponse::new(account, &session)))
}

/// Routes open to everyone.
pub fn public_router() -> OpenApiRouter<AuthState> {
    OpenApiRouter::new()
        .routes(routes!(logout))
        .routes(routes!(verify))
}

/// Password login, for callers without a session.
pub fn login_router() -> OpenApiRouter<AuthState> {
    OpenApiRouter::new().routes(routes!(login))
}

/// Account creation, for callers without a session.
pub fn register_router() -> OpenApiRouter<AuthState> {
    OpenApiRouter::new().routes(routes!(register))
}

/// Routes requiring a session (and CSRF on unsafe methods).
pub fn protected_router() -> OpenApiRouter<AuthState> {
    OpenApiRouter::new()
        .routes(routes!(logout_all))
        .routes(routes!(profile))
}

#[tracing::instrument(skip(state, jar, payload))]
#[utoipa::path(
    post,
    path = "/session/login",
    tag = SESSION_TAG,
    operation_id = "Login",
    summary = "Log in with email and password",
    description = "Verifies the credentials and starts a new session. Any previous session of the \
                   account is replaced. Sets the `session_id` and `csrf_token` cookies.",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = SessionResponse),
        (status = 303, description = "Caller already has a session; redirected to /"),
        (status = 400, description = "Missing email or password", body = ErrorBody),
        (status = 401, description = "Invalid email or password", body = ErrorBody)
    )
)]
pub async fn login(
    State(state): State<AuthState>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<SessionResponse>), AuthError> {
    let email = accounts::normalize_email(&payload.email);
    if email.is_empty() || payload.password.is_empty() {
        return Err(AuthError::Validation(
            "Email and password are required".into(),
        ));
    }

    let account = match state.accounts.get_by_email(&email).await {
        Ok(account) => Some(account),
        Err(AuthError::AccountNotFound) => None,
        Err(e) => return Err(e),
    };
    let hash = match &account {
        Some(account) => state.accounts.password_hash(&account.id).await?,
        None => None,
    };

    let verified = credentials::verify_password_blocking(payload.password, hash).await?;
    let account = match account {
        Some(account) if verified => account,
        _ => {
            tracing::info!("login rejected");
            return Err(AuthError::InvalidCredentials);
        }
    };

    let (jar, body) = open_session(&state, jar, &account, &ip).await?;
    tracing::info!(account_id = %account.id, "password login");
    Ok((jar, Json(body)))
}

#[tracing::instrument(skip(state, jar, payload), fields(username = %payload.username))]
#[utoipa::path(
    post,
    path = "/session/register",
    tag = SESSION_TAG,
    operation_id = "Register",
    summary = "Create a password account",
    description = "Creates the account and its credential, then starts a session exactly like login.",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created and logged in", body = SessionResponse),
        (status = 303, description = "Caller already has a session; redirected to /"),
        (status = 400, description = "Invalid username, email or password", body = ErrorBody),
        (status = 409, description = "Email or username already taken", body = ErrorBody),
        (status = 429, description = "Too many registrations from this address", body = ErrorBody)
    )
)]
pub async fn register(
    State(state): State<AuthState>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<SessionResponse>), AuthError> {
    let username = payload.username.trim().to_string();
    let email = accounts::normalize_email(&payload.email);
    accounts::validate_username(&username)?;
    accounts::validate_email(&email)?;
    credentials::validate_password_policy(&payload.password)?;

    let hash = credentials::hash_password_blocking(payload.password).await?;
    let account = state
        .accounts
        .create(NewAccount::new(username, &email), Some(hash))
        .await?;

    let (jar, body) = open_session(&state, jar, &account, &ip).await?;
    Ok((StatusCode::CREATED, jar, Json(body)))
}

#[tracing::instrument(skip(state, jar))]
#[utoipa::path(
    post,
    path = "/session/logout",
    tag = SESSION_TAG,
    operation_id = "Logout",
    summary = "End the current session",
    description = "Deletes the session named by the `session_id` cookie, if any, and clears the \
                   session cookies. Succeeds even without a session.",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse)
    )
)]
pub async fn logout(
    State(state): State<AuthState>,
    jar: CookieJar,
) -> (CookieJar, Json<MessageResponse>) {
    if let Some(token) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) {
        // Cookies are cleared regardless.
        if let Err(e) = state.sessions.delete(&token).await {
            tracing::error!(error = %e, "failed to delete session on logout");
        }
    }
    (
        cookies::without_session(jar),
        Json(MessageResponse {
            message: "Logged out successfully".into(),
        }),
    )
}

#[tracing::instrument(skip(state, jar, user), fields(account_id = %user.account.id))]
#[utoipa::path(
    post,
    path = "/session/logout-all",
    tag = SESSION_TAG,
    operation_id = "Logout Everywhere",
    summary = "End every session of the account",
    description = "Requires a session and a matching `X-CSRF-Token` header or `csrf_token` form field.",
    responses(
        (status = 200, description = "All sessions ended", body = MessageResponse),
        (status = 401, description = "Not logged in", body = ErrorBody),
        (status = 403, description = "CSRF token missing or invalid", body = ErrorBody)
    )
)]
pub async fn logout_all(
    State(state): State<AuthState>,
    jar: CookieJar,
    user: CurrentUser,
) -> Result<(CookieJar, Json<MessageResponse>), AuthError> {
    state
        .sessions
        .delete_all_for_account(&user.account.id)
        .await?;
    Ok((
        cookies::without_session(jar),
        Json(MessageResponse {
            message: "Logged out from all sessions".into(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/session/verify",
    tag = SESSION_TAG,
    operation_id = "Verify Session",
    summary = "Describe the current session",
    responses(
        (status = 200, description = "Session is valid", body = SessionResponse),
        (status = 401, description = "No valid session", body = ErrorBody)
    )
)]
pub async fn verify(user: CurrentUser) -> Json<SessionResponse> {
    Json(SessionResponse::new(&user.account, &user.session))
}

#[tracing::instrument(skip(state, user), fields(account_id = %user.account.id))]
#[utoipa::path(
    get,
    path = "/session/profile",
    tag = SESSION_TAG,
    operation_id = "Profile",
    summary = "Account details with linked providers",
    responses(
        (status = 200, description = "Profile of the logged-in account", body = ProfileResponse),
        (status = 401, description = "Not logged in", body = ErrorBody)
    )
)]
pub async fn profile(
    State(state): State<AuthState>,
    user: CurrentUser,
) -> Result<Json<ProfileResponse>, AuthError> {
    let links = state.accounts.oauth_links(&user.account.id).await?;
    let has_password = state
        .accounts
        .password_hash(&user.account.id)
        .await?
        .is_some();
    Ok(Json(ProfileResponse {
        user: (&user.account).into(),
        providers: links.into_iter().map(Into::into).collect(),
        has_password,
    }))
}
