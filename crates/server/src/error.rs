use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Failures raised while talking to an external OAuth provider.
///
/// These never reach the client verbatim; they are logged with provider
/// context and collapsed into [`AuthError::OAuthExchangeFailed`] or
/// [`AuthError::OAuthProfileIncomplete`].
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Transport error calling {endpoint}: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status} from {endpoint}")]
    Status {
        endpoint: &'static str,
        status: reqwest::StatusCode,
    },
    #[error("Invalid JSON from {endpoint}: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Token response did not contain an access_token (error: {0:?})")]
    MissingAccessToken(Option<String>),
    #[error("Provider did not return an email address")]
    NoEmail,
    #[error("Provider did not return a subject identifier")]
    NoSubject,
    #[error("Provider email is {len} characters, longer than the {max} allowed")]
    EmailTooLong { len: usize, max: usize },
    #[error("Invalid endpoint URL {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
}

impl ProviderError {
    /// Whether the failure happened while building the profile rather than
    /// exchanging the code.
    pub fn is_profile_incomplete(&self) -> bool {
        matches!(
            self,
            ProviderError::NoEmail | ProviderError::NoSubject | ProviderError::EmailTooLong { .. }
        )
    }
}

/// Closed set of failures produced by the authentication core.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account not found")]
    AccountNotFound,
    #[error("email is already taken")]
    EmailTaken,
    #[error("username is already taken")]
    UsernameTaken,
    #[error("session not found")]
    SessionNotFound,
    #[error("session expired")]
    SessionExpired,
    #[error("oauth state not found")]
    OAuthStateNotFound,
    #[error("oauth state expired")]
    OAuthStateExpired,
    #[error("oauth state was issued for provider {expected}, not {actual}")]
    OAuthProviderMismatch { expected: String, actual: String },
    #[error("oauth code exchange failed: {0}")]
    OAuthExchangeFailed(#[source] ProviderError),
    #[error("oauth profile incomplete: {0}")]
    OAuthProfileIncomplete(#[source] ProviderError),
    #[error("provider identity is already linked to a different account")]
    OAuthAccountConflict,
    #[error("csrf token missing")]
    CsrfMissing,
    #[error("csrf token mismatch")]
    CsrfMismatch,
    #[error("could not generate a unique username from {0}")]
    UsernameGenerationExhausted(String),
    #[error("unknown oauth provider {0}")]
    UnknownProvider(String),
    #[error("rate limit exceeded, retry in {retry_after}s")]
    TooManyRequests { retry_after: u64 },
    #[error("{0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self {
        if err.is_profile_incomplete() {
            AuthError::OAuthProfileIncomplete(err)
        } else {
            AuthError::OAuthExchangeFailed(err)
        }
    }
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::AccountNotFound
            | AuthError::SessionNotFound
            | AuthError::SessionExpired => StatusCode::UNAUTHORIZED,
            AuthError::EmailTaken | AuthError::UsernameTaken | AuthError::OAuthAccountConflict => {
                StatusCode::CONFLICT
            }
            AuthError::OAuthStateNotFound
            | AuthError::OAuthStateExpired
            | AuthError::OAuthProviderMismatch { .. }
            | AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::OAuthExchangeFailed(_) | AuthError::OAuthProfileIncomplete(_) => {
                StatusCode::BAD_GATEWAY
            }
            AuthError::CsrfMissing | AuthError::CsrfMismatch => StatusCode::FORBIDDEN,
            AuthError::UnknownProvider(_) => StatusCode::NOT_FOUND,
            AuthError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::UsernameGenerationExhausted(_)
            | AuthError::Database(_)
            | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text shown to the client. Never distinguishes an unknown email from a
    /// wrong password and never carries provider or database diagnostics.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials | AuthError::AccountNotFound => {
                "Invalid email or password".to_string()
            }
            AuthError::EmailTaken => "Email is already taken".to_string(),
            AuthError::UsernameTaken => "Username is already taken".to_string(),
            AuthError::SessionNotFound | AuthError::SessionExpired => {
                "Session invalid or expired".to_string()
            }
            AuthError::OAuthStateNotFound
            | AuthError::OAuthStateExpired
            | AuthError::OAuthProviderMismatch { .. } => "Invalid state parameter".to_string(),
            AuthError::OAuthExchangeFailed(_) | AuthError::OAuthProfileIncomplete(_) => {
                "Authentication failed".to_string()
            }
            AuthError::OAuthAccountConflict => {
                "This provider account is linked to a different user".to_string()
            }
            AuthError::CsrfMissing => "Forbidden: CSRF token missing".to_string(),
            AuthError::CsrfMismatch => "Forbidden: Invalid CSRF token".to_string(),
            AuthError::UnknownProvider(p) => format!("Unknown OAuth provider: {p}"),
            AuthError::TooManyRequests { .. } => {
                "Too many requests. Please try again later.".to_string()
            }
            AuthError::Validation(msg) => msg.clone(),
            AuthError::UsernameGenerationExhausted(_)
            | AuthError::Database(_)
            | AuthError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

/// JSON error body returned by every endpoint of the core.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric HTTP status
    pub code: u16,
    /// Canonical reason phrase of the status
    pub error: String,
    /// Human-readable description
    pub message: String,
}

impl ErrorBody {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(ErrorBody::new(status, self.public_message()));
        match self {
            AuthError::TooManyRequests { retry_after } => {
                (status, [(header::RETRY_AFTER, retry_after.to_string())], body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}

/// Whether a storage error is a unique/primary-key violation, i.e. another
/// request created the same row first.
pub fn is_unique_violation(err: &sea_orm::DbErr) -> bool {
    matches!(
        err.sql_err(),
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
    )
}
