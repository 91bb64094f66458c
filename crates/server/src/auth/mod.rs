//! Password login, sessions and request-level identity.

pub mod client_ip;
pub mod cookies;
pub mod credentials;
pub mod csrf;
pub mod middleware;
pub mod rate_limit;
pub mod session;

use base64::Engine;

use crate::error::AuthError;

pub use client_ip::ClientIp;
pub use middleware::CurrentUser;
pub use rate_limit::RateLimiter;
pub use session::{Session, SessionStore};

/// 256 random bits, URL-safe base64 without padding.
///
/// Used for session tokens, CSRF tokens and OAuth state values.
pub fn generate_token() -> Result<String, AuthError> {
    let mut bytes = [0u8; 32];
    getrandom::fill(&mut bytes)
        .map_err(|e| AuthError::Internal(format!("failed to generate random bytes: {e}")))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}
