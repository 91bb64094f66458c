//! Authentication core of the forum backend.
//!
//! Password credentials, one server-side session per account with a
//! per-session CSRF token, and OAuth2 login through Google and GitHub with
//! linking of provider identities onto local accounts.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::accounts::AccountRepo;
use crate::auth::{RateLimiter, SessionStore};
use crate::config::AppConfig;
use crate::error::AuthError;
use crate::oauth::{AccountLinker, OAuthStateGuard, ProviderRegistry};

pub mod accounts;
pub mod api;
pub mod auth;
pub mod cleanup;
pub mod config;
pub mod entity;
pub mod error;
pub mod oauth;

#[cfg(test)]
pub(crate) mod test_support;

/// Shared application state handed to every handler and middleware.
#[derive(Clone, Debug)]
pub struct AuthState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub accounts: AccountRepo,
    pub sessions: SessionStore,
    pub oauth_states: OAuthStateGuard,
    pub providers: ProviderRegistry,
    pub linker: AccountLinker,
    pub register_limiter: RateLimiter,
}

impl AuthState {
    /// Build state with the providers enabled in `config`.
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<AppConfig>) -> Result<Self, AuthError> {
        let providers = ProviderRegistry::from_config(&config.oauth)?;
        Ok(Self::with_providers(db, config, providers))
    }

    pub fn with_providers(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            accounts: AccountRepo::new(db.clone()),
            sessions: SessionStore::new(db.clone(), config.session.ttl_secs),
            oauth_states: OAuthStateGuard::new(db.clone(), config.oauth.state_ttl_secs),
            linker: AccountLinker::new(db.clone()),
            register_limiter: RateLimiter::for_registrations(&config.rate_limit),
            providers,
            db,
            config,
        }
    }
}
