//! Shared fixtures for the HTTP integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::http::{HeaderValue, header};
use axum_test::{TestResponse, TestServer};
use forum_auth::AuthState;
use forum_auth::api;
use forum_auth::config::{
    AppConfig, CleanupConfig, OAuthConfig, ProviderConfig, RateLimitConfig, SessionConfig,
};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement};

pub const FRONTEND_URL: &str = "http://localhost:3000";

/// Create an in-memory database with the authentication tables.
pub async fn create_test_db() -> Arc<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await.expect("connect");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"CREATE TABLE accounts (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        );"#,
    ))
    .await
    .expect("create accounts table");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"CREATE TABLE credentials (
            account_id TEXT PRIMARY KEY REFERENCES accounts(id) ON DELETE CASCADE,
            password_hash TEXT NOT NULL
        );"#,
    ))
    .await
    .expect("create credentials table");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"CREATE TABLE sessions (
            account_id TEXT PRIMARY KEY REFERENCES accounts(id) ON DELETE CASCADE,
            session_token TEXT NOT NULL UNIQUE,
            csrf_token TEXT NOT NULL,
            ip_address TEXT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );"#,
    ))
    .await
    .expect("create sessions table");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"CREATE TABLE oauth_states (
            state TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            ip_address TEXT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );"#,
    ))
    .await
    .expect("create oauth_states table");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"CREATE TABLE oauth_accounts (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            provider TEXT NOT NULL,
            provider_user_id TEXT NOT NULL,
            provider_email TEXT NULL,
            provider_username TEXT NULL,
            avatar_url TEXT NULL,
            access_token TEXT NULL,
            refresh_token TEXT NULL,
            token_expires_at TEXT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (provider, provider_user_id)
        );"#,
    ))
    .await
    .expect("create oauth_accounts table");

    Arc::new(db)
}

/// Provider section pointing every endpoint at `base` (a mock server).
pub fn mock_provider(name: &str, base: &str) -> ProviderConfig {
    ProviderConfig {
        client_id: format!("{name}-client"),
        client_secret: format!("{name}-secret"),
        redirect_url: format!("http://localhost:8080/auth/{name}/callback"),
        auth_url: Some(format!("{base}/authorize")),
        token_url: Some(format!("{base}/token")),
        userinfo_url: Some(format!("{base}/user")),
        emails_url: Some(format!("{base}/user/emails")),
    }
}

pub fn create_test_config(oauth: OAuthConfig) -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        listen_addr: "127.0.0.1:0".into(),
        frontend_url: FRONTEND_URL.into(),
        session: SessionConfig {
            ttl_secs: 3600,
            cookie_secure: false,
        },
        oauth,
        cleanup: CleanupConfig::default(),
        rate_limit: RateLimitConfig::default(),
    }
}

pub async fn create_test_state(oauth: OAuthConfig) -> AuthState {
    let db = create_test_db().await;
    AuthState::new(db, Arc::new(create_test_config(oauth))).expect("build state")
}

pub fn create_test_server(state: AuthState) -> TestServer {
    TestServer::new(api::app(state)).expect("create test server")
}

/// Value of the cookie `name` set by `response`, if any.
pub fn set_cookie(response: &TestResponse, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| {
            v.strip_prefix(prefix.as_str())
                .map(|rest| rest.split(';').next().unwrap_or_default().to_string())
        })
}

/// Full `Set-Cookie` header for `name`, attributes included.
pub fn set_cookie_header(response: &TestResponse, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(prefix.as_str()))
        .map(str::to_string)
}

pub fn cookie_header(pairs: &[(&str, &str)]) -> HeaderValue {
    let value = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("; ");
    HeaderValue::from_str(&value).expect("cookie header")
}
