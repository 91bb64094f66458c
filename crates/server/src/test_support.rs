//! In-memory SQLite fixtures shared by unit tests.

use std::sync::Arc;

use sea_orm::{
    ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, DbBackend, Set, Statement,
};

use crate::AuthState;
use crate::config::{AppConfig, CleanupConfig, OAuthConfig, RateLimitConfig, SessionConfig};
use crate::entity::account;

const SCHEMA: [&str; 5] = [
    r#"CREATE TABLE accounts (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL
    );"#,
    r#"CREATE TABLE credentials (
        account_id TEXT PRIMARY KEY REFERENCES accounts(id) ON DELETE CASCADE,
        password_hash TEXT NOT NULL
    );"#,
    r#"CREATE TABLE sessions (
        account_id TEXT PRIMARY KEY REFERENCES accounts(id) ON DELETE CASCADE,
        session_token TEXT NOT NULL UNIQUE,
        csrf_token TEXT NOT NULL,
        ip_address TEXT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    );"#,
    r#"CREATE TABLE oauth_states (
        state TEXT PRIMARY KEY,
        provider TEXT NOT NULL,
        ip_address TEXT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    );"#,
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
];

pub async fn setup_db() -> Arc<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await.expect("connect");
    for sql in SCHEMA {
        db.execute(Statement::from_string(DbBackend::Sqlite, sql))
            .await
            .expect("create table");
    }
    Arc::new(db)
}

pub async fn insert_account(db: &Arc<DatabaseConnection>, id: &str, username: &str, email: &str) {
    account::ActiveModel {
        id: Set(id.to_string()),
        username: Set(username.to_string()),
        email: Set(email.to_string()),
        created_at: Set(time::OffsetDateTime::now_utc()),
    }
    .insert(db.as_ref())
    .await
    .expect("insert account");
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        listen_addr: "127.0.0.1:0".into(),
        frontend_url: "http://localhost:3000".into(),
        session: SessionConfig::default(),
        oauth: OAuthConfig::default(),
        cleanup: CleanupConfig::default(),
        rate_limit: RateLimitConfig::default(),
    }
}

pub async fn test_state() -> AuthState {
    AuthState::new(setup_db().await, Arc::new(test_config())).expect("state")
}
