//! Single-use OAuth `state` values.
//!
//! A state is bound to the provider it was issued for and the requester's IP.
//! Consumption is delete-then-check-rows-affected: of any number of
//! concurrent callbacks presenting the same value, exactly one sees its
//! delete succeed.

use std::sync::Arc;

use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use time::{Duration, OffsetDateTime};

use crate::auth::generate_token;
use crate::entity::oauth_state;
use crate::error::AuthError;
use crate::oauth::provider::Provider;

#[derive(Clone, Debug)]
pub struct OAuthStateGuard {
    db: Arc<DatabaseConnection>,
    ttl: Duration,
}

impl OAuthStateGuard {
    pub fn new(db: Arc<DatabaseConnection>, ttl_secs: i64) -> Self {
        Self {
            db,
            ttl: Duration::seconds(ttl_secs),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a fresh state for `provider` and return its value.
    #[tracing::instrument(skip(self))]
    pub async fn issue(&self, provider: Provider, ip: Option<&str>) -> Result<String, AuthError> {
        let now = OffsetDateTime::now_utc();
        let state = generate_token()?;
        oauth_state::ActiveModel {
            state: Set(state.clone()),
            provider: Set(provider.as_str().to_string()),
            ip_address: Set(ip.map(str::to_string)),
            created_at: Set(now),
            expires_at: Set(now + self.ttl),
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(state)
    }

    /// Consume `state`. Every outcome other than `StateNotFound` deletes the
    /// row, so a value can pass at most once and never twice after failing.
    #[tracing::instrument(skip(self, state))]
    pub async fn validate(&self, state: &str, expected: Provider) -> Result<(), AuthError> {
        let Some(row) = oauth_state::Entity::find_by_id(state.to_string())
            .one(self.db.as_ref())
            .await?
        else {
            return Err(AuthError::OAuthStateNotFound);
        };

        let deleted = oauth_state::Entity::delete_many()
            .filter(oauth_state::Column::State.eq(state))
            .exec(self.db.as_ref())
            .await?;
        if deleted.rows_affected != 1 {
            tracing::warn!(provider = %expected, "oauth state consumed concurrently");
            return Err(AuthError::OAuthStateNotFound);
        }

        if row.is_expired_at(OffsetDateTime::now_utc()) {
            return Err(AuthError::OAuthStateExpired);
        }
        if row.provider != expected.as_str() {
            tracing::warn!(
                issued_for = %row.provider,
                presented_for = %expected,
                "oauth state provider mismatch"
            );
            return Err(AuthError::OAuthProviderMismatch {
                expected: row.provider,
                actual: expected.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Remove states that expired without being consumed.
    pub async fn delete_expired(&self) -> Result<u64, AuthError> {
        let res = oauth_state::Entity::delete_many()
            .filter(oauth_state::Column::ExpiresAt.lte(OffsetDateTime::now_utc()))
            .exec(self.db.as_ref())
            .await?;
        Ok(res.rows_affected)
    }
}
