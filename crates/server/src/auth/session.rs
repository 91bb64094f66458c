//! Server-side sessions, one live row per account.
//!
//! Creating a session upserts on the account id, so whatever token the
//! account held before stops resolving the moment the new one is written.

use std::sync::Arc;

use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, sea_query::OnConflict,
};
use time::{Duration, OffsetDateTime};

use crate::auth::generate_token;
use crate::entity::session;
use crate::error::AuthError;

pub type Session = session::Model;

#[derive(Clone, Debug)]
pub struct SessionStore {
    db: Arc<DatabaseConnection>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(db: Arc<DatabaseConnection>, ttl_secs: i64) -> Self {
        Self {
            db,
            ttl: Duration::seconds(ttl_secs),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh session for `account_id`, replacing any previous one.
    #[tracing::instrument(skip(self, csrf_token))]
    pub async fn create(
        &self,
        account_id: &str,
        ip: Option<&str>,
        csrf_token: &str,
    ) -> Result<Session, AuthError> {
        let now = OffsetDateTime::now_utc();
        let model = Session {
            account_id: account_id.to_string(),
            session_token: generate_token()?,
            csrf_token: csrf_token.to_string(),
            ip_address: ip.map(str::to_string),
            created_at: now,
            expires_at: now + self.ttl,
        };

        let active = session::ActiveModel {
            account_id: Set(model.account_id.clone()),
            session_token: Set(model.session_token.clone()),
            csrf_token: Set(model.csrf_token.clone()),
            ip_address: Set(model.ip_address.clone()),
            created_at: Set(model.created_at),
            expires_at: Set(model.expires_at),
        };

        session::Entity::insert(active)
            .on_conflict(
                OnConflict::column(session::Column::AccountId)
                    .update_columns([
                        session::Column::SessionToken,
                        session::Column::CsrfToken,
                        session::Column::IpAddress,
                        session::Column::CreatedAt,
                        session::Column::ExpiresAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;

        tracing::debug!(account_id, "session created");
        Ok(model)
    }

    /// Resolve a session token. Expired rows are deleted on sight.
    pub async fn get_by_token(&self, token: &str) -> Result<Session, AuthError> {
        let Some(found) = session::Entity::find()
            .filter(session::Column::SessionToken.eq(token))
            .one(self.db.as_ref())
            .await?
        else {
            return Err(AuthError::SessionNotFound);
        };

        if found.is_expired_at(OffsetDateTime::now_utc()) {
            // Only delete the row we saw; a concurrent re-login may already
            // have replaced it with a new token.
            session::Entity::delete_many()
                .filter(session::Column::SessionToken.eq(token))
                .exec(self.db.as_ref())
                .await?;
            return Err(AuthError::SessionExpired);
        }

        Ok(found)
    }

    pub async fn delete(&self, token: &str) -> Result<(), AuthError> {
        session::Entity::delete_many()
            .filter(session::Column::SessionToken.eq(token))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_all_for_account(&self, account_id: &str) -> Result<(), AuthError> {
        session::Entity::delete_many()
            .filter(session::Column::AccountId.eq(account_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Remove every session past its expiry. Returns the number removed.
    pub async fn delete_expired(&self) -> Result<u64, AuthError> {
        let res = session::Entity::delete_many()
            .filter(session::Column::ExpiresAt.lte(OffsetDateTime::now_utc()))
            .exec(self.db.as_ref())
            .await?;
        Ok(res.rows_affected)
    }
}
