//! Account and credential storage used by the authentication core.
//!
//! This is the only way the core reaches the account tables: lookups by
//! email, id and username, creation (optionally with a password), and the
//! credential accessor.

use std::sync::Arc;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use time::OffsetDateTime;

use crate::entity::{account, credential, oauth_account};
use crate::error::{AuthError, is_unique_violation};

pub type Account = account::Model;

/// Validated input for a new account. Email is lower-cased on construction.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
}

impl NewAccount {
    pub fn new(username: impl Into<String>, email: &str) -> Self {
        Self {
            username: username.into(),
            email: normalize_email(email),
        }
    }

    fn into_active(self, now: OffsetDateTime) -> account::ActiveModel {
        account::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            username: Set(self.username),
            email: Set(self.email),
            created_at: Set(now),
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Username rules for registration: 3 to 50 characters of ASCII letters,
/// digits and underscores.
pub fn validate_username(username: &str) -> Result<(), AuthError> {
    let len = username.chars().count();
    if !(3..=50).contains(&len) {
        return Err(AuthError::Validation(
            "Username must be between 3 and 50 characters".into(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(AuthError::Validation(
            "Username may only contain letters, numbers and underscores".into(),
        ));
    }
    Ok(())
}

/// Width of the `accounts.email` column.
pub const MAX_EMAIL_LEN: usize = 100;

/// Minimal shape check; deliverability is not this layer's concern.
pub fn validate_email(email: &str) -> Result<(), AuthError> {
    let valid = email.chars().count() <= MAX_EMAIL_LEN
        && email.split_once('@').is_some_and(|(local, domain)| {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        })
        && !email.chars().any(char::is_whitespace);
    if valid {
        Ok(())
    } else {
        Err(AuthError::Validation("Invalid email address".into()))
    }
}

#[derive(Clone, Debug)]
pub struct AccountRepo {
    db: Arc<DatabaseConnection>,
}

impl AccountRepo {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Account, AuthError> {
        find_by_email(self.db.as_ref(), email)
            .await?
            .ok_or(AuthError::AccountNotFound)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Account, AuthError> {
        account::Entity::find_by_id(id.to_string())
            .one(self.db.as_ref())
            .await?
            .ok_or(AuthError::AccountNotFound)
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Account, AuthError> {
        find_by_username(self.db.as_ref(), username)
            .await?
            .ok_or(AuthError::AccountNotFound)
    }

    /// Create an account, with a credential row when `password_hash` is
    /// given, in a single transaction.
    #[tracing::instrument(skip(self, password_hash), fields(username = %new.username))]
    pub async fn create(
        &self,
        new: NewAccount,
        password_hash: Option<String>,
    ) -> Result<Account, AuthError> {
        let email = new.email.clone();
        let username = new.username.clone();
        if find_by_email(self.db.as_ref(), &email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }
        if find_by_username(self.db.as_ref(), &username).await?.is_some() {
            return Err(AuthError::UsernameTaken);
        }

        let txn = self.db.begin().await?;
        let created = match new.into_active(OffsetDateTime::now_utc()).insert(&txn).await {
            Ok(created) => created,
            Err(e) if is_unique_violation(&e) => {
                txn.rollback().await?;
                // Lost a race; report whichever key the winner took.
                return Err(if find_by_email(self.db.as_ref(), &email).await?.is_some() {
                    AuthError::EmailTaken
                } else {
                    AuthError::UsernameTaken
                });
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(hash) = password_hash {
            credential::ActiveModel {
                account_id: Set(created.id.clone()),
                password_hash: Set(hash),
            }
            .insert(&txn)
            .await?;
        }
        txn.commit().await?;

        tracing::info!(account_id = %created.id, "account created");
        Ok(created)
    }

    /// Stored password hash, `None` for OAuth-only accounts.
    pub async fn password_hash(&self, account_id: &str) -> Result<Option<String>, AuthError> {
        Ok(credential::Entity::find_by_id(account_id.to_string())
            .one(self.db.as_ref())
            .await?
            .map(|c| c.password_hash))
    }

    /// Provider links held by an account, oldest first.
    pub async fn oauth_links(
        &self,
        account_id: &str,
    ) -> Result<Vec<oauth_account::Model>, AuthError> {
        Ok(oauth_account::Entity::find()
            .filter(oauth_account::Column::AccountId.eq(account_id))
            .order_by_asc(oauth_account::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?)
    }
}

pub(crate) async fn find_by_email<C: ConnectionTrait>(
    db: &C,
    email: &str,
) -> Result<Option<Account>, sea_orm::DbErr> {
    account::Entity::find()
        .filter(account::Column::Email.eq(normalize_email(email)))
        .one(db)
        .await
}

pub(crate) async fn find_by_username<C: ConnectionTrait>(
    db: &C,
    username: &str,
) -> Result<Option<Account>, sea_orm::DbErr> {
    account::Entity::find()
        .filter(account::Column::Username.eq(username))
        .one(db)
        .await
}
