//! Maps a provider profile onto a local account.
//!
//! Resolution order: an account with the profile's email, then an account
//! already linked to `(provider, subject)`, then a new OAuth-only account.
//! The store's unique keys on email, username and `(provider, subject)` are
//! the final word under concurrency; a violation means another request got
//! there first, and the whole resolution is retried as a lookup.

use std::collections::HashSet;
use std::sync::Arc;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait,
};
use time::{Duration, OffsetDateTime};

use crate::accounts::{Account, MAX_EMAIL_LEN, find_by_email, normalize_email};
use crate::entity::{account, oauth_account};
use crate::error::{AuthError, ProviderError, is_unique_violation};
use crate::oauth::provider::{OAuthProfile, Provider, ProviderTokens};

const MAX_ATTEMPTS: usize = 3;
const MAX_USERNAME_CANDIDATES: usize = 1000;
const CANDIDATE_BATCH: usize = 100;
const EMAIL_BASE_LEN: usize = 20;
/// Leaves room for a numeric suffix inside the 50-character column.
const PROVIDER_BASE_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The provider identity was already linked to this account
    AlreadyLinked,
    /// A new link was added to an existing account
    Linked,
    /// The account already holds a different identity from this provider
    ProviderAlreadyOnAccount,
    /// A new account was created together with the link
    Created,
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub account: Account,
    pub outcome: LinkOutcome,
}

#[derive(Clone, Debug)]
pub struct AccountLinker {
    db: Arc<DatabaseConnection>,
}

impl AccountLinker {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[tracing::instrument(skip(self, profile, tokens), fields(subject = %profile.subject))]
    pub async fn resolve(
        &self,
        provider: Provider,
        profile: &OAuthProfile,
        tokens: &ProviderTokens,
    ) -> Result<Resolved, AuthError> {
        let len = normalize_email(&profile.email).chars().count();
        if len > MAX_EMAIL_LEN {
            tracing::warn!(%provider, len, "provider email does not fit an account");
            return Err(ProviderError::EmailTooLong {
                len,
                max: MAX_EMAIL_LEN,
            }
            .into());
        }

        retry_on_unique_violation(move |_| self.try_resolve(provider, profile, tokens)).await
    }

    async fn try_resolve(
        &self,
        provider: Provider,
        profile: &OAuthProfile,
        tokens: &ProviderTokens,
    ) -> Result<Resolved, AuthError> {
        match self.lookup(provider, profile, tokens).await? {
            Some(resolved) => Ok(resolved),
            None => self.create(provider, profile, tokens).await,
        }
    }

    /// Resolve against existing rows only; `None` means a new account is needed.
    async fn lookup(
        &self,
        provider: Provider,
        profile: &OAuthProfile,
        tokens: &ProviderTokens,
    ) -> Result<Option<Resolved>, AuthError> {
        let db = self.db.as_ref();
        let now = OffsetDateTime::now_utc();
        let existing_link = find_link(db, provider, &profile.subject).await?;

        if let Some(account) = find_by_email(db, &profile.email).await? {
            let outcome = match existing_link {
                Some(link) if link.account_id != account.id => {
                    tracing::warn!(
                        account_id = %account.id,
                        linked_account_id = %link.account_id,
                        "provider identity belongs to another account"
                    );
                    return Err(AuthError::OAuthAccountConflict);
                }
                Some(link) => {
                    refresh_link(db, link, tokens, now).await?;
                    LinkOutcome::AlreadyLinked
                }
                None if account_has_provider(db, &account.id, provider).await? => {
                    LinkOutcome::ProviderAlreadyOnAccount
                }
                None => {
                    new_link(&account.id, provider, profile, tokens, now)
                        .insert(db)
                        .await?;
                    tracing::info!(account_id = %account.id, "linked provider to existing account");
                    LinkOutcome::Linked
                }
            };
            return Ok(Some(Resolved { account, outcome }));
        }

        let Some(link) = existing_link else {
            return Ok(None);
        };
        // Email changed on the provider side since the link was made.
        let account = account::Entity::find_by_id(link.account_id.clone())
            .one(db)
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        refresh_link(db, link, tokens, now).await?;
        Ok(Some(Resolved {
            account,
            outcome: LinkOutcome::AlreadyLinked,
        }))
    }

    /// Create an OAuth-only account and its link in one transaction.
    async fn create(
        &self,
        provider: Provider,
        profile: &OAuthProfile,
        tokens: &ProviderTokens,
    ) -> Result<Resolved, AuthError> {
        let now = OffsetDateTime::now_utc();
        let username = resolve_username(self.db.as_ref(), &username_base(profile)).await?;
        let txn = self.db.begin().await?;
        let account = account::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            username: Set(username),
            email: Set(normalize_email(&profile.email)),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;
        new_link(&account.id, provider, profile, tokens, now)
            .insert(&txn)
            .await?;
        txn.commit().await?;

        tracing::info!(account_id = %account.id, username = %account.username, "created account from oauth profile");
        Ok(Resolved {
            account,
            outcome: LinkOutcome::Created,
        })
    }
}

/// Run `attempt` until it stops failing on a unique key. A violation means
/// another request created the same rows first; the next attempt sees them.
/// Gives up with `OAuthAccountConflict` after [`MAX_ATTEMPTS`].
async fn retry_on_unique_violation<T, F, Fut>(mut attempt: F) -> Result<T, AuthError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, AuthError>>,
{
    let mut n = 1;
    loop {
        match attempt(n).await {
            Err(AuthError::Database(e)) if is_unique_violation(&e) => {
                if n >= MAX_ATTEMPTS {
                    tracing::warn!(attempt = n, "giving up on contended oauth identity");
                    return Err(AuthError::OAuthAccountConflict);
                }
                tracing::info!(attempt = n, "concurrent account creation, re-resolving");
                n += 1;
            }
            other => return other,
        }
    }
}

async fn find_link<C: ConnectionTrait>(
    db: &C,
    provider: Provider,
    subject: &str,
) -> Result<Option<oauth_account::Model>, sea_orm::DbErr> {
    oauth_account::Entity::find()
        .filter(oauth_account::Column::Provider.eq(provider.as_str()))
        .filter(oauth_account::Column::ProviderUserId.eq(subject))
        .one(db)
        .await
}

async fn account_has_provider<C: ConnectionTrait>(
    db: &C,
    account_id: &str,
    provider: Provider,
) -> Result<bool, sea_orm::DbErr> {
    Ok(oauth_account::Entity::find()
        .filter(oauth_account::Column::AccountId.eq(account_id))
        .filter(oauth_account::Column::Provider.eq(provider.as_str()))
        .one(db)
        .await?
        .is_some())
}

fn new_link(
    account_id: &str,
    provider: Provider,
    profile: &OAuthProfile,
    tokens: &ProviderTokens,
    now: OffsetDateTime,
) -> oauth_account::ActiveModel {
    oauth_account::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        account_id: Set(account_id.to_string()),
        provider: Set(provider.as_str().to_string()),
        provider_user_id: Set(profile.subject.clone()),
        provider_email: Set(Some(normalize_email(&profile.email))),
        provider_username: Set(profile.username.clone()),
        avatar_url: Set(profile.avatar_url.clone()),
        access_token: Set(Some(tokens.access_token.clone())),
        refresh_token: Set(tokens.refresh_token.clone()),
        token_expires_at: Set(Some(now + Duration::seconds(tokens.expires_in))),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

/// Only tokens (and their expiry) change on a repeat login.
async fn refresh_link<C: ConnectionTrait>(
    db: &C,
    link: oauth_account::Model,
    tokens: &ProviderTokens,
    now: OffsetDateTime,
) -> Result<(), sea_orm::DbErr> {
    let mut active: oauth_account::ActiveModel = link.into();
    active.access_token = Set(Some(tokens.access_token.clone()));
    if tokens.refresh_token.is_some() {
        active.refresh_token = Set(tokens.refresh_token.clone());
    }
    active.token_expires_at = Set(Some(now + Duration::seconds(tokens.expires_in)));
    active.updated_at = Set(now);
    active.update(db).await?;
    Ok(())
}

/// Seed for a new account's username: the provider handle when there is
/// one, else the email local-part reduced to ASCII alphanumerics.
pub fn username_base(profile: &OAuthProfile) -> String {
    let handle = profile.username.as_deref().map(str::trim).unwrap_or_default();
    if !handle.is_empty() {
        return handle.chars().take(PROVIDER_BASE_LEN).collect();
    }
    let local = profile.email.split('@').next().unwrap_or_default();
    let base: String = local
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(EMAIL_BASE_LEN)
        .collect();
    if base.is_empty() { "user".to_string() } else { base }
}

/// First free name among `base`, `base1`, `base2`, ... `base999`, then
/// `user<unix-seconds>`. Candidates are checked in batches and only the
/// username column is read.
pub async fn resolve_username<C: ConnectionTrait>(db: &C, base: &str) -> Result<String, AuthError> {
    let candidates: Vec<String> = std::iter::once(base.to_string())
        .chain((1..MAX_USERNAME_CANDIDATES).map(|n| format!("{base}{n}")))
        .collect();

    for batch in candidates.chunks(CANDIDATE_BATCH) {
        let taken: HashSet<String> = account::Entity::find()
            .select_only()
            .column(account::Column::Username)
            .filter(account::Column::Username.is_in(batch.iter().cloned()))
            .into_tuple::<String>()
            .all(db)
            .await?
            .into_iter()
            .collect();
        if let Some(free) = batch.iter().find(|c| !taken.contains(*c)) {
            return Ok(free.clone());
        }
    }

    let fallback = format!("user{}", OffsetDateTime::now_utc().unix_timestamp());
    let fallback_taken = account::Entity::find()
        .filter(account::Column::Username.eq(fallback.as_str()))
        .one(db)
        .await?
        .is_some();
    if fallback_taken {
        return Err(AuthError::UsernameGenerationExhausted(base.to_string()));
    }
    tracing::warn!(base, username = %fallback, "username candidates exhausted, using timestamp name");
    Ok(fallback)
}
