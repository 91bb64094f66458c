//! Migration creating the tables owned by the authentication core.
//!
//! Creates tables for:
//! - sessions: the single live session of each account (keyed by account id)
//! - oauth_states: single-use anti-forgery values for the OAuth redirect flow
//! - oauth_accounts: links between accounts and external provider identities

use sea_orm_migration::prelude::*;

use crate::m20250601_000001_create_accounts::Accounts;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 1. Sessions: primary key on account_id enforces one session per account
        manager
            .create_table(
                Table::create()
                    .table(Sessions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Sessions::AccountId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Sessions::SessionToken)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Sessions::CsrfToken).string().not_null())
                    .col(ColumnDef::new(Sessions::IpAddress).string().null())
                    .col(
                        ColumnDef::new(Sessions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Sessions::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sessions_account")
                            .from(Sessions::Table, Sessions::AccountId)
                            .to(Accounts::Table, Accounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // 2. OAuth states (short-lived, consumed on callback)
        manager
            .create_table(
                Table::create()
                    .table(OAuthStates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuthStates::State)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OAuthStates::Provider).string().not_null())
                    .col(ColumnDef::new(OAuthStates::IpAddress).string().null())
                    .col(
                        ColumnDef::new(OAuthStates::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuthStates::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 3. OAuth accounts
        manager
            .create_table(
                Table::create()
                    .table(OAuthAccounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuthAccounts::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OAuthAccounts::AccountId).string().not_null())
                    .col(ColumnDef::new(OAuthAccounts::Provider).string().not_null())
                    .col(
                        ColumnDef::new(OAuthAccounts::ProviderUserId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OAuthAccounts::ProviderEmail).string().null())
                    .col(
                        ColumnDef::new(OAuthAccounts::ProviderUsername)
                            .string()
                            .null(),
                    )
                    .col(ColumnDef::new(OAuthAccounts::AvatarUrl).string().null())
                    .col(ColumnDef::new(OAuthAccounts::AccessToken).text().null())
                    .col(ColumnDef::new(OAuthAccounts::RefreshToken).text().null())
                    .col(
                        ColumnDef::new(OAuthAccounts::TokenExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuthAccounts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuthAccounts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_oauth_accounts_account")
                            .from(OAuthAccounts::Table, OAuthAccounts::AccountId)
                            .to(Accounts::Table, Accounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Indexes
        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_accounts_provider_subject")
                    .table(OAuthAccounts::Table)
                    .col(OAuthAccounts::Provider)
                    .col(OAuthAccounts::ProviderUserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_accounts_account_id")
                    .table(OAuthAccounts::Table)
                    .col(OAuthAccounts::AccountId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sessions_expires_at")
                    .table(Sessions::Table)
                    .col(Sessions::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_states_expires_at")
                    .table(OAuthStates::Table)
                    .col(OAuthStates::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_oauth_states_expires_at")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(Index::drop().name("idx_sessions_expires_at").to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_oauth_accounts_account_id")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_oauth_accounts_provider_subject")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(OAuthAccounts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OAuthStates::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Sessions::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Sessions {
    Table,
    AccountId,
    SessionToken,
    CsrfToken,
    IpAddress,
    CreatedAt,
    ExpiresAt,
}

#[derive(DeriveIden)]
enum OAuthStates {
    #[sea_orm(iden = "oauth_states")]
    Table,
    State,
    Provider,
    IpAddress,
    CreatedAt,
    ExpiresAt,
}

#[derive(DeriveIden)]
enum OAuthAccounts {
    #[sea_orm(iden = "oauth_accounts")]
    Table,
    Id,
    AccountId,
    Provider,
    ProviderUserId,
    ProviderEmail,
    ProviderUsername,
    AvatarUrl,
    AccessToken,
    RefreshToken,
    TokenExpiresAt,
    CreatedAt,
    UpdatedAt,
}
