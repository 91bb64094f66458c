//! GitHub OAuth2 adapter.
//!
//! `/user` omits the email when the user keeps it private; the adapter then
//! asks `/user/emails` and takes the primary entry, else the first one.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::oauth::provider::{
    OAuthProfile, OAuthProvider, Provider, ProviderTokens, TokenResponse, endpoint, send_json,
};

const AUTH_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_URL: &str = "https://api.github.com/user";
const EMAILS_URL: &str = "https://api.github.com/user/emails";

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: Option<i64>,
    login: Option<String>,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    #[serde(default)]
    primary: bool,
}

pub struct GitHubProvider {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl GitHubProvider {
    pub fn new(config: ProviderConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    async fn primary_email(&self, access_token: &str) -> Result<String, ProviderError> {
        let request = self
            .http
            .get(endpoint(self.config.emails_url.as_deref(), EMAILS_URL)?)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        let emails: Vec<GitHubEmail> = send_json(request, "github emails endpoint").await?;
        select_email(emails).ok_or(ProviderError::NoEmail)
    }
}

fn select_email(emails: Vec<GitHubEmail>) -> Option<String> {
    let mut emails: Vec<GitHubEmail> = emails
        .into_iter()
        .filter(|e| !e.email.is_empty())
        .collect();
    match emails.iter().position(|e| e.primary) {
        Some(idx) => Some(emails.swap_remove(idx).email),
        None => emails.into_iter().next().map(|e| e.email),
    }
}

#[async_trait]
impl OAuthProvider for GitHubProvider {
    fn provider(&self) -> Provider {
        Provider::GitHub
    }

    fn authorize_url(&self, state: &str) -> Result<String, ProviderError> {
        let mut url = endpoint(self.config.auth_url.as_deref(), AUTH_URL)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_url)
            .append_pair("scope", "user:email")
            .append_pair("state", state);
        Ok(url.into())
    }

    #[tracing::instrument(skip_all, fields(provider = "github"))]
    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, ProviderError> {
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_url.as_str()),
        ];
        // Without an explicit Accept GitHub answers form-encoded.
        let request = self
            .http
            .post(endpoint(self.config.token_url.as_deref(), TOKEN_URL)?)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form);
        let response: TokenResponse = send_json(request, "github token endpoint").await?;
        response.into_tokens()
    }

    #[tracing::instrument(skip_all, fields(provider = "github"))]
    async fn fetch_profile(&self, access_token: &str) -> Result<OAuthProfile, ProviderError> {
        let request = self
            .http
            .get(endpoint(self.config.userinfo_url.as_deref(), USER_URL)?)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        let user: GitHubUser = send_json(request, "github user endpoint").await?;

        let subject = user.id.ok_or(ProviderError::NoSubject)?.to_string();
        let email = match user.email.filter(|e| !e.is_empty()) {
            Some(email) => email,
            None => self.primary_email(access_token).await?,
        };

        Ok(OAuthProfile {
            subject,
            email,
            display_name: user.name.filter(|n| !n.is_empty()),
            username: user.login.filter(|l| !l.is_empty()),
            avatar_url: user.avatar_url.filter(|a| !a.is_empty()),
        })
    }
}
