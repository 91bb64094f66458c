//! Google OAuth2 adapter.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::oauth::provider::{
    OAuthProfile, OAuthProvider, Provider, ProviderTokens, TokenResponse, endpoint, send_json,
};

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

#[derive(Debug, Deserialize)]
struct GoogleUser {
    id: Option<String>,
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

pub struct GoogleProvider {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(config: ProviderConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn authorize_url(&self, state: &str) -> Result<String, ProviderError> {
        let mut url = endpoint(self.config.auth_url.as_deref(), AUTH_URL)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", "email profile")
            .append_pair("state", state)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        Ok(url.into())
    }

    #[tracing::instrument(skip_all, fields(provider = "google"))]
    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, ProviderError> {
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.config.redirect_url.as_str()),
        ];
        let request = self
            .http
            .post(endpoint(self.config.token_url.as_deref(), TOKEN_URL)?)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form);
        let response: TokenResponse = send_json(request, "google token endpoint").await?;
        response.into_tokens()
    }

    #[tracing::instrument(skip_all, fields(provider = "google"))]
    async fn fetch_profile(&self, access_token: &str) -> Result<OAuthProfile, ProviderError> {
        let request = self
            .http
            .get(endpoint(self.config.userinfo_url.as_deref(), USERINFO_URL)?)
            .bearer_auth(access_token);
        let user: GoogleUser = send_json(request, "google userinfo endpoint").await?;

        let subject = user
            .id
            .filter(|id| !id.is_empty())
            .ok_or(ProviderError::NoSubject)?;
        let email = user
            .email
            .filter(|e| !e.is_empty())
            .ok_or(ProviderError::NoEmail)?;

        Ok(OAuthProfile {
            subject,
            email,
            display_name: user.name.filter(|n| !n.is_empty()),
            username: None,
            avatar_url: user.picture.filter(|p| !p.is_empty()),
        })
    }
}
