//! Provider-agnostic OAuth2 surface.
//!
//! Each supported provider implements [`OAuthProvider`]; handlers only ever
//! see the trait object held by [`ProviderRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::OAuthConfig;
use crate::error::{AuthError, ProviderError};
use crate::oauth::github::GitHubProvider;
use crate::oauth::google::GoogleProvider;

/// Token lifetime assumed when a provider omits `expires_in`.
pub const DEFAULT_EXPIRES_IN: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    GitHub,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::GitHub => "github",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Provider::Google),
            "github" => Ok(Provider::GitHub),
            other => Err(AuthError::UnknownProvider(other.to_string())),
        }
    }
}

/// Result of exchanging an authorization code.
#[derive(Debug, Clone)]
pub struct ProviderTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Seconds until `access_token` expires
    pub expires_in: i64,
}

/// Provider profile normalized to the fields account linking needs.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthProfile {
    pub subject: String,
    pub email: String,
    pub display_name: Option<String>,
    /// Handle chosen on the provider side, used as the username seed
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Authorization endpoint URL carrying `state`.
    fn authorize_url(&self, state: &str) -> Result<String, ProviderError>;

    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, ProviderError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<OAuthProfile, ProviderError>;
}

/// Shape shared by the Google and GitHub token endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub error: Option<String>,
}

impl TokenResponse {
    pub(crate) fn into_tokens(self) -> Result<ProviderTokens, ProviderError> {
        match self.access_token.filter(|t| !t.is_empty()) {
            Some(access_token) => Ok(ProviderTokens {
                access_token,
                refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
                expires_in: self
                    .expires_in
                    .filter(|e| *e > 0)
                    .unwrap_or(DEFAULT_EXPIRES_IN),
            }),
            None => Err(ProviderError::MissingAccessToken(self.error)),
        }
    }
}

/// HTTP client shared by all adapters. The timeout bounds every provider call.
pub fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client, AuthError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("forum-auth/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| AuthError::Internal(format!("failed to build HTTP client: {e}")))
}

/// Send `request`, require a 2xx status and decode the JSON body.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    endpoint: &'static str,
) -> Result<T, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|source| ProviderError::Transport { endpoint, source })?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::Status { endpoint, status });
    }
    response
        .json::<T>()
        .await
        .map_err(|source| ProviderError::Decode { endpoint, source })
}

/// The configured override for an endpoint, else the provider's public URL.
pub(crate) fn endpoint(
    configured: Option<&str>,
    default: &'static str,
) -> Result<reqwest::Url, ProviderError> {
    let url = configured.unwrap_or(default);
    reqwest::Url::parse(url).map_err(|e| ProviderError::InvalidEndpoint {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// The set of providers enabled by configuration.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Provider, Arc<dyn OAuthProvider>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn from_config(config: &OAuthConfig) -> Result<Self, AuthError> {
        let http = build_http_client(config.http_timeout_secs)?;
        let mut registry = Self::default();
        if let Some(google) = &config.google {
            registry.register(Arc::new(GoogleProvider::new(google.clone(), http.clone())));
        }
        if let Some(github) = &config.github {
            registry.register(Arc::new(GitHubProvider::new(github.clone(), http)));
        }
        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn OAuthProvider>) {
        self.providers.insert(provider.provider(), provider);
    }

    /// Look up an enabled provider by its path segment.
    pub fn resolve(&self, name: &str) -> Result<(Provider, Arc<dyn OAuthProvider>), AuthError> {
        let provider = Provider::from_str(name)?;
        self.providers
            .get(&provider)
            .cloned()
            .map(|p| (provider, p))
            .ok_or_else(|| AuthError::UnknownProvider(name.to_string()))
    }

    pub fn enabled(&self) -> Vec<Provider> {
        let mut out: Vec<Provider> = self.providers.keys().copied().collect();
        out.sort_by_key(|p| p.as_str());
        out
    }
}
