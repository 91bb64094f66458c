use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Where the browser front-end lives; OAuth callbacks redirect here on success.
    pub frontend_url: String,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SessionConfig {
    /// Lifetime of a session in seconds.
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: i64,
    /// Mark session and CSRF cookies `Secure` (enable behind HTTPS).
    #[serde(default)]
    pub cookie_secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
            cookie_secure: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct OAuthConfig {
    /// How long an issued OAuth state stays valid, in seconds.
    #[serde(default = "default_state_ttl")]
    pub state_ttl_secs: i64,
    /// Upper bound for every outbound call to a provider.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    /// Path appended to `frontend_url` after a successful OAuth login.
    #[serde(default = "default_success_redirect")]
    pub success_redirect: String,
    #[serde(default)]
    pub google: Option<ProviderConfig>,
    #[serde(default)]
    pub github: Option<ProviderConfig>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_ttl_secs: default_state_ttl(),
            http_timeout_secs: default_http_timeout(),
            success_redirect: default_success_redirect(),
            google: None,
            github: None,
        }
    }
}

/// Credentials and endpoints for a single OAuth provider.
///
/// The endpoint fields are optional overrides; when absent the adapter uses
/// the provider's public endpoints.
#[derive(Clone, Debug, Deserialize)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub userinfo_url: Option<String>,
    #[serde(default)]
    pub emails_url: Option<String>,
}

impl ProviderConfig {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "oauth.{name}.client_id must not be empty"
            )));
        }
        if self.client_secret.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "oauth.{name}.client_secret must not be empty"
            )));
        }
        if self.redirect_url.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "oauth.{name}.redirect_url must not be empty"
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CleanupConfig {
    /// Interval between sweeps of expired sessions and OAuth states.
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
        }
    }
}

/// Per-address cap on account registrations.
#[derive(Clone, Debug, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_register_max")]
    pub register_max: u32,
    #[serde(default = "default_register_window")]
    pub register_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            register_max: default_register_max(),
            register_window_secs: default_register_window(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_session_ttl() -> i64 {
    24 * 60 * 60
}

fn default_state_ttl() -> i64 {
    5 * 60
}

fn default_http_timeout() -> u64 {
    10
}

fn default_success_redirect() -> String {
    "/user/feed".to_string()
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_register_max() -> u32 {
    5
}

fn default_register_window() -> u64 {
    60
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "database_url must not be empty".into(),
            ));
        }
        if self.session.ttl_secs <= 0 {
            return Err(ConfigError::Validation(
                "session.ttl_secs must be > 0".into(),
            ));
        }
        if self.oauth.state_ttl_secs <= 0 {
            return Err(ConfigError::Validation(
                "oauth.state_ttl_secs must be > 0".into(),
            ));
        }
        if self.oauth.http_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "oauth.http_timeout_secs must be > 0".into(),
            ));
        }
        if self.cleanup.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "cleanup.interval_secs must be > 0".into(),
            ));
        }
        if self.rate_limit.register_max == 0 || self.rate_limit.register_window_secs == 0 {
            return Err(ConfigError::Validation(
                "rate_limit.register_max and rate_limit.register_window_secs must be > 0".into(),
            ));
        }
        if let Some(google) = &self.oauth.google {
            google.validate("google")?;
        }
        if let Some(github) = &self.oauth.github {
            github.validate("github")?;
        }
        Ok(())
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// A `.env` file is read first when present. Any environment variable matching
/// a key path separated by double underscores (e.g. `OAUTH__GOOGLE__CLIENT_ID`)
/// overrides the file value, so provider secrets never need to live in the file.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};

    dotenvy::dotenv().ok();

    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

/// Convenience helper for binaries wanting panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}
