use std::sync::Arc;

use color_eyre::eyre::WrapErr;
use forum_auth::AuthState;
use forum_auth::api::start_webserver;
use forum_auth::cleanup::spawn_cleanup_task;
use forum_auth::config::load_config_or_panic;
use sea_orm::Database;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_tracing() {
    let default_directives = "forum_auth=info,sea_orm=info,tower_http=info";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    initialize_tracing();

    let config = Arc::new(load_config_or_panic());

    let db = Arc::new(
        Database::connect(&config.database_url)
            .await
            .wrap_err("Failed to connect to database")?,
    );

    let state = AuthState::new(db, config).wrap_err("Failed to build application state")?;
    tracing::info!(
        providers = ?state.providers.enabled(),
        session_ttl_secs = state.config.session.ttl_secs,
        cookie_secure = state.config.session.cookie_secure,
        "authentication configuration"
    );

    spawn_cleanup_task(state.clone());

    start_webserver(state).await
}
