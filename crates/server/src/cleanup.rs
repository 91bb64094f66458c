//! Periodic sweep of expired sessions, OAuth states and rate windows.
//!
//! Expiry is already enforced at read time; this only bounds table growth.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::AuthState;

/// Run one sweep, logging what was removed.
pub async fn sweep_expired(state: &AuthState) {
    match state.sessions.delete_expired().await {
        Ok(0) => {}
        Ok(n) => tracing::info!(removed = n, "pruned expired sessions"),
        Err(e) => tracing::warn!(error = %e, "failed to prune expired sessions"),
    }
    match state.oauth_states.delete_expired().await {
        Ok(0) => {}
        Ok(n) => tracing::info!(removed = n, "pruned expired oauth states"),
        Err(e) => tracing::warn!(error = %e, "failed to prune expired oauth states"),
    }
    let windows = state.register_limiter.prune();
    if windows > 0 {
        tracing::debug!(removed = windows, "pruned registration rate windows");
    }
}

/// Spawn the sweeper on the current runtime.
pub fn spawn_cleanup_task(state: AuthState) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.cleanup.interval_secs);
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            sweep_expired(&state).await;
        }
    })
}
