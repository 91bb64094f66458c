//! HTTP surface of the authentication core.
//!
//! - `session` - password login, registration and session endpoints (/session/*)
//! - `oauth` - provider login redirect and callback (/auth/{provider}/*)
//! - `health` - health check endpoint (/healthz)
//! - `openapi` - OpenAPI/Utoipa configuration

pub mod health;
pub mod oauth;
pub mod openapi;
pub mod session;

pub use health::MISC_TAG;
pub use oauth::OAUTH_TAG;
pub use session::SESSION_TAG;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware::{from_fn, from_fn_with_state},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

use crate::AuthState;
use crate::auth::csrf::{CSRF_HEADER, csrf_guard};
use crate::auth::middleware::{authenticate, require_authenticated, require_guest};
use crate::auth::rate_limit::limit_registrations;
use crate::config::AppConfig;

/// Routes of the authentication core with identity resolution applied.
///
/// Layers run outermost first: `authenticate` on every route, then the
/// guest gate on password login, registration and the OAuth login, or the
/// session gate followed by the CSRF guard on protected routes. Registration
/// is rate limited per address inside the guest gate.
pub fn router(state: AuthState) -> OpenApiRouter {
    let protected = session::protected_router()
        .layer(from_fn(csrf_guard))
        .layer(from_fn(require_authenticated));
    let registration = session::register_router()
        .layer(from_fn_with_state(state.clone(), limit_registrations));
    let guest = oauth::login_router()
        .merge(session::login_router())
        .merge(registration)
        .layer(from_fn(require_guest));

    OpenApiRouter::new()
        .merge(session::public_router())
        .merge(oauth::callback_router())
        .merge(guest)
        .merge(protected)
        .layer(from_fn_with_state(state.clone(), authenticate))
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(CSRF_HEADER)])
        .allow_credentials(true);
    match HeaderValue::from_str(config.frontend_url.trim_end_matches('/')) {
        Ok(origin) => base.allow_origin(origin),
        Err(e) => {
            tracing::warn!(error = %e, "frontend_url is not a valid origin; CORS disabled");
            CorsLayer::new()
        }
    }
}

/// Full application: core routes, health check, API docs at `/api-docs`.
pub fn app(state: AuthState) -> Router {
    let cors = cors_layer(&state.config);
    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .merge(router(state))
        .routes(routes!(health::health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .split_for_parts();

    router.merge(Redoc::with_url("/api-docs", api))
}

/// Starts the web server with all configured routes.
#[tracing::instrument(skip(state))]
pub async fn start_webserver(state: AuthState) -> color_eyre::Result<()> {
    let addr = state.config.listen_addr.clone();
    let router = app(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "server running");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;
    Ok(())
}
