//! HTTP tests for password login, registration, sessions and CSRF.

mod common;

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum_test::TestServer;
use common::{
    cookie_header, create_test_config, create_test_db, create_test_server, create_test_state,
    set_cookie, set_cookie_header,
};
use forum_auth::AuthState;
use forum_auth::api::session::{ProfileResponse, SessionResponse};
use forum_auth::config::OAuthConfig;
use forum_auth::entity::{account, credential, session};
use forum_auth::error::ErrorBody;
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::json;

const CSRF: HeaderName = HeaderName::from_static("x-csrf-token");

async fn setup() -> (AuthState, TestServer) {
    let state = create_test_state(OAuthConfig::default()).await;
    let server = create_test_server(state.clone());
    (state, server)
}

async fn register(server: &TestServer, username: &str, email: &str, password: &str) -> SessionResponse {
    let response = server
        .post("/session/register")
        .json(&json!({"username": username, "email": email, "password": password}))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json()
}

fn session_cookie(token: &str) -> HeaderValue {
    cookie_header(&[("session_id", token)])
}

// =============================================================================
// Registration
// =============================================================================

#[tokio::test]
async fn test_register_creates_account_and_session() {
    let (state, server) = setup().await;

    let response = server
        .post("/session/register")
        .json(&json!({"username": "jane_doe", "email": "Jane@Example.com", "password": "hunter2hunter"}))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: SessionResponse = response.json();
    assert_eq!(body.user.username, "jane_doe");
    assert_eq!(body.user.email, "jane@example.com");
    assert!(!body.session_id.is_empty());
    assert!(!body.csrf_token.is_empty());
    assert_eq!(set_cookie(&response, "session_id").as_deref(), Some(body.session_id.as_str()));
    assert_eq!(set_cookie(&response, "csrf_token").as_deref(), Some(body.csrf_token.as_str()));

    let db = state.db.as_ref();
    assert_eq!(account::Entity::find().count(db).await.unwrap(), 1);
    assert_eq!(credential::Entity::find().count(db).await.unwrap(), 1);
    assert_eq!(session::Entity::find().count(db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_register_rejects_duplicates() {
    let (_, server) = setup().await;
    register(&server, "jane_doe", "jane@example.com", "hunter2hunter").await;

    let same_email = server
        .post("/session/register")
        .json(&json!({"username": "other", "email": "JANE@example.com", "password": "hunter2hunter"}))
        .await;
    same_email.assert_status(StatusCode::CONFLICT);
    let body: ErrorBody = same_email.json();
    assert_eq!(body.code, 409);
    assert_eq!(body.error, "Conflict");
    assert_eq!(body.message, "Email is already taken");

    let same_username = server
        .post("/session/register")
        .json(&json!({"username": "jane_doe", "email": "other@example.com", "password": "hunter2hunter"}))
        .await;
    same_username.assert_status(StatusCode::CONFLICT);
    let body: ErrorBody = same_username.json();
    assert_eq!(body.message, "Username is already taken");
}

#[tokio::test]
async fn test_register_validates_input() {
    let (state, server) = setup().await;

    for payload in [
        json!({"username": "ab", "email": "a@example.com", "password": "hunter2hunter"}),
        json!({"username": "bad name", "email": "a@example.com", "password": "hunter2hunter"}),
        json!({"username": "valid", "email": "not-an-email", "password": "hunter2hunter"}),
        json!({"username": "valid", "email": "a@example.com", "password": "short1"}),
        json!({"username": "valid", "email": "a@example.com", "password": "onlyletters"}),
    ] {
        let response = server.post("/session/register").json(&payload).await;
        response.assert_status_bad_request();
    }
    assert_eq!(
        account::Entity::find().count(state.db.as_ref()).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_register_is_rate_limited_per_address() {
    let mut config = create_test_config(OAuthConfig::default());
    config.rate_limit.register_max = 2;
    let state = AuthState::new(create_test_db().await, Arc::new(config)).expect("build state");
    let server = create_test_server(state.clone());

    for (username, email) in [("jane_doe", "jane@example.com"), ("john_doe", "john@example.com")] {
        server
            .post("/session/register")
            .add_header("x-forwarded-for", "203.0.113.9")
            .json(&json!({"username": username, "email": email, "password": "hunter2hunter"}))
            .await
            .assert_status(StatusCode::CREATED);
    }

    let limited = server
        .post("/session/register")
        .add_header("x-forwarded-for", "203.0.113.9")
        .json(&json!({"username": "jim_doe", "email": "jim@example.com", "password": "hunter2hunter"}))
        .await;
    limited.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.maybe_header(header::RETRY_AFTER).is_some());
    let body: ErrorBody = limited.json();
    assert_eq!(body.message, "Too many requests. Please try again later.");

    // Another address still has its full allowance.
    server
        .post("/session/register")
        .add_header("x-forwarded-for", "198.51.100.4")
        .json(&json!({"username": "jim_doe", "email": "jim@example.com", "password": "hunter2hunter"}))
        .await
        .assert_status(StatusCode::CREATED);

    // Login is not counted against the registration allowance.
    server
        .post("/session/login")
        .add_header("x-forwarded-for", "203.0.113.9")
        .json(&json!({"email": "jane@example.com", "password": "hunter2hunter"}))
        .await
        .assert_status_ok();

    assert_eq!(
        account::Entity::find().count(state.db.as_ref()).await.unwrap(),
        3
    );
}

#[tokio::test]
async fn test_logged_in_user_is_redirected_from_login_and_register() {
    let (state, server) = setup().await;
    let created = register(&server, "jane_doe", "jane@example.com", "hunter2hunter").await;

    let login = server
        .post("/session/login")
        .add_header(header::COOKIE, session_cookie(&created.session_id))
        .json(&json!({"email": "jane@example.com", "password": "hunter2hunter"}))
        .await;
    login.assert_status(StatusCode::SEE_OTHER);
    assert_eq!(login.header(header::LOCATION), "/");
    assert!(set_cookie(&login, "session_id").is_none());

    let again = server
        .post("/session/register")
        .add_header(header::COOKIE, session_cookie(&created.session_id))
        .json(&json!({"username": "john_doe", "email": "john@example.com", "password": "hunter2hunter"}))
        .await;
    again.assert_status(StatusCode::SEE_OTHER);
    assert_eq!(again.header(header::LOCATION), "/");

    assert_eq!(
        account::Entity::find().count(state.db.as_ref()).await.unwrap(),
        1
    );
    // The existing session survives the refused login.
    server
        .get("/session/verify")
        .add_header(header::COOKIE, session_cookie(&created.session_id))
        .await
        .assert_status_ok();
}

// =============================================================================
// Login
// =============================================================================

#[tokio::test]
async fn test_login_returns_session_with_configured_ttl() {
    let (state, server) = setup().await;
    register(&server, "jane_doe", "jane@example.com", "hunter2hunter").await;

    let response = server
        .post("/session/login")
        .json(&json!({"email": "jane@example.com", "password": "hunter2hunter"}))
        .await;
    response.assert_status_ok();
    let body: SessionResponse = response.json();
    assert_eq!(body.user.username, "jane_doe");

    let stored = session::Entity::find()
        .one(state.db.as_ref())
        .await
        .unwrap()
        .expect("session row");
    assert_eq!(stored.session_token, body.session_id);
    assert_eq!(stored.csrf_token, body.csrf_token);
    assert_eq!(
        stored.expires_at - stored.created_at,
        time::Duration::seconds(state.config.session.ttl_secs)
    );

    let cookie = set_cookie_header(&response, "session_id").expect("session cookie");
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("Expires="));
    let csrf_cookie = set_cookie_header(&response, "csrf_token").expect("csrf cookie");
    assert!(!csrf_cookie.contains("HttpOnly"));
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let (_, server) = setup().await;
    register(&server, "jane_doe", "jane@example.com", "hunter2hunter").await;

    let wrong_password = server
        .post("/session/login")
        .json(&json!({"email": "jane@example.com", "password": "wrong-pass-1"}))
        .await;
    let unknown_email = server
        .post("/session/login")
        .json(&json!({"email": "nobody@example.com", "password": "hunter2hunter"}))
        .await;

    wrong_password.assert_status_unauthorized();
    unknown_email.assert_status_unauthorized();
    let a: ErrorBody = wrong_password.json();
    let b: ErrorBody = unknown_email.json();
    assert_eq!(a.message, b.message);
    assert_eq!(a.message, "Invalid email or password");
    assert!(set_cookie(&wrong_password, "session_id").is_none());
}

#[tokio::test]
async fn test_login_requires_both_fields() {
    let (_, server) = setup().await;
    let response = server
        .post("/session/login")
        .json(&json!({"email": "", "password": ""}))
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_second_login_invalidates_first_session() {
    let (state, server) = setup().await;
    let first = register(&server, "jane_doe", "jane@example.com", "hunter2hunter").await;

    let second: SessionResponse = server
        .post("/session/login")
        .json(&json!({"email": "jane@example.com", "password": "hunter2hunter"}))
        .await
        .json();
    assert_ne!(first.session_id, second.session_id);

    let stale = server
        .get("/session/verify")
        .add_header(header::COOKIE, session_cookie(&first.session_id))
        .await;
    stale.assert_status_unauthorized();
    // Middleware clears a cookie that no longer resolves.
    assert_eq!(set_cookie(&stale, "session_id").as_deref(), Some(""));

    let live = server
        .get("/session/verify")
        .add_header(header::COOKIE, session_cookie(&second.session_id))
        .await;
    live.assert_status_ok();
    let body: SessionResponse = live.json();
    assert_eq!(body.csrf_token, second.csrf_token);
    assert_eq!(
        session::Entity::find().count(state.db.as_ref()).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_login_over_stale_cookie_keeps_new_session() {
    let (_, server) = setup().await;
    register(&server, "jane_doe", "jane@example.com", "hunter2hunter").await;

    let response = server
        .post("/session/login")
        .add_header(header::COOKIE, session_cookie("stale-token"))
        .json(&json!({"email": "jane@example.com", "password": "hunter2hunter"}))
        .await;
    response.assert_status_ok();
    let body: SessionResponse = response.json();
    assert_eq!(set_cookie(&response, "session_id").as_deref(), Some(body.session_id.as_str()));
}

// =============================================================================
// Verify / logout
// =============================================================================

#[tokio::test]
async fn test_verify_without_cookie_is_unauthorized() {
    let (_, server) = setup().await;
    let response = server.get("/session/verify").await;
    response.assert_status_unauthorized();
    assert!(set_cookie(&response, "session_id").is_none());
}

#[tokio::test]
async fn test_logout_deletes_session_and_clears_cookies() {
    let (state, server) = setup().await;
    let created = register(&server, "jane_doe", "jane@example.com", "hunter2hunter").await;

    let response = server
        .post("/session/logout")
        .add_header(
            header::COOKIE,
            cookie_header(&[
                ("session_id", created.session_id.as_str()),
                ("csrf_token", created.csrf_token.as_str()),
            ]),
        )
        .await;
    response.assert_status_ok();
    assert_eq!(set_cookie(&response, "session_id").as_deref(), Some(""));
    assert_eq!(set_cookie(&response, "csrf_token").as_deref(), Some(""));
    assert_eq!(
        session::Entity::find().count(state.db.as_ref()).await.unwrap(),
        0
    );

    server
        .get("/session/verify")
        .add_header(header::COOKIE, session_cookie(&created.session_id))
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_logout_without_session_succeeds() {
    let (_, server) = setup().await;
    server.post("/session/logout").await.assert_status_ok();
}

// =============================================================================
// Protected routes and CSRF
// =============================================================================

#[tokio::test]
async fn test_protected_route_gate() {
    let (_, server) = setup().await;

    let api = server
        .get("/session/profile")
        .add_header(header::ACCEPT, HeaderValue::from_static("application/json"))
        .await;
    api.assert_status_unauthorized();

    let browser = server
        .get("/session/profile")
        .add_header(header::ACCEPT, HeaderValue::from_static("text/html"))
        .await;
    browser.assert_status(StatusCode::SEE_OTHER);
    assert_eq!(browser.header(header::LOCATION), "/login");
}

#[tokio::test]
async fn test_profile_lists_password_and_providers() {
    let (_, server) = setup().await;
    let created = register(&server, "jane_doe", "jane@example.com", "hunter2hunter").await;

    let response = server
        .get("/session/profile")
        .add_header(header::COOKIE, session_cookie(&created.session_id))
        .await;
    response.assert_status_ok();
    let body: ProfileResponse = response.json();
    assert_eq!(body.user.username, "jane_doe");
    assert!(body.has_password);
    assert!(body.providers.is_empty());
}

#[tokio::test]
async fn test_csrf_missing_token_is_rejected() {
    let (_, server) = setup().await;
    let created = register(&server, "jane_doe", "jane@example.com", "hunter2hunter").await;

    let response = server
        .post("/session/logout-all")
        .add_header(header::COOKIE, session_cookie(&created.session_id))
        .await;
    response.assert_status_forbidden();
    let body: ErrorBody = response.json();
    assert_eq!(body.code, 403);
    assert_eq!(body.error, "Forbidden");
}

#[tokio::test]
async fn test_csrf_wrong_token_is_rejected() {
    let (state, server) = setup().await;
    let created = register(&server, "jane_doe", "jane@example.com", "hunter2hunter").await;

    let response = server
        .post("/session/logout-all")
        .add_header(header::COOKIE, session_cookie(&created.session_id))
        .add_header(CSRF, HeaderValue::from_static("not-the-token"))
        .await;
    response.assert_status_forbidden();
    assert_eq!(
        session::Entity::find().count(state.db.as_ref()).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_csrf_matching_header_is_accepted() {
    let (state, server) = setup().await;
    let created = register(&server, "jane_doe", "jane@example.com", "hunter2hunter").await;

    let response = server
        .post("/session/logout-all")
        .add_header(header::COOKIE, session_cookie(&created.session_id))
        .add_header(CSRF, HeaderValue::from_str(&created.csrf_token).unwrap())
        .await;
    response.assert_status_ok();
    assert_eq!(
        session::Entity::find().count(state.db.as_ref()).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_csrf_matching_form_field_is_accepted() {
    let (state, server) = setup().await;
    let created = register(&server, "jane_doe", "jane@example.com", "hunter2hunter").await;

    let response = server
        .post("/session/logout-all")
        .add_header(header::COOKIE, session_cookie(&created.session_id))
        .form(&[("csrf_token", created.csrf_token.as_str())])
        .await;
    response.assert_status_ok();
    assert_eq!(
        session::Entity::find().count(state.db.as_ref()).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_csrf_without_session_is_rejected() {
    let (_, server) = setup().await;
    let response = server
        .post("/session/logout-all")
        .add_header(header::ACCEPT, HeaderValue::from_static("application/json"))
        .add_header(CSRF, HeaderValue::from_static("anything"))
        .await;
    // The session gate answers before the CSRF guard.
    response.assert_status_unauthorized();
}

// =============================================================================
// Misc
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let (_, server) = setup().await;
    let response = server.get("/healthz").await;
    response.assert_status_ok();
    response.assert_text("ok");
}
