//! OpenAPI/Utoipa configuration.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

use crate::api::{health::MISC_TAG, oauth::OAUTH_TAG, session::SESSION_TAG};

/// Documents the session cookie and CSRF header.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "SessionCookie",
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                "session_id",
                "Set by login, registration and OAuth callbacks.",
            ))),
        );
        components.add_security_scheme(
            "CsrfToken",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                "X-CSRF-Token",
                "Per-session token returned as `csrf_token`; required on state-changing requests.",
            ))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Forum Authentication API",
        version = "1.0.0",
        description = "Password and OAuth login, sessions and CSRF protection for the forum."
    ),
    tags(
        (name = SESSION_TAG, description = "Password login and session management"),
        (name = OAUTH_TAG, description = "Login through Google and GitHub"),
        (name = MISC_TAG, description = "Miscellaneous endpoints")
    )
)]
pub struct ApiDoc;
