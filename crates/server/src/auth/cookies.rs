//! Cookie builders for the session, CSRF and OAuth state cookies.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::{Duration, OffsetDateTime};

use crate::auth::Session;

pub const SESSION_COOKIE: &str = "session_id";
pub const CSRF_COOKIE: &str = "csrf_token";
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";

/// `session_id`: HttpOnly, expires with the session.
pub fn session_cookie(token: &str, expires: OffsetDateTime, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .expires(expires)
        .build()
}

/// `csrf_token`: readable by front-end script, which echoes it back in the
/// `X-CSRF-Token` header.
pub fn csrf_cookie(token: &str, expires: OffsetDateTime, secure: bool) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE, token.to_string()))
        .http_only(false)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .expires(expires)
        .build()
}

pub fn oauth_state_cookie(state: &str, max_age: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((OAUTH_STATE_COOKIE, state.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(max_age)
        .build()
}

fn removal(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, "")).path("/").build()
}

/// Add the cookies that carry a freshly created session.
pub fn with_session(jar: CookieJar, session: &Session, secure: bool) -> CookieJar {
    jar.add(session_cookie(
        &session.session_token,
        session.expires_at,
        secure,
    ))
    .add(csrf_cookie(&session.csrf_token, session.expires_at, secure))
}

/// Expire both session cookies.
pub fn without_session(jar: CookieJar) -> CookieJar {
    jar.remove(removal(SESSION_COOKIE))
        .remove(removal(CSRF_COOKIE))
}

pub fn without_oauth_state(jar: CookieJar) -> CookieJar {
    jar.remove(removal(OAUTH_STATE_COOKIE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_attributes() {
        let expires = OffsetDateTime::now_utc() + Duration::hours(1);
        let c = session_cookie("tok", expires, true);
        assert_eq!(c.name(), "session_id");
        assert_eq!(c.http_only(), Some(true));
        assert_eq!(c.secure(), Some(true));
        assert_eq!(c.same_site(), Some(SameSite::Lax));
        assert_eq!(c.path(), Some("/"));
    }

    #[test]
    fn csrf_cookie_is_script_readable() {
        let expires = OffsetDateTime::now_utc() + Duration::hours(1);
        let c = csrf_cookie("csrf", expires, false);
        assert_eq!(c.http_only(), Some(false));
    }

    #[test]
    fn oauth_state_cookie_is_short_lived() {
        let c = oauth_state_cookie("st", Duration::minutes(5), false);
        assert_eq!(c.max_age(), Some(Duration::minutes(5)));
        assert_eq!(c.http_only(), Some(true));
    }
}
