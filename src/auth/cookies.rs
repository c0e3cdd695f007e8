use actix_web::HttpResponseBuilder;
use actix_web::cookie::{Cookie, SameSite, time::Duration};
use actix_web::http::header::HeaderMap;

use crate::config::Config;

pub const ACCESS_COOKIE: &str = "hr_access";
pub const REFRESH_COOKIE: &str = "hr_refresh";
/// Refresh cookie is only ever sent to the auth endpoints.
pub const REFRESH_COOKIE_PATH: &str = "/auth";

pub fn access_cookie(token: &str, config: &Config) -> Cookie<'static> {
    Cookie::build(ACCESS_COOKIE, token.to_string())
        .path("/")
        .http_only(true)
        .secure(config.cookie_secure)
        .same_site(SameSite::Lax)
        .max_age(Duration::seconds(config.access_token_ttl as i64))
        .finish()
}

/// With remember-me the cookie outlives the browser session, otherwise it is
/// a session cookie that the browser drops on close.
pub fn refresh_cookie(token: &str, remember_me: bool, config: &Config) -> Cookie<'static> {
    let mut cookie = Cookie::build(REFRESH_COOKIE, token.to_string())
        .path(REFRESH_COOKIE_PATH)
        .http_only(true)
        .secure(config.cookie_secure)
        .same_site(SameSite::Strict)
        .finish();

    if remember_me {
        cookie.set_max_age(Duration::seconds(config.remember_me_ttl as i64));
    }
    cookie
}

fn expired(name: &'static str, path: &'static str, config: &Config) -> Cookie<'static> {
    Cookie::build(name, "")
        .path(path)
        .http_only(true)
        .secure(config.cookie_secure)
        .max_age(Duration::ZERO)
        .finish()
}

/// Adds both auth cookies to `builder`.
pub fn set_auth_cookies(
    builder: &mut HttpResponseBuilder,
    access_token: &str,
    refresh_token: &str,
    remember_me: bool,
    config: &Config,
) {
    builder
        .cookie(access_cookie(access_token, config))
        .cookie(refresh_cookie(refresh_token, remember_me, config));
}

/// Expires both auth cookies on the client.
pub fn clear_auth_cookies(builder: &mut HttpResponseBuilder, config: &Config) {
    builder
        .cookie(expired(ACCESS_COOKIE, "/", config))
        .cookie(expired(REFRESH_COOKIE, REFRESH_COOKIE_PATH, config));
}

/// Token from `Authorization: Bearer <token>`, if present and well formed.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::HttpResponse;
    use actix_web::http::header::{HeaderValue, SET_COOKIE};

    #[test]
    fn remember_me_controls_refresh_cookie_persistence() {
        let config = Config::for_tests();
        let persistent = refresh_cookie("t", true, &config);
        assert_eq!(
            persistent.max_age(),
            Some(Duration::seconds(config.remember_me_ttl as i64))
        );
        let session_only = refresh_cookie("t", false, &config);
        assert_eq!(session_only.max_age(), None);
        assert_eq!(session_only.path(), Some(REFRESH_COOKIE_PATH));
        assert_eq!(session_only.http_only(), Some(true));
    }

    #[test]
    fn clearing_expires_both_cookies() {
        let config = Config::for_tests();
        let mut builder = HttpResponse::NoContent();
        clear_auth_cookies(&mut builder, &config);
        let resp = builder.finish();

        let cookies: Vec<String> = resp
            .headers()
            .get_all(SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));
        assert!(cookies.iter().any(|c| c.starts_with("hr_access=;")));
        assert!(cookies.iter().any(|c| c.starts_with("hr_refresh=;")));
    }

    #[test]
    fn bearer_token_requires_prefix() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(
            actix_web::http::header::AUTHORIZATION,
            HeaderValue::from_static("Token abc"),
        );
        assert_eq!(bearer_token(&headers), None);
        headers.insert(
            actix_web::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc"),
        );
        assert_eq!(bearer_token(&headers), Some("abc"));
    }
}
