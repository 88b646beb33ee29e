//! Token cookies and bearer extraction.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{AUTHORIZATION, COOKIE, InvalidHeaderValue, SET_COOKIE},
};

use super::state::AuthConfig;

pub(crate) const ACCESS_TOKEN_COOKIE: &str = "accessToken";
pub(crate) const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

/// Build a `HttpOnly` cookie carrying a token for `max_age_seconds`.
pub(crate) fn token_cookie(
    config: &AuthConfig,
    name: &str,
    token: &str,
    max_age_seconds: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{name}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}");
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_cookie(
    config: &AuthConfig,
    name: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    token_cookie(config, name, "", 0)
}

/// `Set-Cookie` headers for a freshly issued token pair.
pub(crate) fn token_pair_cookies(
    config: &AuthConfig,
    access_token: &str,
    access_ttl_seconds: i64,
    refresh_token: &str,
    refresh_ttl_seconds: i64,
) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        token_cookie(config, ACCESS_TOKEN_COOKIE, access_token, access_ttl_seconds)?,
    );
    headers.append(
        SET_COOKIE,
        token_cookie(
            config,
            REFRESH_TOKEN_COOKIE,
            refresh_token,
            refresh_ttl_seconds,
        )?,
    );
    Ok(headers)
}

/// `Set-Cookie` headers that expire both token cookies.
pub(crate) fn cleared_cookies(config: &AuthConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in [ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE] {
        if let Ok(cookie) = clear_cookie(config, name) {
            headers.append(SET_COOKIE, cookie);
        }
    }
    headers
}

pub(crate) fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            let val = val.trim();
            if key.trim() == name && !val.is_empty() {
                return Some(val.to_string());
            }
        }
    }
    None
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Access token from the cookie, falling back to the `Authorization` header.
pub(crate) fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    extract_cookie(headers, ACCESS_TOKEN_COOKIE).or_else(|| extract_bearer_token(headers))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secure() -> AuthConfig {
        AuthConfig::new("https://vidtube.dev".to_string())
    }

    #[test]
    fn token_cookie_attributes() -> Result<(), InvalidHeaderValue> {
        let cookie = token_cookie(&secure(), ACCESS_TOKEN_COOKIE, "abc", 60)?;
        assert_eq!(
            cookie.to_str().ok(),
            Some("accessToken=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=60; Secure")
        );

        let insecure = AuthConfig::new("http://localhost:3000".to_string());
        let cookie = token_cookie(&insecure, REFRESH_TOKEN_COOKIE, "xyz", 5)?;
        assert_eq!(
            cookie.to_str().ok(),
            Some("refreshToken=xyz; Path=/; HttpOnly; SameSite=Lax; Max-Age=5")
        );
        Ok(())
    }

    #[test]
    fn pair_sets_two_cookies() -> Result<(), InvalidHeaderValue> {
        let headers = token_pair_cookies(&secure(), "a", 1, "r", 2)?;
        assert_eq!(headers.get_all(SET_COOKIE).iter().count(), 2);
        Ok(())
    }

    #[test]
    fn cleared_cookies_expire_both() {
        let headers = cleared_cookies(&secure());
        let values: Vec<&str> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        assert_eq!(values.len(), 2);
        assert!(values.iter().all(|v| v.contains("Max-Age=0")));
        assert!(values.iter().any(|v| v.starts_with("accessToken=;")));
        assert!(values.iter().any(|v| v.starts_with("refreshToken=;")));
    }

    #[test]
    fn extract_cookie_finds_named_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; accessToken=tok123; refreshToken=ref"),
        );
        assert_eq!(
            extract_cookie(&headers, ACCESS_TOKEN_COOKIE),
            Some("tok123".to_string())
        );
        assert_eq!(
            extract_cookie(&headers, REFRESH_TOKEN_COOKIE),
            Some("ref".to_string())
        );
        assert_eq!(extract_cookie(&headers, "missing"), None);
    }

    #[test]
    fn empty_cookie_value_is_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("accessToken="));
        assert_eq!(extract_cookie(&headers, ACCESS_TOKEN_COOKIE), None);
    }

    #[test]
    fn access_token_prefers_cookie_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(
            extract_access_token(&headers),
            Some("from-header".to_string())
        );

        headers.insert(COOKIE, HeaderValue::from_static("accessToken=from-cookie"));
        assert_eq!(
            extract_access_token(&headers),
            Some("from-cookie".to_string())
        );
    }

    #[test]
    fn bearer_requires_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&headers), None);
    }
}
