// Credential cookie handling.
//
// The client carries its token in a `token=` cookie, both on API requests
// and on the WebSocket handshake. The Cookie header is a semicolon-separated
// list of `key=value` pairs; only the `token` key matters here.

use axum::http::{header::COOKIE, HeaderMap};

pub const TOKEN_COOKIE: &str = "token";

/// Extract the credential token from a raw Cookie header value.
pub fn token_from_cookie_value(cookie_header: &str) -> Option<&str> {
    cookie_header
        .split(';')
        .map(str::trim)
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == TOKEN_COOKIE)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// Extract the credential token from request headers.
pub fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers.get(COOKIE).and_then(|value| value.to_str().ok()).and_then(token_from_cookie_value)
}

/// Set-Cookie value that installs the credential token.
///
/// SameSite=None + Secure because the API and the web client are served
/// from different origins.
pub fn session_cookie(token: &str) -> String {
    format!("{TOKEN_COOKIE}={token}; Path=/; SameSite=None; Secure")
}

/// Set-Cookie value that clears the credential token.
pub fn clear_session_cookie() -> String {
    format!("{TOKEN_COOKIE}=; Path=/; SameSite=None; Secure; Max-Age=0")
}
