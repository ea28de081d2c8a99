//! Refresh carrier cookie and bearer header parsing.

use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};

use super::state::AuthConfig;
use crate::session::RefreshCarrier;

pub const REFRESH_COOKIE_NAME: &str = "portier_refresh";
/// The carrier is only ever sent to the refresh endpoint.
pub const REFRESH_COOKIE_PATH: &str = "/auth/refresh";

/// Build the `HttpOnly` cookie holding the refresh carrier.
pub(super) fn refresh_cookie(
    config: &AuthConfig,
    carrier: &RefreshCarrier,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.refresh_ttl_seconds();
    let value = carrier.encode();
    let mut cookie = format!(
        "{REFRESH_COOKIE_NAME}={value}; Path={REFRESH_COOKIE_PATH}; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if config.refresh_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(super) fn clear_refresh_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{REFRESH_COOKIE_NAME}=; Path={REFRESH_COOKIE_PATH}; HttpOnly; SameSite=Lax; Max-Age=0"
    );
    if config.refresh_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(super) fn extract_refresh_carrier(headers: &HeaderMap) -> Option<RefreshCarrier> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            if key.trim() == REFRESH_COOKIE_NAME {
                return RefreshCarrier::parse(val.trim());
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
