//! Auth state and configuration shared by the session handlers.

use crate::{
    session::{SessionIssuer, DEFAULT_REFRESH_TTL_SECONDS},
    token::TokenCodec,
};

pub const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_JWT_ISSUER: &str = "portier";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    public_base_url: String,
    jwt_issuer: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(public_base_url: String) -> Self {
        Self {
            public_base_url,
            jwt_issuer: DEFAULT_JWT_ISSUER.to_string(),
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_jwt_issuer(mut self, issuer: String) -> Self {
        self.jwt_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    #[must_use]
    pub fn jwt_issuer(&self) -> &str {
        &self.jwt_issuer
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    pub(super) fn refresh_cookie_secure(&self) -> bool {
        self.public_base_url.starts_with("https://")
    }
}

pub struct AuthState {
    config: AuthConfig,
    issuer: SessionIssuer,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, issuer: SessionIssuer) -> Self {
        Self { config, issuer }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn issuer(&self) -> &SessionIssuer {
        &self.issuer
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        self.issuer.codec()
    }

    /// Current unix time from the issuer's clock.
    #[must_use]
    pub fn now(&self) -> i64 {
        self.issuer.clock().now_unix()
    }
}
