//! Authenticated principal extraction and authorization helpers.
//!
//! Flow Overview: read the bearer credential, verify it with the codec (no
//! store lookup), then run the route's policy checks in order. A caller that
//! is authenticated but lacks the role gets `403`, never `401`.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{cookies::extract_bearer_token, error::AuthError, state::AuthState};
use crate::{identity::Role, token::TokenCodec};

/// Authenticated caller derived from a verified access credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub identity_id: Uuid,
    pub role: Role,
}

/// Verify the bearer credential, or return 401.
///
/// # Errors
///
/// [`AuthError::Unauthenticated`] when the header is missing, the signature or
/// issuer is wrong, or the credential has expired.
pub fn require_auth(
    headers: &HeaderMap,
    codec: &TokenCodec,
    now_unix_seconds: i64,
) -> Result<Principal, AuthError> {
    let token = extract_bearer_token(headers).ok_or(AuthError::Unauthenticated)?;
    let claims = codec.verify(&token, now_unix_seconds).map_err(|err| {
        debug!("Rejected access credential: {err}");
        AuthError::Unauthenticated
    })?;
    Ok(Principal {
        identity_id: claims.sub,
        role: claims.role,
    })
}

/// One step of an authorization pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Check {
    Authenticated,
    /// Principal's role must be one of these. Empty means any role.
    RoleIn(Vec<Role>),
}

/// Ordered list of checks evaluated per request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPolicy {
    checks: Vec<Check>,
}

impl AccessPolicy {
    #[must_use]
    pub fn authenticated() -> Self {
        Self {
            checks: vec![Check::Authenticated],
        }
    }

    #[must_use]
    pub fn roles(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            checks: vec![Check::Authenticated, Check::RoleIn(roles.into_iter().collect())],
        }
    }

    #[must_use]
    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    /// Run every check in order and return the principal.
    ///
    /// # Errors
    ///
    /// The first failing check decides: `Unauthenticated` or `Forbidden`.
    pub fn evaluate(
        &self,
        headers: &HeaderMap,
        codec: &TokenCodec,
        now_unix_seconds: i64,
    ) -> Result<Principal, AuthError> {
        let mut principal = None;
        for check in &self.checks {
            let current = match principal.take() {
                Some(current) => current,
                None => require_auth(headers, codec, now_unix_seconds)?,
            };
            if let Check::RoleIn(roles) = check {
                if !roles.is_empty() && !roles.contains(&current.role) {
                    debug!(
                        identity_id = %current.identity_id,
                        role = %current.role,
                        "Role check failed"
                    );
                    return Err(AuthError::Forbidden);
                }
            }
            principal = Some(current);
        }
        match principal {
            Some(principal) => Ok(principal),
            None => require_auth(headers, codec, now_unix_seconds),
        }
    }
}

/// Route middleware applying an [`AccessPolicy`]; the resolved [`Principal`]
/// is stored in request extensions for the handler.
pub async fn require_roles(
    State(policy): State<Arc<AccessPolicy>>,
    Extension(auth_state): Extension<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    match policy.evaluate(request.headers(), auth_state.codec(), auth_state.now()) {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::http::{header::AUTHORIZATION, HeaderValue};

    const NOW: i64 = 1_700_000_000;

    fn codec() -> Result<TokenCodec> {
        Ok(TokenCodec::new(
            b"0123456789abcdef0123456789abcdef",
            "portier",
            900,
        )?)
    }

    fn bearer(token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
        Ok(headers)
    }

    #[test]
    fn missing_header_is_unauthenticated() -> Result<()> {
        let codec = codec()?;
        assert_eq!(
            require_auth(&HeaderMap::new(), &codec, NOW),
            Err(AuthError::Unauthenticated)
        );
        Ok(())
    }

    #[test]
    fn expired_credential_is_unauthenticated() -> Result<()> {
        let codec = codec()?;
        let minted = codec.mint(Uuid::new_v4(), Role::Admin, NOW)?;
        let headers = bearer(&minted.token)?;
        assert!(require_auth(&headers, &codec, NOW + 10).is_ok());
        assert_eq!(
            require_auth(&headers, &codec, NOW + 900),
            Err(AuthError::Unauthenticated)
        );
        Ok(())
    }

    #[test]
    fn wrong_role_is_forbidden_not_unauthenticated() -> Result<()> {
        let codec = codec()?;
        let minted = codec.mint(Uuid::new_v4(), Role::User, NOW)?;
        let headers = bearer(&minted.token)?;
        let policy = AccessPolicy::roles([Role::Admin]);
        assert_eq!(policy.evaluate(&headers, &codec, NOW), Err(AuthError::Forbidden));

        // No credential on the same route is a 401.
        assert_eq!(
            policy.evaluate(&HeaderMap::new(), &codec, NOW),
            Err(AuthError::Unauthenticated)
        );
        Ok(())
    }

    #[test]
    fn empty_role_set_means_authenticated_only() -> Result<()> {
        let codec = codec()?;
        let subject = Uuid::new_v4();
        let minted = codec.mint(subject, Role::User, NOW)?;
        let headers = bearer(&minted.token)?;
        let principal = AccessPolicy::roles(Vec::new()).evaluate(&headers, &codec, NOW)?;
        assert_eq!(principal.identity_id, subject);
        assert_eq!(principal.role, Role::User);

        let principal = AccessPolicy::authenticated().evaluate(&headers, &codec, NOW)?;
        assert_eq!(principal.identity_id, subject);
        Ok(())
    }

    #[test]
    fn matching_role_passes() -> Result<()> {
        let codec = codec()?;
        let minted = codec.mint(Uuid::new_v4(), Role::Admin, NOW)?;
        let headers = bearer(&minted.token)?;
        let policy = AccessPolicy::roles([Role::User, Role::Admin]);
        assert_eq!(policy.evaluate(&headers, &codec, NOW)?.role, Role::Admin);
        Ok(())
    }
}
