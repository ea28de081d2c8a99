use super::Error;
use crate::identity::Role;
use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;
use uuid::Uuid;

pub const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub jti: String,
}

/// A freshly minted access credential and the claims it carries.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub claims: AccessClaims,
}

/// Signs and verifies HS256 access credentials.
///
/// Expiry is checked against the `now` handed in by the caller rather than
/// the system clock, so the same codec serves request handlers and tests.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    ttl_seconds: i64,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec from a shared HMAC secret.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WeakSecret`] when the secret is shorter than
    /// [`MIN_SECRET_BYTES`].
    pub fn new(secret: &[u8], issuer: impl Into<String>, ttl_seconds: i64) -> Result<Self, Error> {
        if secret.len() < MIN_SECRET_BYTES {
            return Err(Error::WeakSecret(MIN_SECRET_BYTES));
        }
        let issuer = issuer.into();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer.as_str()]);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer,
            ttl_seconds,
        })
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// Mint a credential for `subject` valid from `now` for the configured ttl.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if signing fails.
    pub fn mint(
        &self,
        subject: Uuid,
        role: Role,
        now_unix_seconds: i64,
    ) -> Result<AccessToken, Error> {
        let claims = AccessClaims {
            sub: subject,
            role,
            iat: now_unix_seconds,
            exp: now_unix_seconds + self.ttl_seconds,
            iss: self.issuer.clone(),
            jti: Ulid::new().to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(Error::Encode)?;
        Ok(AccessToken { token, claims })
    }

    /// Verify signature, issuer and expiry, returning the decoded claims.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the token is not a well-formed JWT,
    /// - the signature does not match,
    /// - the issuer differs from the configured one,
    /// - `exp` is at or before `now_unix_seconds`.
    pub fn verify(&self, token: &str, now_unix_seconds: i64) -> Result<AccessClaims, Error> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation).map_err(
            |err| match err.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    Error::InvalidSignature
                }
                ErrorKind::InvalidIssuer => Error::InvalidIssuer,
                ErrorKind::ExpiredSignature => Error::Expired,
                ErrorKind::Base64(_) => Error::Base64,
                _ => Error::Malformed,
            },
        )?;

        if data.claims.exp <= now_unix_seconds {
            return Err(Error::Expired);
        }

        Ok(data.claims)
    }
}

/// Decode the claims segment without checking the signature.
///
/// Only for display and local expiry hints; never an authorization decision.
///
/// # Errors
///
/// Returns an error if the token does not have three segments or the payload
/// is not base64url-encoded JSON claims.
pub fn peek_claims(token: &str) -> Result<AccessClaims, Error> {
    let mut parts = token.split('.');
    let _header = parts.next().ok_or(Error::Malformed)?;
    let claims_b64 = parts.next().ok_or(Error::Malformed)?;
    let _signature = parts.next().ok_or(Error::Malformed)?;
    if parts.next().is_some() {
        return Err(Error::Malformed);
    }
    let bytes = Base64UrlUnpadded::decode_vec(claims_b64).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}
