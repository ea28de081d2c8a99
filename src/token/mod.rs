//! Credential codec: signed, time-bounded access tokens. Stateless.

mod error;
mod jwt;

pub use error::Error;
pub use jwt::{peek_claims, AccessClaims, AccessToken, TokenCodec, MIN_SECRET_BYTES};
