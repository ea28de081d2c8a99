//! Server-side session core: identity store, password capability and the
//! issuer that ties them to the credential codec.

mod carrier;
pub mod email;
mod error;
mod issuer;
pub mod memory;
pub mod password;
pub mod postgres;
pub mod store;
mod utils;

pub use carrier::RefreshCarrier;
pub use error::SessionError;
pub use issuer::{enroll, IssuedSession, SessionIssuer, DEFAULT_REFRESH_TTL_SECONDS};
pub use utils::{normalize_email, valid_email};

#[cfg(test)]
pub(crate) use issuer::test_support;
