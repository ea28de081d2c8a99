//! Session HTTP surface: login, refresh rotation, logout and the
//! authorization helpers every protected route goes through.

pub(crate) mod cookies;
mod error;
pub mod principal;
pub mod session;
mod state;
pub mod types;

pub use cookies::{REFRESH_COOKIE_NAME, REFRESH_COOKIE_PATH};
pub use error::{AuthError, INVALID_CREDENTIALS_MESSAGE};
pub use principal::{require_auth, require_roles, AccessPolicy, Check, Principal};
pub use state::{AuthConfig, AuthState, DEFAULT_ACCESS_TTL_SECONDS};
