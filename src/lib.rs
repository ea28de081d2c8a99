//! # Portier (session and identity layer)
//!
//! `portier` issues short-lived access credentials and long-lived rotating
//! refresh carriers, validates them on every protected request, and ships the
//! client half that renews sessions silently.
//!
//! ## Server
//!
//! - **Access credentials** are HS256 JWTs carrying `{sub, role, iat, exp}`.
//!   They are never stored; verification is signature + expiry only.
//! - **Refresh carriers** are opaque random secrets delivered in an `HttpOnly`
//!   cookie scoped to `/auth/refresh`. Only a SHA-256 digest is stored, one per
//!   identity, and every refresh rotates it with compare-and-set semantics so a
//!   superseded carrier can never be replayed.
//! - **Authorization** is a small pipeline: authenticated first, then role.
//!   A caller with a valid credential but the wrong role gets `403`, never `401`.
//!
//! ## Client
//!
//! [`client::RefreshCoordinator`] attaches credentials to outbound calls and
//! renews them single-flight: any number of concurrent calls that need a new
//! credential share one `POST /auth/refresh`. [`client::RouteAdmission`] turns
//! session state into allow / login / forbidden navigation decisions.

pub mod api;
pub mod cli;
pub mod client;
pub mod clock;
pub mod identity;
pub mod session;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
