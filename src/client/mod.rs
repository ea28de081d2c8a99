//! Client half of the session layer: credential cache, single-flight renewal
//! and route admission.

pub mod admission;
pub mod cache;
mod config;
pub mod coordinator;
mod error;
#[cfg(test)]
mod mock;
pub mod session;
pub mod transport;

pub use admission::{
    login_redirect, return_path, Admission, Requirement, RouteAdmission, RouteTable,
};
pub use cache::{CredentialCache, FileTokenStorage, MemoryTokenStorage, TokenStorage};
pub use config::{ClientConfig, DEFAULT_TIMEOUT};
pub use coordinator::RefreshCoordinator;
pub use error::ClientError;
pub use session::{SessionClaims, SessionContext, SessionStatus};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
