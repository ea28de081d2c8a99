use thiserror::Error;

/// Client-side failures. Clonable so one renewal outcome can be handed to
/// every waiting call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    /// The server rejected the credential and no renewal was possible.
    #[error("Authentication required")]
    Unauthenticated,
    /// Renewal failed terminally; the cached credential has been dropped.
    #[error("Session expired")]
    SessionExpired,
    #[error("Insufficient role")]
    Forbidden,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Request failed ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("Response error: {0}")]
    Parse(String),
    #[error("Config error: {0}")]
    Config(String),
}

impl ClientError {
    /// True for failures of the transport itself rather than a server answer.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}
