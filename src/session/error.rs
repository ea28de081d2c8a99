use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("account email is not confirmed")]
    AccountNotConfirmed,

    /// The presented refresh carrier is unknown, superseded or expired.
    #[error("invalid refresh credential")]
    InvalidRefresh,

    #[error(transparent)]
    Token(#[from] crate::token::Error),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
