use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    Malformed,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("token expired")]
    Expired,
    #[error("signing secret must be at least {0} bytes")]
    WeakSecret(usize),
    #[error("failed to encode token")]
    Encode(#[source] jsonwebtoken::errors::Error),
}
