//! Plaintext refresh carrier handed to the client: `<identity-id>.<secret>`.

use std::fmt;
use uuid::Uuid;

#[derive(Clone, PartialEq, Eq)]
pub struct RefreshCarrier {
    pub identity_id: Uuid,
    pub secret: String,
}

impl RefreshCarrier {
    #[must_use]
    pub fn new(identity_id: Uuid, secret: String) -> Self {
        Self {
            identity_id,
            secret,
        }
    }

    /// Parse a carrier value; returns `None` on any structural problem.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let (id, secret) = value.trim().split_once('.')?;
        let identity_id = Uuid::parse_str(id).ok()?;
        if secret.is_empty() || secret.contains('.') {
            return None;
        }
        Some(Self::new(identity_id, secret.to_string()))
    }

    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}.{}", self.identity_id, self.secret)
    }
}

// Keep the secret out of logs.
impl fmt::Debug for RefreshCarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCarrier")
            .field("identity_id", &self.identity_id)
            .finish_non_exhaustive()
    }
}
