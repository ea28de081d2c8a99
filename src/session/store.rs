//! Identity lookup and refresh-slot persistence.
//!
//! The store is the only server-side mutable state in the session core. Each
//! identity owns exactly one refresh slot holding a SHA-256 digest and an
//! expiry; the plaintext never reaches the store.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::identity::{PublicIdentity, Role};

/// Identity row as seen by the session core.
#[derive(Clone, Debug)]
pub struct IdentityRecord {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub email_confirmed: bool,
    pub password_hash: String,
}

impl IdentityRecord {
    #[must_use]
    pub fn public(&self) -> PublicIdentity {
        PublicIdentity {
            id: self.id,
            email: self.email.clone(),
            role: self.role,
            email_confirmed: self.email_confirmed,
        }
    }
}

/// Fields required to create an identity.
#[derive(Clone, Debug)]
pub struct NewIdentity {
    pub email: String,
    pub role: Role,
    pub email_confirmed: bool,
    pub password_hash: String,
}

/// Current content of an identity's refresh slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshSlot {
    pub hash: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a compare-and-set rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotateOutcome {
    Rotated,
    /// The slot no longer held the presented hash, or it had expired.
    Stale,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityRecord>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<IdentityRecord>>;

    /// Create an identity, returning `None` when the email is taken.
    async fn insert_identity(&self, identity: NewIdentity) -> Result<Option<Uuid>>;

    async fn refresh_slot(&self, id: Uuid) -> Result<Option<RefreshSlot>>;

    /// Overwrite the refresh slot unconditionally (login).
    async fn store_refresh(&self, id: Uuid, slot: RefreshSlot) -> Result<()>;

    /// Replace the slot only if it still holds `expected_hash` and has not
    /// expired at `now`. Must be atomic per identity.
    async fn rotate_refresh(
        &self,
        id: Uuid,
        expected_hash: &[u8],
        next: RefreshSlot,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome>;

    /// Empty the refresh slot. Clearing an empty slot is not an error.
    async fn clear_refresh(&self, id: Uuid) -> Result<()>;
}
