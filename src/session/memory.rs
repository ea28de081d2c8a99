//! In-process identity store for tests and local demos.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::store::{IdentityRecord, IdentityStore, NewIdentity, RefreshSlot, RotateOutcome};

struct Entry {
    record: IdentityRecord,
    slot: Option<RefreshSlot>,
}

#[derive(Default)]
pub struct MemoryIdentityStore {
    entries: Mutex<HashMap<Uuid, Entry>>,
}

impl MemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityRecord>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .values()
            .find(|entry| entry.record.email == email)
            .map(|entry| entry.record.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<IdentityRecord>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(&id).map(|entry| entry.record.clone()))
    }

    async fn insert_identity(&self, identity: NewIdentity) -> Result<Option<Uuid>> {
        let mut entries = self.entries.lock().await;
        if entries
            .values()
            .any(|entry| entry.record.email == identity.email)
        {
            return Ok(None);
        }
        let id = Uuid::now_v7();
        entries.insert(
            id,
            Entry {
                record: IdentityRecord {
                    id,
                    email: identity.email,
                    role: identity.role,
                    email_confirmed: identity.email_confirmed,
                    password_hash: identity.password_hash,
                },
                slot: None,
            },
        );
        Ok(Some(id))
    }

    async fn refresh_slot(&self, id: Uuid) -> Result<Option<RefreshSlot>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(&id).and_then(|entry| entry.slot.clone()))
    }

    async fn store_refresh(&self, id: Uuid, slot: RefreshSlot) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&id) {
            entry.slot = Some(slot);
        }
        Ok(())
    }

    async fn rotate_refresh(
        &self,
        id: Uuid,
        expected_hash: &[u8],
        next: RefreshSlot,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome> {
        // The lock spans compare and write, which is what makes this a CAS.
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(&id) else {
            return Ok(RotateOutcome::Stale);
        };
        let live = entry.slot.as_ref().is_some_and(|current| {
            current.hash.as_slice() == expected_hash && current.expires_at > now
        });
        if !live {
            return Ok(RotateOutcome::Stale);
        }
        entry.slot = Some(next);
        Ok(RotateOutcome::Rotated)
    }

    async fn clear_refresh(&self, id: Uuid) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&id) {
            entry.slot = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use anyhow::Context;
    use chrono::Duration;

    fn new_identity(email: &str) -> NewIdentity {
        NewIdentity {
            email: email.to_string(),
            role: Role::User,
            email_confirmed: true,
            password_hash: "hash".to_string(),
        }
    }

    fn slot(hash: &[u8], expires_at: DateTime<Utc>) -> RefreshSlot {
        RefreshSlot {
            hash: hash.to_vec(),
            expires_at,
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_email() -> Result<()> {
        let store = MemoryIdentityStore::new();
        let id = store
            .insert_identity(new_identity("a@x.com"))
            .await?
            .context("first insert")?;
        assert!(store.insert_identity(new_identity("a@x.com")).await?.is_none());
        let found = store.find_by_email("a@x.com").await?.context("lookup")?;
        assert_eq!(found.id, id);
        assert!(store.find_by_id(id).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn rotate_requires_matching_unexpired_hash() -> Result<()> {
        let store = MemoryIdentityStore::new();
        let id = store
            .insert_identity(new_identity("b@x.com"))
            .await?
            .context("insert")?;
        let now = Utc::now();
        store
            .store_refresh(id, slot(b"one", now + Duration::days(7)))
            .await?;

        let outcome = store
            .rotate_refresh(id, b"wrong", slot(b"two", now + Duration::days(7)), now)
            .await?;
        assert_eq!(outcome, RotateOutcome::Stale);

        let outcome = store
            .rotate_refresh(id, b"one", slot(b"two", now + Duration::days(7)), now)
            .await?;
        assert_eq!(outcome, RotateOutcome::Rotated);

        // The superseded hash no longer matches.
        let outcome = store
            .rotate_refresh(id, b"one", slot(b"three", now + Duration::days(7)), now)
            .await?;
        assert_eq!(outcome, RotateOutcome::Stale);

        let later = now + Duration::days(8);
        let outcome = store
            .rotate_refresh(id, b"two", slot(b"four", later + Duration::days(7)), later)
            .await?;
        assert_eq!(outcome, RotateOutcome::Stale);
        Ok(())
    }

    #[tokio::test]
    async fn clear_is_idempotent() -> Result<()> {
        let store = MemoryIdentityStore::new();
        let id = store
            .insert_identity(new_identity("c@x.com"))
            .await?
            .context("insert")?;
        store
            .store_refresh(id, slot(b"one", Utc::now() + Duration::days(1)))
            .await?;
        store.clear_refresh(id).await?;
        store.clear_refresh(id).await?;
        assert!(store.refresh_slot(id).await?.is_none());
        Ok(())
    }
}
