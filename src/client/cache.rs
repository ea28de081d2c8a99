//! Client credential cache.
//!
//! Holds the current access credential and its decoded claims. `set` and
//! `clear` are the only mutators; each write is mirrored to a [`TokenStorage`]
//! so a restarted client can pick the session back up. Expiry is judged
//! locally from the `exp` claim; the payload is never trusted for anything
//! but that hint.

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::warn;

use crate::{
    clock::Clock,
    token::{peek_claims, AccessClaims},
};

/// Persistence for the cached access credential.
pub trait TokenStorage: Send + Sync {
    /// # Errors
    /// Returns an error if the backing medium cannot be read.
    fn load(&self) -> Result<Option<String>>;

    /// # Errors
    /// Returns an error if the backing medium cannot be written.
    fn save(&self, token: &str) -> Result<()>;

    /// # Errors
    /// Returns an error if the backing medium cannot be written.
    fn clear(&self) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStorage for MemoryTokenStorage {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.token.lock().clone())
    }

    fn save(&self, token: &str) -> Result<()> {
        *self.token.lock() = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.token.lock() = None;
        Ok(())
    }
}

/// Stores the credential in a single file readable only by the owner.
#[derive(Clone, Debug)]
pub struct FileTokenStorage {
    path: PathBuf,
}

impl FileTokenStorage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStorage for FileTokenStorage {
    fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read {}", self.path.display()))
            }
        }
    }

    fn save(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        fs::write(&self.path, token)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                .with_context(|| format!("failed to restrict {}", self.path.display()))?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to remove {}", self.path.display()))
            }
        }
    }
}

struct Cached {
    token: String,
    claims: Option<AccessClaims>,
}

impl Cached {
    fn new(token: String) -> Self {
        let claims = peek_claims(&token).ok();
        Self { token, claims }
    }
}

pub struct CredentialCache {
    current: RwLock<Option<Cached>>,
    storage: Arc<dyn TokenStorage>,
    clock: Arc<dyn Clock>,
}

impl CredentialCache {
    /// Empty cache; storage is written to but not read.
    #[must_use]
    pub fn new(storage: Arc<dyn TokenStorage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            current: RwLock::new(None),
            storage,
            clock,
        }
    }

    /// Cache hydrated from whatever `storage` holds.
    #[must_use]
    pub fn restore(storage: Arc<dyn TokenStorage>, clock: Arc<dyn Clock>) -> Self {
        let cache = Self::new(storage, clock);
        match cache.storage.load() {
            Ok(Some(token)) => *cache.current.write() = Some(Cached::new(token)),
            Ok(None) => {}
            Err(err) => warn!("Failed to restore cached credential: {err:#}"),
        }
        cache
    }

    pub fn set(&self, token: impl Into<String>) {
        let token = token.into();
        if let Err(err) = self.storage.save(&token) {
            warn!("Failed to persist credential: {err:#}");
        }
        *self.current.write() = Some(Cached::new(token));
    }

    pub fn clear(&self) {
        if let Err(err) = self.storage.clear() {
            warn!("Failed to clear persisted credential: {err:#}");
        }
        *self.current.write() = None;
    }

    /// Raw cached credential, expired or not.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.current.read().as_ref().map(|cached| cached.token.clone())
    }

    /// True when nothing is cached, the payload cannot be decoded, or `exp`
    /// has passed. Never touches the network.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        let now = self.clock.now_unix();
        self.current
            .read()
            .as_ref()
            .and_then(|cached| cached.claims.as_ref())
            .map_or(true, |claims| claims.exp <= now)
    }

    /// The credential if it is present and not expired.
    #[must_use]
    pub fn valid_token(&self) -> Option<String> {
        let now = self.clock.now_unix();
        self.current.read().as_ref().and_then(|cached| {
            cached
                .claims
                .as_ref()
                .filter(|claims| claims.exp > now)
                .map(|_| cached.token.clone())
        })
    }

    /// Advisory claims of the cached credential.
    #[must_use]
    pub fn claims(&self) -> Option<AccessClaims> {
        self.current
            .read()
            .as_ref()
            .and_then(|cached| cached.claims.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, identity::Role, token::TokenCodec};
    use uuid::Uuid;

    const NOW: i64 = 1_700_000_000;

    fn mint(ttl: i64) -> Result<String> {
        let codec = TokenCodec::new(b"0123456789abcdef0123456789abcdef", "portier", ttl)?;
        Ok(codec.mint(Uuid::new_v4(), Role::User, NOW)?.token)
    }

    fn cache() -> (CredentialCache, Arc<MemoryTokenStorage>, Arc<ManualClock>) {
        let storage = Arc::new(MemoryTokenStorage::new());
        let clock = Arc::new(ManualClock::new(NOW));
        (
            CredentialCache::new(storage.clone(), clock.clone()),
            storage,
            clock,
        )
    }

    #[test]
    fn empty_cache_is_expired() {
        let (cache, _, _) = cache();
        assert!(cache.is_expired());
        assert!(cache.valid_token().is_none());
        assert!(cache.claims().is_none());
    }

    #[test]
    fn expiry_follows_the_clock() -> Result<()> {
        let (cache, _, clock) = cache();
        let token = mint(900)?;
        cache.set(token.clone());
        assert!(!cache.is_expired());
        assert_eq!(cache.valid_token(), Some(token.clone()));

        clock.set(NOW + 900);
        assert!(cache.is_expired());
        assert!(cache.valid_token().is_none());
        // Still there for a refresh decision.
        assert_eq!(cache.token(), Some(token));
        Ok(())
    }

    #[test]
    fn undecodable_token_counts_as_expired() {
        let (cache, _, _) = cache();
        cache.set("not-a-jwt");
        assert!(cache.is_expired());
        assert!(cache.valid_token().is_none());
        assert_eq!(cache.token().as_deref(), Some("not-a-jwt"));
    }

    #[test]
    fn writes_are_mirrored_to_storage() -> Result<()> {
        let (cache, storage, _) = cache();
        let token = mint(900)?;
        cache.set(token.clone());
        assert_eq!(storage.load()?, Some(token));
        cache.clear();
        assert_eq!(storage.load()?, None);
        assert!(cache.token().is_none());
        Ok(())
    }

    #[test]
    fn restore_hydrates_from_storage() -> Result<()> {
        let storage = Arc::new(MemoryTokenStorage::new());
        let token = mint(900)?;
        storage.save(&token)?;
        let cache = CredentialCache::restore(storage, Arc::new(ManualClock::new(NOW)));
        assert_eq!(cache.valid_token(), Some(token));
        Ok(())
    }

    #[test]
    fn file_storage_round_trip() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("portier-cache-{}", Uuid::new_v4()));
        let storage = FileTokenStorage::new(dir.join("token"));
        assert_eq!(storage.load()?, None);
        storage.save("abc")?;
        assert_eq!(storage.load()?, Some("abc".to_string()));
        storage.clear()?;
        storage.clear()?;
        assert_eq!(storage.load()?, None);
        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
