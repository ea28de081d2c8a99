//! Explicit session context for the client half.
//!
//! Holds the credential cache, publishes session status over a
//! `tokio::sync::watch` channel, and remembers the `/auth/me` identity for the
//! access credential it was fetched with.

use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use super::cache::CredentialCache;
use crate::identity::{PublicIdentity, Role};

/// Advisory view decoded from the cached access credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionClaims {
    pub identity_id: Uuid,
    pub role: Role,
    pub expires_at: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session has been established yet.
    Anonymous,
    Active(SessionClaims),
    LoggedOut,
}

pub struct SessionContext {
    cache: Arc<CredentialCache>,
    status: watch::Sender<SessionStatus>,
    identity: Mutex<Option<(String, PublicIdentity)>>,
    logouts: AtomicU64,
}

impl SessionContext {
    #[must_use]
    pub fn new(cache: Arc<CredentialCache>) -> Self {
        let initial = match (cache.valid_token(), claims_of(&cache)) {
            (Some(_), Some(claims)) => SessionStatus::Active(claims),
            _ => SessionStatus::Anonymous,
        };
        let (status, _) = watch::channel(initial);
        Self {
            cache,
            status,
            identity: Mutex::new(None),
            logouts: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Store a new access credential and publish the active session.
    pub fn establish(&self, token: String) {
        self.cache.set(token);
        let status = claims_of(&self.cache).map_or(SessionStatus::Anonymous, SessionStatus::Active);
        debug!("session established");
        self.status.send_replace(status);
    }

    /// Drop the credential and publish `LoggedOut`.
    ///
    /// Returns `false` when the session was already logged out, in which case
    /// nothing is published.
    pub fn end(&self) -> bool {
        self.cache.clear();
        *self.identity.lock() = None;
        let published = self.status.send_if_modified(|status| {
            if *status == SessionStatus::LoggedOut {
                false
            } else {
                *status = SessionStatus::LoggedOut;
                true
            }
        });
        if published {
            self.logouts.fetch_add(1, Ordering::SeqCst);
            info!("session ended");
        }
        published
    }

    /// How many times `LoggedOut` has been published.
    #[must_use]
    pub fn logged_out_events(&self) -> u64 {
        self.logouts.load(Ordering::SeqCst)
    }

    /// Identity previously fetched with exactly this access credential.
    #[must_use]
    pub fn cached_identity(&self, token: &str) -> Option<PublicIdentity> {
        self.identity
            .lock()
            .as_ref()
            .filter(|(cached_token, _)| cached_token == token)
            .map(|(_, identity)| identity.clone())
    }

    pub fn remember_identity(&self, token: String, identity: PublicIdentity) {
        *self.identity.lock() = Some((token, identity));
    }
}

fn claims_of(cache: &CredentialCache) -> Option<SessionClaims> {
    cache.claims().map(|claims| SessionClaims {
        identity_id: claims.sub,
        role: claims.role,
        expires_at: claims.exp,
    })
}
