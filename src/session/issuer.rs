//! Session issuance: login, refresh rotation and logout.
//!
//! Flow Overview:
//! 1) `login` checks the password (against a dummy hash when the identity is
//!    unknown), then the confirmation flag, and only then issues a pair.
//! 2) `refresh` hashes the presented secret and rotates the stored slot with
//!    compare-and-set. Whoever loses a race, or presents a superseded or
//!    expired carrier, gets `InvalidRefresh` and the slot is emptied: a
//!    superseded carrier means two holders, so neither keeps the session.
//! 3) `logout` empties the slot; repeating it is harmless.
//! 4) `revoke` empties the slot named by a carrier, for clients whose access
//!    credential already lapsed.

use anyhow::Context;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    carrier::RefreshCarrier,
    error::SessionError,
    password::PasswordHasher,
    store::{IdentityStore, NewIdentity, RefreshSlot, RotateOutcome},
    utils::{generate_refresh_secret, hash_refresh_secret, normalize_email, valid_email},
};
use crate::{
    clock::Clock,
    identity::Role,
    token::{AccessToken, TokenCodec},
};

pub const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

/// An access credential plus the refresh carrier to hand to the client once.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub access: AccessToken,
    pub refresh: RefreshCarrier,
}

pub struct SessionIssuer {
    store: Arc<dyn IdentityStore>,
    passwords: Arc<dyn PasswordHasher>,
    codec: TokenCodec,
    clock: Arc<dyn Clock>,
    refresh_ttl_seconds: i64,
}

impl SessionIssuer {
    #[must_use]
    pub fn new(
        store: Arc<dyn IdentityStore>,
        passwords: Arc<dyn PasswordHasher>,
        codec: TokenCodec,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            passwords,
            codec,
            clock,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Authenticate with email and password and start a session.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidCredentials`] for an unknown email or a wrong
    ///   password.
    /// - [`SessionError::AccountNotConfirmed`] when the password matched but the
    ///   email is not confirmed.
    /// - [`SessionError::Store`] / [`SessionError::Token`] on collaborator failure.
    #[instrument(skip(self, email, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<IssuedSession, SessionError> {
        let email = normalize_email(email);
        let Some(record) = self.store.find_by_email(&email).await? else {
            let _ = self
                .passwords
                .verify(password, self.passwords.dummy_hash())
                .await;
            debug!("login rejected: unknown identity");
            return Err(SessionError::InvalidCredentials);
        };

        if !self.passwords.verify(password, &record.password_hash).await? {
            debug!(identity_id = %record.id, "login rejected: password mismatch");
            return Err(SessionError::InvalidCredentials);
        }

        if !record.email_confirmed {
            debug!(identity_id = %record.id, "login rejected: email not confirmed");
            return Err(SessionError::AccountNotConfirmed);
        }

        let now = self.clock.now_unix();
        let access = self.codec.mint(record.id, record.role, now)?;
        let secret = generate_refresh_secret()?;
        let slot = RefreshSlot {
            hash: hash_refresh_secret(&secret),
            expires_at: self.refresh_expiry(now)?,
        };
        self.store.store_refresh(record.id, slot).await?;

        info!(identity_id = %record.id, role = %record.role, "session started");
        Ok(IssuedSession {
            access,
            refresh: RefreshCarrier::new(record.id, secret),
        })
    }

    /// Exchange a refresh carrier for a new access credential and a rotated
    /// carrier. The presented carrier is dead afterwards.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidRefresh`] when the identity is gone, the slot is
    /// empty, the hash does not match, the slot expired, or a concurrent
    /// refresh already rotated it. Every failure after the identity lookup
    /// also empties the slot.
    #[instrument(skip(self, carrier), fields(identity_id = %carrier.identity_id))]
    pub async fn refresh(&self, carrier: &RefreshCarrier) -> Result<IssuedSession, SessionError> {
        let Some(record) = self.store.find_by_id(carrier.identity_id).await? else {
            debug!("refresh rejected: unknown identity");
            return Err(SessionError::InvalidRefresh);
        };

        let now = self.clock.now_unix();
        // Role comes from the record so a demotion takes effect on refresh.
        let access = self.codec.mint(record.id, record.role, now)?;
        let secret = generate_refresh_secret()?;
        let next = RefreshSlot {
            hash: hash_refresh_secret(&secret),
            expires_at: self.refresh_expiry(now)?,
        };
        let presented = hash_refresh_secret(&carrier.secret);

        match self
            .store
            .rotate_refresh(record.id, &presented, next, unix_to_datetime(now)?)
            .await?
        {
            RotateOutcome::Rotated => {
                debug!("refresh rotated");
                Ok(IssuedSession {
                    access,
                    refresh: RefreshCarrier::new(record.id, secret),
                })
            }
            RotateOutcome::Stale => {
                warn!("refresh rejected: stale or expired carrier; clearing slot");
                self.store.clear_refresh(record.id).await?;
                Err(SessionError::InvalidRefresh)
            }
        }
    }

    /// End the session a refresh carrier belongs to. Unlike [`Self::logout`]
    /// this needs no access credential, only the carrier. Idempotent.
    ///
    /// # Errors
    ///
    /// [`SessionError::Store`] if the slot cannot be read or cleared.
    #[instrument(skip(self, carrier), fields(identity_id = %carrier.identity_id))]
    pub async fn revoke(&self, carrier: &RefreshCarrier) -> Result<(), SessionError> {
        let Some(slot) = self.store.refresh_slot(carrier.identity_id).await? else {
            debug!("revoke: slot already empty");
            return Ok(());
        };
        if slot.hash != hash_refresh_secret(&carrier.secret) {
            warn!("revoke with a superseded carrier");
        }
        self.store.clear_refresh(carrier.identity_id).await?;
        info!("session revoked");
        Ok(())
    }

    /// End the session for `identity_id`. Idempotent.
    ///
    /// # Errors
    ///
    /// [`SessionError::Store`] if the slot cannot be cleared.
    #[instrument(skip(self))]
    pub async fn logout(&self, identity_id: Uuid) -> Result<(), SessionError> {
        self.store.clear_refresh(identity_id).await?;
        info!("session ended");
        Ok(())
    }

    /// Create an identity with a hashed password.
    ///
    /// Returns `Ok(None)` when the email is already registered.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed email or on collaborator failure.
    #[instrument(skip(self, email, password))]
    pub async fn enroll(
        &self,
        email: &str,
        password: &str,
        role: Role,
        email_confirmed: bool,
    ) -> Result<Option<Uuid>, SessionError> {
        enroll(
            self.store.as_ref(),
            self.passwords.as_ref(),
            email,
            password,
            role,
            email_confirmed,
        )
        .await
    }

    fn refresh_expiry(&self, now: i64) -> Result<DateTime<Utc>, SessionError> {
        unix_to_datetime(now + self.refresh_ttl_seconds)
    }
}

/// Create an identity with a freshly hashed password. Returns `Ok(None)` when
/// the email is already registered.
///
/// # Errors
///
/// Returns an error for a malformed email or on collaborator failure.
pub async fn enroll(
    store: &dyn IdentityStore,
    passwords: &dyn PasswordHasher,
    email: &str,
    password: &str,
    role: Role,
    email_confirmed: bool,
) -> Result<Option<Uuid>, SessionError> {
    let email = normalize_email(email);
    if !valid_email(&email) {
        return Err(SessionError::Store(anyhow::anyhow!("invalid email address")));
    }
    let password_hash = passwords.hash(password).await?;
    let id = store
        .insert_identity(NewIdentity {
            email,
            role,
            email_confirmed,
            password_hash,
        })
        .await?;
    if id.is_some() {
        info!(role = %role, "identity enrolled");
    }
    Ok(id)
}

fn unix_to_datetime(seconds: i64) -> Result<DateTime<Utc>, SessionError> {
    Ok(DateTime::<Utc>::from_timestamp(seconds, 0).context("timestamp out of range")?)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::{clock::ManualClock, session::memory::MemoryIdentityStore, session::password};

    pub(crate) const NOW: i64 = 1_700_000_000;
    pub(crate) const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
    pub(crate) const ISSUER: &str = "http://localhost:8080";

    /// Issuer backed by the memory store, cheap argon2 params and a manual clock.
    pub(crate) fn issuer() -> anyhow::Result<(SessionIssuer, Arc<ManualClock>)> {
        let clock = Arc::new(ManualClock::new(NOW));
        let codec = TokenCodec::new(SECRET, ISSUER, 900)?;
        let issuer = SessionIssuer::new(
            Arc::new(MemoryIdentityStore::new()),
            Arc::new(password::test_hasher()?),
            codec,
            clock.clone(),
        );
        Ok((issuer, clock))
    }
}
