//! Password hashing capability (argon2id, PHC strings).
//!
//! Hashing is CPU-bound, so both operations run on the blocking pool.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{PasswordHash, SaltString},
    Algorithm, Argon2, Params, PasswordHasher as _, PasswordVerifier as _, Version,
};
use async_trait::async_trait;
use rand::rngs::OsRng;

#[async_trait]
pub trait PasswordHasher: Send + Sync {
    /// Produce a PHC string for `password`.
    async fn hash(&self, password: &str) -> Result<String>;

    /// Check `password` against a stored PHC string.
    async fn verify(&self, password: &str, phc: &str) -> Result<bool>;

    /// A well-formed hash that matches no real password, verified when the
    /// identity is unknown so response timing stays uniform.
    fn dummy_hash(&self) -> &str;
}

#[derive(Clone, Debug)]
pub struct Argon2Passwords {
    params: Params,
    dummy: String,
}

impl Argon2Passwords {
    /// Argon2id with the crate's default cost parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the dummy hash cannot be computed.
    pub fn new() -> Result<Self> {
        Self::with_params(Params::default())
    }

    /// # Errors
    ///
    /// Returns an error if the dummy hash cannot be computed.
    pub fn with_params(params: Params) -> Result<Self> {
        let dummy = hash_blocking(&params, "portier-dummy-password")?;
        Ok(Self { params, dummy })
    }
}

fn argon2(params: &Params) -> Argon2<'static> {
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params.clone())
}

fn hash_blocking(params: &Params, password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2(params)
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?
        .to_string();
    Ok(hash)
}

fn verify_blocking(params: &Params, password: &str, phc: &str) -> Result<bool> {
    let parsed = PasswordHash::new(phc).map_err(|_| anyhow!("invalid password hash"))?;
    Ok(argon2(params)
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[async_trait]
impl PasswordHasher for Argon2Passwords {
    async fn hash(&self, password: &str) -> Result<String> {
        let params = self.params.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hash_blocking(&params, &password))
            .await
            .context("password hashing task failed")?
    }

    async fn verify(&self, password: &str, phc: &str) -> Result<bool> {
        let params = self.params.clone();
        let password = password.to_string();
        let phc = phc.to_string();
        tokio::task::spawn_blocking(move || verify_blocking(&params, &password, &phc))
            .await
            .context("password verification task failed")?
    }

    fn dummy_hash(&self) -> &str {
        &self.dummy
    }
}

/// Low-cost parameters so unit tests stay fast.
#[cfg(test)]
pub(crate) fn test_hasher() -> Result<Argon2Passwords> {
    let params = Params::new(1024, 1, 1, None).map_err(|err| anyhow!("invalid params: {err}"))?;
    Argon2Passwords::with_params(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_then_verify() -> Result<()> {
        let hasher = test_hasher()?;
        let phc = hasher.hash("Secr3t!1").await?;
        assert!(phc.starts_with("$argon2id$"));
        assert!(hasher.verify("Secr3t!1", &phc).await?);
        assert!(!hasher.verify("wrong", &phc).await?);
        Ok(())
    }

    #[tokio::test]
    async fn same_password_gets_fresh_salt() -> Result<()> {
        let hasher = test_hasher()?;
        assert_ne!(hasher.hash("pw").await?, hasher.hash("pw").await?);
        Ok(())
    }

    #[tokio::test]
    async fn dummy_hash_is_parseable_and_rejects_input() -> Result<()> {
        let hasher = test_hasher()?;
        let dummy = hasher.dummy_hash().to_string();
        assert!(!hasher.verify("Secr3t!1", &dummy).await?);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_hash_is_an_error() -> Result<()> {
        let hasher = test_hasher()?;
        assert!(hasher.verify("pw", "not-a-phc").await.is_err());
        Ok(())
    }
}
