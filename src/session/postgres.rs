//! Postgres-backed identity store.
//!
//! Rotation is a single conditional `UPDATE`; the row lock taken by postgres
//! makes two interleaved refreshes for the same identity serialize, and only
//! the first one still sees the presented hash.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::store::{
    IdentityRecord, IdentityStore, NewIdentity, RefreshSlot, RotateOutcome,
};
use crate::identity::Role;

#[derive(Clone, Debug)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn identity_from_row(row: &PgRow) -> Result<IdentityRecord> {
    let role: String = row.get("role");
    Ok(IdentityRecord {
        id: row.get("id"),
        email: row.get("email"),
        role: role.parse::<Role>().map_err(|err| anyhow!(err))?,
        email_confirmed: row.get("email_confirmed"),
        password_hash: row.get("password_hash"),
    })
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityRecord>> {
        let query =
            "SELECT id, email, role, email_confirmed, password_hash FROM identities WHERE email = $1";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup identity by email")?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<IdentityRecord>> {
        let query =
            "SELECT id, email, role, email_confirmed, password_hash FROM identities WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup identity by id")?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn insert_identity(&self, identity: NewIdentity) -> Result<Option<Uuid>> {
        let query = r"
            INSERT INTO identities (id, email, role, email_confirmed, password_hash)
            VALUES ($1, $2, $3, $4, $5)
        ";
        let id = Uuid::now_v7();
        let result = sqlx::query(query)
            .bind(id)
            .bind(&identity.email)
            .bind(identity.role.as_str())
            .bind(identity.email_confirmed)
            .bind(&identity.password_hash)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(Some(id)),
            Err(err) if is_unique_violation(&err) => Ok(None),
            Err(err) => Err(err).context("failed to insert identity"),
        }
    }

    async fn refresh_slot(&self, id: Uuid) -> Result<Option<RefreshSlot>> {
        let query = r"
            SELECT refresh_hash, refresh_expires_at FROM identities
            WHERE id = $1 AND refresh_hash IS NOT NULL AND refresh_expires_at IS NOT NULL
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load refresh slot")?;
        Ok(row.map(|row| RefreshSlot {
            hash: row.get("refresh_hash"),
            expires_at: row.get("refresh_expires_at"),
        }))
    }

    async fn store_refresh(&self, id: Uuid, slot: RefreshSlot) -> Result<()> {
        let query = r"
            UPDATE identities
            SET refresh_hash = $2, refresh_expires_at = $3, updated_at = NOW()
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(id)
            .bind(slot.hash)
            .bind(slot.expires_at)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to store refresh slot")?;
        Ok(())
    }

    async fn rotate_refresh(
        &self,
        id: Uuid,
        expected_hash: &[u8],
        next: RefreshSlot,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome> {
        let query = r"
            UPDATE identities
            SET refresh_hash = $3, refresh_expires_at = $4, updated_at = NOW()
            WHERE id = $1 AND refresh_hash = $2 AND refresh_expires_at > $5
        ";
        let result = sqlx::query(query)
            .bind(id)
            .bind(expected_hash)
            .bind(next.hash)
            .bind(next.expires_at)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to rotate refresh slot")?;

        Ok(if result.rows_affected() == 1 {
            RotateOutcome::Rotated
        } else {
            RotateOutcome::Stale
        })
    }

    async fn clear_refresh(&self, id: Uuid) -> Result<()> {
        let query = r"
            UPDATE identities
            SET refresh_hash = NULL, refresh_expires_at = NULL, updated_at = NOW()
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to clear refresh slot")?;
        Ok(())
    }
}
