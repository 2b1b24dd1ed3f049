//! Session issuance, validation and revocation.
//!
//! Sessions live for a fixed TTL measured from creation. `last_seen_at` is
//! recorded on every validation but never extends the expiry.

use super::{
    clock::{Clock, from_millis},
    credentials::CredentialStore,
    error::IdentityError,
    models::{Session, SessionContext},
    tokens::{generate_token, hash_token},
};
use crate::store::is_unique_violation;
use anyhow::{Context, anyhow};
use chrono::TimeDelta;
use secrecy::SecretString;
use sqlx::{Row, SqliteExecutor, SqlitePool};
use std::sync::Arc;
use tracing::{Instrument, info, info_span, warn};

const SESSION_INSERT_ATTEMPTS: usize = 3;

#[derive(Clone, Debug)]
pub struct SessionManager {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    credentials: CredentialStore,
    ttl: TimeDelta,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
        credentials: CredentialStore,
        ttl: TimeDelta,
    ) -> Self {
        Self {
            pool,
            clock,
            credentials,
            ttl,
        }
    }

    /// Password login. Unknown ids and wrong passwords are indistinguishable.
    ///
    /// # Errors
    /// `InvalidCredentials` on any mismatch, `StoreUnavailable` on storage failure.
    pub async fn login(
        &self,
        patient_id: &str,
        password: SecretString,
    ) -> Result<Session, IdentityError> {
        match self
            .credentials
            .verify_credentials(patient_id, password)
            .await
        {
            Ok(true) => self.issue(patient_id).await,
            Ok(false) | Err(IdentityError::NotFound) => {
                warn!(patient_id, "Login rejected");
                Err(IdentityError::InvalidCredentials)
            }
            Err(err) => Err(err),
        }
    }

    /// Mint a session for an already authenticated patient.
    pub(crate) async fn issue(&self, patient_id: &str) -> Result<Session, IdentityError> {
        let created = self.clock.now();
        let expires = created
            .checked_add_signed(self.ttl)
            .ok_or_else(|| anyhow!("session expiry out of range"))?;
        let query = "INSERT INTO sessions (token_hash, patient_id, created_at, last_seen_at, expires_at, valid) VALUES ($1, $2, $3, $3, $4, 1)";

        // Retry only on a token hash collision.
        for _ in 0..SESSION_INSERT_ATTEMPTS {
            let token = generate_token()?;
            let token_hash = hash_token(&token);
            let span = info_span!(
                "db.query",
                db.system = "sqlite",
                db.operation = "INSERT",
                db.statement = query
            );
            let result = sqlx::query(query)
                .bind(&token_hash)
                .bind(patient_id)
                .bind(created.timestamp_millis())
                .bind(expires.timestamp_millis())
                .execute(&self.pool)
                .instrument(span)
                .await;

            match result {
                Ok(_) => {
                    info!(patient_id, "Session issued");
                    return Ok(Session {
                        token,
                        patient_id: patient_id.to_string(),
                        created_at: created,
                        expires_at: expires,
                    });
                }
                Err(err) if is_unique_violation(&err) => continue,
                Err(err) => {
                    return Err(anyhow::Error::new(err)
                        .context("failed to insert session")
                        .into());
                }
            }
        }

        Err(anyhow!("failed to generate unique session token").into())
    }

    /// Resolve a token into its session. `None` for unknown, expired or
    /// revoked tokens.
    ///
    /// # Errors
    /// `StoreUnavailable` on storage failure.
    pub async fn validate(&self, token: &str) -> Result<Option<SessionContext>, IdentityError> {
        let token_hash = hash_token(token);
        let now = self.clock.now_millis();

        let query = "UPDATE sessions SET last_seen_at = $1 WHERE token_hash = $2 AND valid = 1 AND expires_at > $1 RETURNING patient_id, created_at, expires_at";
        let span = info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(now)
            .bind(&token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(SessionContext {
            patient_id: row
                .try_get("patient_id")
                .context("failed to decode session patient id")?,
            created_at: from_millis(
                row.try_get("created_at")
                    .context("failed to decode session created_at")?,
            ),
            expires_at: from_millis(
                row.try_get("expires_at")
                    .context("failed to decode session expires_at")?,
            ),
            token_hash,
        }))
    }

    /// Permanently invalidate a token. Unknown tokens are ignored.
    ///
    /// # Errors
    /// `StoreUnavailable` on storage failure.
    pub async fn logout(&self, token: &str) -> Result<(), IdentityError> {
        let token_hash = hash_token(token);
        let query = "UPDATE sessions SET valid = 0 WHERE token_hash = $1 AND valid = 1";
        let span = info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(&token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke session")?;

        if result.rows_affected() > 0 {
            info!("Session revoked");
        }
        Ok(())
    }

    /// Revoke every session of a patient, optionally sparing one.
    ///
    /// # Errors
    /// `StoreUnavailable` on storage failure.
    pub async fn revoke_all(
        &self,
        patient_id: &str,
        except: Option<&SessionContext>,
    ) -> Result<u64, IdentityError> {
        let except = except.map(|ctx| ctx.token_hash.as_slice());
        Ok(revoke_patient_sessions(&self.pool, patient_id, except).await?)
    }

    /// Delete sessions that can never validate again.
    pub(crate) async fn purge(&self) -> anyhow::Result<u64> {
        let query = "DELETE FROM sessions WHERE valid = 0 OR expires_at <= $1";
        let span = info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(self.clock.now_millis())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge sessions")?;
        Ok(result.rows_affected())
    }
}

pub(crate) async fn revoke_patient_sessions<'e, E>(
    executor: E,
    patient_id: &str,
    except: Option<&[u8]>,
) -> anyhow::Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let query = "UPDATE sessions SET valid = 0 WHERE patient_id = $1 AND valid = 1 AND ($2 IS NULL OR token_hash <> $2)";
    let span = info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(patient_id)
        .bind(except)
        .execute(executor)
        .instrument(span)
        .await
        .context("failed to revoke patient sessions")?;
    Ok(result.rows_affected())
}
