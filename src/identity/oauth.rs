//! Federated sign-in and account linking.
//!
//! A token is verified before anything is read or written. A verified
//! identity resolves, in order, to the account already holding its subject,
//! to the account with the same (verified) email, which then gets linked, or
//! to a pending link the caller must complete with a patient id.

use super::{
    clock::Clock,
    credentials::{
        InsertError, UserRecord, fetch_user_by_email, fetch_user_by_subject, insert_user,
        link_subject, normalize_email,
    },
    error::IdentityError,
    models::User,
    tokens::{generate_token, hash_token},
};
use crate::oidc::{TokenError, TokenVerifier};
use anyhow::{Context, anyhow};
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};

/// A verified identity with no local account yet. `ticket` is the only
/// copy of the handle; the store keeps its digest.
#[derive(Clone)]
pub struct PendingLink {
    pub ticket: String,
    pub email: String,
    pub name: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for PendingLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingLink")
            .field("ticket", &"[REDACTED]")
            .field("email", &self.email)
            .field("name", &self.name)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug)]
pub enum LinkOutcome {
    Linked(User),
    Pending(PendingLink),
}

/// Details supplied by the caller to finish a pending link. The subject
/// and email come from the ticket, never from the caller.
#[derive(Clone, Debug)]
pub struct CompleteLink {
    pub ticket: String,
    pub patient_id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Clone)]
pub struct OAuthLinker {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    verifier: Arc<dyn TokenVerifier>,
    audience: Option<String>,
    pending_ttl: TimeDelta,
}

impl OAuthLinker {
    #[must_use]
    pub fn new(
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
        verifier: Arc<dyn TokenVerifier>,
        audience: Option<String>,
        pending_ttl: TimeDelta,
    ) -> Self {
        Self {
            pool,
            clock,
            verifier,
            audience,
            pending_ttl,
        }
    }

    /// Verify `id_token` and resolve it to a local account.
    ///
    /// # Errors
    /// `TokenInvalid` if verification fails or federated sign-in is not
    /// configured, `IdentityMismatch` if the email belongs to an account
    /// linked to another subject.
    pub async fn sign_in_with_token(&self, id_token: &str) -> Result<LinkOutcome, IdentityError> {
        let Some(audience) = self.audience.as_deref() else {
            warn!("Federated sign-in attempted but no client id is configured");
            return Err(IdentityError::TokenInvalid);
        };

        let identity = match self.verifier.verify(id_token, audience).await {
            Ok(identity) => identity,
            Err(TokenError::Rejected(reason)) => {
                warn!("Identity token rejected: {reason}");
                return Err(IdentityError::TokenInvalid);
            }
            Err(TokenError::Unavailable(reason)) => {
                error!("Identity token could not be verified: {reason}");
                return Err(IdentityError::TokenInvalid);
            }
        };

        if let Some(user) = fetch_user_by_subject(&self.pool, &identity.subject).await? {
            info!(patient_id = %user.patient_id, "Federated sign-in");
            return Ok(LinkOutcome::Linked(user));
        }

        let now = self.clock.now_millis();
        if let Some(user) = fetch_user_by_email(&self.pool, &identity.email).await? {
            return match link_subject(&self.pool, &user.patient_id, &identity.subject, now).await {
                Ok(Some(linked)) => {
                    info!(patient_id = %linked.patient_id, "OAuth subject linked to existing account");
                    Ok(LinkOutcome::Linked(linked))
                }
                Ok(None) => {
                    warn!(patient_id = %user.patient_id, "Email already linked to a different subject");
                    Err(IdentityError::IdentityMismatch)
                }
                // The subject was linked elsewhere between our lookups.
                Err(InsertError::Duplicate) => {
                    match fetch_user_by_subject(&self.pool, &identity.subject).await? {
                        Some(user) => Ok(LinkOutcome::Linked(user)),
                        None => Err(IdentityError::IdentityMismatch),
                    }
                }
                Err(InsertError::Store(err)) => Err(err.into()),
            };
        }

        let pending = self
            .create_pending_link(&identity.subject, &identity.email, identity.name)
            .await?;
        Ok(LinkOutcome::Pending(pending))
    }

    async fn create_pending_link(
        &self,
        subject: &str,
        email: &str,
        name: Option<String>,
    ) -> anyhow::Result<PendingLink> {
        let email = normalize_email(email);
        let ticket = generate_token()?;
        let created = self.clock.now();
        let expires = created
            .checked_add_signed(self.pending_ttl)
            .ok_or_else(|| anyhow!("pending link expiry out of range"))?;

        let query = "INSERT INTO pending_links (ticket_hash, oauth_subject, email, name, created_at, expires_at) VALUES ($1, $2, $3, $4, $5, $6)";
        let span = info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(hash_token(&ticket))
            .bind(subject)
            .bind(&email)
            .bind(name.as_deref())
            .bind(created.timestamp_millis())
            .bind(expires.timestamp_millis())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert pending link")?;

        info!("Pending account link created");

        Ok(PendingLink {
            ticket,
            email,
            name,
            expires_at: expires,
        })
    }

    /// Consume a pending-link ticket and create (or link) the account.
    ///
    /// # Errors
    /// `TokenInvalid` for unknown, expired or used tickets;
    /// `DuplicateIdentity` if the patient id is taken, in which case the
    /// ticket stays usable; `IdentityMismatch` if the email now belongs to
    /// an account linked elsewhere.
    pub async fn complete_pending_link(&self, request: CompleteLink) -> Result<User, IdentityError> {
        let now = self.clock.now_millis();
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin pending link transaction")?;

        let query = "UPDATE pending_links SET consumed_at = $1 WHERE ticket_hash = $2 AND consumed_at IS NULL AND expires_at >= $1 RETURNING oauth_subject, email, name";
        let span = info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(now)
            .bind(hash_token(request.ticket.trim()))
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to consume pending link")?;

        let Some(row) = row else {
            warn!("Pending link ticket rejected");
            return Err(IdentityError::TokenInvalid);
        };

        let subject: String = row
            .try_get("oauth_subject")
            .context("failed to decode pending link subject")?;
        let email: String = row
            .try_get("email")
            .context("failed to decode pending link email")?;
        let provider_name: Option<String> = row
            .try_get("name")
            .context("failed to decode pending link name")?;

        if let Some(user) = fetch_user_by_subject(&mut *tx, &subject).await? {
            tx.commit().await.context("failed to commit pending link")?;
            return Ok(user);
        }

        if let Some(existing) = fetch_user_by_email(&mut *tx, &email).await? {
            let linked = match link_subject(&mut *tx, &existing.patient_id, &subject, now).await {
                Ok(Some(linked)) => linked,
                Ok(None) | Err(InsertError::Duplicate) => return Err(IdentityError::IdentityMismatch),
                Err(InsertError::Store(err)) => return Err(err.into()),
            };
            tx.commit().await.context("failed to commit pending link")?;
            info!(patient_id = %linked.patient_id, "OAuth subject linked to existing account");
            return Ok(linked);
        }

        let name = request
            .name
            .or(provider_name)
            .unwrap_or_else(|| email.clone());
        let record = UserRecord {
            patient_id: &request.patient_id,
            password_hash: None,
            name: &name,
            email: &email,
            phone: request.phone.as_deref(),
            oauth_subject: Some(&subject),
        };

        let user = match insert_user(&mut *tx, &record, now).await {
            Ok(user) => user,
            // Dropping the transaction rolls back the ticket consumption.
            Err(InsertError::Duplicate) => return Err(IdentityError::DuplicateIdentity),
            Err(InsertError::Store(err)) => return Err(err.into()),
        };

        tx.commit().await.context("failed to commit pending link")?;
        info!(patient_id = %user.patient_id, "OAuth-only account created");
        Ok(user)
    }

    /// Delete pending links that can no longer be completed.
    pub(crate) async fn purge(&self) -> anyhow::Result<u64> {
        let query = "DELETE FROM pending_links WHERE consumed_at IS NOT NULL OR expires_at < $1";
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
            .context("failed to purge pending links")?;
        Ok(result.rows_affected())
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.audience.is_some()
    }
}

impl std::fmt::Debug for OAuthLinker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthLinker")
            .field("audience", &self.audience)
            .field("pending_ttl", &self.pending_ttl)
            .finish_non_exhaustive()
    }
}
