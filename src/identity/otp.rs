//! One-time passwords for password reset.
//!
//! Per patient the record moves `Issued -> Consumed` or `Issued -> Expired`.
//! Issuing a new code expires the previous one; acceptance is a single
//! conditional `UPDATE`, so a code is consumed at most once even under
//! concurrent verification. Wrong guesses count against the live code, which
//! expires after [`MAX_OTP_ATTEMPTS`] of them.

use super::{
    clock::{Clock, from_millis},
    credentials::{CredentialStore, normalize_email, replace_password_hash},
    error::IdentityError,
    models::OtpState,
    password::hash_password,
    tokens::{generate_otp_code, hash_token},
};
use crate::email::{EmailDispatcher, EmailMessage};
use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};
use secrecy::SecretString;
use sqlx::{Row, SqliteExecutor, SqlitePool};
use std::sync::Arc;
use tracing::{Instrument, info, info_span, warn};

/// Fixed validity window of every code.
pub const OTP_TTL_MINUTES: i64 = 10;

/// Wrong guesses tolerated before the live code is expired.
pub const MAX_OTP_ATTEMPTS: i64 = 5;

/// Proof that an OTP was accepted. Not `Clone`: spending it on a password
/// reset consumes it.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct PasswordResetGrant {
    patient_id: String,
    otp_id: i64,
}

impl PasswordResetGrant {
    #[must_use]
    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub(crate) fn into_patient_id(self) -> String {
        self.patient_id
    }
}

/// Result of checking a submitted code.
#[derive(Debug, PartialEq, Eq)]
pub enum OtpOutcome {
    Accepted(PasswordResetGrant),
    Expired,
    Invalid,
    AlreadyConsumed,
    NotFound,
}

impl OtpOutcome {
    /// Turn anything but `Accepted` into the matching error.
    ///
    /// # Errors
    /// The error variant for the rejected outcome.
    pub fn into_grant(self) -> Result<PasswordResetGrant, IdentityError> {
        match self {
            Self::Accepted(grant) => Ok(grant),
            Self::Expired => Err(IdentityError::OtpExpired),
            Self::Invalid => Err(IdentityError::OtpInvalid),
            Self::AlreadyConsumed => Err(IdentityError::OtpAlreadyConsumed),
            Self::NotFound => Err(IdentityError::NotFound),
        }
    }

    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Failed(String),
}

/// What the caller learns about an issued code. The code itself is never
/// returned.
#[derive(Clone, Debug)]
pub struct OtpReceipt {
    pub patient_id: String,
    pub expires_at: DateTime<Utc>,
    pub delivery: Delivery,
}

#[derive(Clone)]
pub struct OtpService {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    credentials: CredentialStore,
    dispatcher: Arc<dyn EmailDispatcher>,
    subject: String,
}

impl OtpService {
    #[must_use]
    pub fn new(
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
        credentials: CredentialStore,
        dispatcher: Arc<dyn EmailDispatcher>,
        subject: String,
    ) -> Self {
        Self {
            pool,
            clock,
            credentials,
            dispatcher,
            subject,
        }
    }

    /// Issue a code for `patient_id` and email it.
    ///
    /// The record is committed before the email goes out; a failed delivery
    /// is reported in the receipt and leaves the code valid.
    ///
    /// # Errors
    /// `IdentityMismatch` if the patient is unknown or the email does not
    /// match; nothing is issued in that case.
    pub async fn request_otp(
        &self,
        email: &str,
        patient_id: &str,
    ) -> Result<OtpReceipt, IdentityError> {
        let user = self
            .credentials
            .find_by_id(patient_id)
            .await?
            .filter(|user| user.email == normalize_email(email));
        let Some(user) = user else {
            warn!(patient_id, "OTP request rejected: identity mismatch");
            return Err(IdentityError::IdentityMismatch);
        };

        let code = generate_otp_code();
        let issued = self.clock.now();
        let expires = issued + TimeDelta::minutes(OTP_TTL_MINUTES);

        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin OTP transaction")?;

        let query = "UPDATE otp_records SET state = 'expired' WHERE patient_id = $1 AND state = 'issued'";
        let span = info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&user.patient_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to expire previous OTP")?;

        let query = "INSERT INTO otp_records (patient_id, email, code_hash, issued_at, expires_at, state) VALUES ($1, $2, $3, $4, $5, 'issued')";
        let span = info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&user.patient_id)
            .bind(&user.email)
            .bind(hash_token(&code))
            .bind(issued.timestamp_millis())
            .bind(expires.timestamp_millis())
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert OTP record")?;

        tx.commit().await.context("failed to commit OTP")?;

        info!(patient_id = %user.patient_id, "OTP issued");

        let message = otp_message(&user.email, &self.subject, &code);
        let delivery = match self.dispatcher.send(&message).await {
            Ok(()) => Delivery::Sent,
            Err(err) => {
                warn!(patient_id = %user.patient_id, "OTP email delivery failed: {err:#}");
                Delivery::Failed(err.to_string())
            }
        };

        Ok(OtpReceipt {
            patient_id: user.patient_id,
            expires_at: expires,
            delivery,
        })
    }

    /// Check a submitted code and consume it if it is live.
    ///
    /// # Errors
    /// `StoreUnavailable` on storage failure; rejections are outcomes.
    pub async fn verify_otp(
        &self,
        patient_id: &str,
        code: &str,
    ) -> Result<OtpOutcome, IdentityError> {
        let code_hash = hash_token(code.trim());
        let now = self.clock.now_millis();

        if let Some(otp_id) = consume_live_code(&self.pool, patient_id, &code_hash, now).await? {
            info!(patient_id, "OTP accepted");
            return Ok(OtpOutcome::Accepted(PasswordResetGrant {
                patient_id: patient_id.to_string(),
                otp_id,
            }));
        }

        self.reject(patient_id, &code_hash, now).await
    }

    /// Consume a live code and store the new password in one transaction.
    /// If the password cannot be stored the code stays live.
    ///
    /// # Errors
    /// The error matching a rejected code, `NotFound` if the account is
    /// gone, `StoreUnavailable` on storage failure.
    pub async fn reset_password(
        &self,
        patient_id: &str,
        code: &str,
        new_password: SecretString,
    ) -> Result<(), IdentityError> {
        let password_hash = hash_password(new_password).await?;
        let code_hash = hash_token(code.trim());
        let now = self.clock.now_millis();

        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin OTP reset transaction")?;

        let Some(otp_id) = consume_live_code(&mut *tx, patient_id, &code_hash, now).await? else {
            tx.rollback()
                .await
                .context("failed to roll back OTP reset")?;
            return self
                .reject(patient_id, &code_hash, now)
                .await?
                .into_grant()
                .map(drop);
        };

        let revoked = replace_password_hash(&mut *tx, patient_id, &password_hash, now, None).await?;

        tx.commit().await.context("failed to commit OTP reset")?;

        info!(patient_id, otp_id, revoked_sessions = revoked, "Password reset with OTP");
        Ok(())
    }

    async fn reject(
        &self,
        patient_id: &str,
        code_hash: &[u8],
        now: i64,
    ) -> Result<OtpOutcome, IdentityError> {
        let locked = self.record_failed_attempt(patient_id, code_hash).await?;
        let outcome = self.classify_rejection(patient_id, code_hash, now).await?;
        warn!(patient_id, outcome = ?outcome, "OTP rejected");
        if locked {
            warn!(patient_id, "OTP expired after too many failed attempts");
        }
        Ok(outcome)
    }

    /// Count a guess that does not match the live code. Returns `true` when
    /// this guess used up the last attempt.
    async fn record_failed_attempt(
        &self,
        patient_id: &str,
        code_hash: &[u8],
    ) -> anyhow::Result<bool> {
        let query = "UPDATE otp_records SET failed_attempts = failed_attempts + 1, state = CASE WHEN failed_attempts + 1 >= $1 THEN 'expired' ELSE state END WHERE patient_id = $2 AND state = 'issued' AND code_hash <> $3 RETURNING state";
        let span = info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(MAX_OTP_ATTEMPTS)
            .bind(patient_id)
            .bind(code_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to record OTP attempt")?;

        let Some(row) = row else {
            return Ok(false);
        };
        let state: String = row.try_get("state").context("failed to decode OTP state")?;
        Ok(OtpState::from_db(&state) == Some(OtpState::Expired))
    }

    async fn classify_rejection(
        &self,
        patient_id: &str,
        code_hash: &[u8],
        now: i64,
    ) -> anyhow::Result<OtpOutcome> {
        let query = "SELECT id, state, expires_at FROM otp_records WHERE patient_id = $1 AND code_hash = $2 ORDER BY id DESC LIMIT 1";
        let span = info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(patient_id)
            .bind(code_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup OTP record")?;

        let Some(row) = row else {
            return if self.has_any_record(patient_id).await? {
                Ok(OtpOutcome::Invalid)
            } else {
                Ok(OtpOutcome::NotFound)
            };
        };

        let id: i64 = row.try_get("id").context("failed to decode OTP id")?;
        let state: String = row.try_get("state").context("failed to decode OTP state")?;
        let expires_at: i64 = row
            .try_get("expires_at")
            .context("failed to decode OTP expiry")?;

        match OtpState::from_db(&state) {
            Some(OtpState::Consumed) => Ok(OtpOutcome::AlreadyConsumed),
            Some(OtpState::Expired) => Ok(OtpOutcome::Expired),
            Some(OtpState::Issued) if expires_at < now => {
                self.mark_expired(id).await?;
                info!(
                    patient_id,
                    expired_at = %from_millis(expires_at),
                    "OTP expired"
                );
                Ok(OtpOutcome::Expired)
            }
            // Lost a race with a concurrent issue/consume between the two statements.
            Some(OtpState::Issued) => Ok(OtpOutcome::Invalid),
            None => Err(anyhow::anyhow!("unknown OTP state in database: {state}")),
        }
    }

    async fn has_any_record(&self, patient_id: &str) -> anyhow::Result<bool> {
        let query = "SELECT 1 FROM otp_records WHERE patient_id = $1 LIMIT 1";
        let span = info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(patient_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup OTP records")?;
        Ok(row.is_some())
    }

    async fn mark_expired(&self, id: i64) -> anyhow::Result<()> {
        let query = "UPDATE otp_records SET state = 'expired' WHERE id = $1 AND state = 'issued'";
        let span = info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to expire OTP")?;
        Ok(())
    }

    /// Delete non-issued records older than `retention`.
    pub(crate) async fn purge(&self, retention: TimeDelta) -> anyhow::Result<u64> {
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(retention)
            .map_or(i64::MIN, |cutoff| cutoff.timestamp_millis());
        let query = "DELETE FROM otp_records WHERE state <> 'issued' AND issued_at < $1";
        let span = info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge OTP records")?;
        Ok(result.rows_affected())
    }
}

impl std::fmt::Debug for OtpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpService")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

/// Compare-and-set: only one caller can move an issued record to consumed.
async fn consume_live_code<'e, E>(
    executor: E,
    patient_id: &str,
    code_hash: &[u8],
    now: i64,
) -> anyhow::Result<Option<i64>>
where
    E: SqliteExecutor<'e>,
{
    let query = "UPDATE otp_records SET state = 'consumed', consumed_at = $1 WHERE patient_id = $2 AND code_hash = $3 AND state = 'issued' AND expires_at >= $1 RETURNING id";
    let span = info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(now)
        .bind(patient_id)
        .bind(code_hash)
        .fetch_optional(executor)
        .instrument(span)
        .await
        .context("failed to consume OTP")?;

    row.map(|row| row.try_get::<i64, _>("id").context("failed to decode OTP id"))
        .transpose()
}

fn otp_message(to: &str, subject: &str, code: &str) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: subject.to_string(),
        body: format!(
            "Your one-time password is {code}. It expires in {OTP_TTL_MINUTES} minutes."
        ),
    }
}

impl PasswordResetGrant {
    #[cfg(test)]
    pub(crate) fn for_tests(patient_id: &str) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            otp_id: 0,
        }
    }

    pub(crate) const fn otp_id(&self) -> i64 {
        self.otp_id
    }
}
