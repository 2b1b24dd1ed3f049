//! Durable user records and password verification.

use super::{
    clock::Clock,
    error::IdentityError,
    models::User,
    password::{hash_password, verify_password},
    session::revoke_patient_sessions,
};
use crate::store::is_unique_violation;
use anyhow::Context;
use secrecy::SecretString;
use sqlx::{Row, SqliteConnection, SqliteExecutor, SqlitePool};
use std::sync::Arc;
use tracing::{Instrument, info, info_span, warn};

const USER_COLUMNS: &str =
    "patient_id, password_hash, name, email, phone, oauth_subject, created_at, updated_at";

/// Canonical form of an email address: trimmed and lowercased. Every
/// insert and lookup goes through it.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Input for [`CredentialStore::create_user`]. Fields are expected to be
/// validated and normalized by the caller.
pub struct NewUser {
    pub patient_id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password: SecretString,
}

/// Which sessions survive a password update.
#[derive(Debug)]
pub(crate) enum Revocation<'a> {
    All,
    AllExcept(&'a [u8]),
}

#[derive(Clone, Debug)]
pub struct CredentialStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl CredentialStore {
    #[must_use]
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Create a password account.
    ///
    /// # Errors
    /// `DuplicateIdentity` if the patient id or email is taken.
    pub async fn create_user(&self, new_user: NewUser) -> Result<User, IdentityError> {
        if fetch_user_by_id(&self.pool, &new_user.patient_id)
            .await?
            .is_some()
        {
            return Err(IdentityError::DuplicateIdentity);
        }

        let password_hash = hash_password(new_user.password).await?;
        let now = self.clock.now_millis();
        let record = UserRecord {
            patient_id: &new_user.patient_id,
            password_hash: Some(&password_hash),
            name: &new_user.name,
            email: &new_user.email,
            phone: new_user.phone.as_deref(),
            oauth_subject: None,
        };

        match insert_user(&self.pool, &record, now).await {
            Ok(user) => {
                info!(patient_id = %user.patient_id, "User created");
                Ok(user)
            }
            Err(InsertError::Duplicate) => Err(IdentityError::DuplicateIdentity),
            Err(InsertError::Store(err)) => Err(err.into()),
        }
    }

    /// Check a password. Unknown ids pay the same hashing cost and then
    /// fail with `NotFound`; OAuth-only accounts verify as `false`.
    ///
    /// # Errors
    /// `NotFound` for unknown ids, `StoreUnavailable` on storage failure.
    pub async fn verify_credentials(
        &self,
        patient_id: &str,
        password: SecretString,
    ) -> Result<bool, IdentityError> {
        match fetch_user_by_id(&self.pool, patient_id).await? {
            Some(user) => Ok(verify_password(password, user.password_hash).await?),
            None => {
                verify_password(password, None).await?;
                Err(IdentityError::NotFound)
            }
        }
    }

    /// Replace the password hash and revoke sessions in one transaction.
    ///
    /// Only reachable through a reset grant or an authenticated session.
    pub(crate) async fn update_password(
        &self,
        patient_id: &str,
        password: SecretString,
        revocation: Revocation<'_>,
    ) -> Result<(), IdentityError> {
        let password_hash = hash_password(password).await?;
        let now = self.clock.now_millis();

        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin password update transaction")?;

        let except = match revocation {
            Revocation::All => None,
            Revocation::AllExcept(token_hash) => Some(token_hash),
        };
        let revoked = replace_password_hash(&mut *tx, patient_id, &password_hash, now, except).await?;

        tx.commit()
            .await
            .context("failed to commit password update")?;

        info!(patient_id, revoked_sessions = revoked, "Password updated");
        Ok(())
    }

    /// # Errors
    /// `StoreUnavailable` on storage failure.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, IdentityError> {
        Ok(fetch_user_by_email(&self.pool, email).await?)
    }

    /// # Errors
    /// `StoreUnavailable` on storage failure.
    pub async fn find_by_id(&self, patient_id: &str) -> Result<Option<User>, IdentityError> {
        Ok(fetch_user_by_id(&self.pool, patient_id).await?)
    }

    /// Next id in the `P0001`, `P0002`, ... sequence. Advisory only: a
    /// concurrent signup may take it first, and `create_user` still decides.
    ///
    /// # Errors
    /// `StoreUnavailable` on storage failure.
    pub async fn allocate_patient_id(&self) -> Result<String, IdentityError> {
        let query = "SELECT MAX(CAST(SUBSTR(patient_id, 2) AS INTEGER)) AS highest FROM users WHERE patient_id GLOB 'P[0-9]*'";
        let span = info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to read highest patient id")?;
        let highest: Option<i64> = row
            .try_get("highest")
            .context("failed to decode highest patient id")?;
        Ok(format_patient_id(highest.unwrap_or(0) + 1))
    }
}

fn format_patient_id(sequence: i64) -> String {
    format!("P{sequence:04}")
}

pub(crate) struct UserRecord<'a> {
    pub patient_id: &'a str,
    pub password_hash: Option<&'a str>,
    pub name: &'a str,
    pub email: &'a str,
    pub phone: Option<&'a str>,
    pub oauth_subject: Option<&'a str>,
}

#[derive(Debug)]
pub(crate) enum InsertError {
    Duplicate,
    Store(anyhow::Error),
}

/// Store a new password hash and revoke the patient's sessions on one
/// connection, normally inside the caller's transaction.
///
/// # Errors
/// `NotFound` if the patient does not exist.
pub(crate) async fn replace_password_hash(
    conn: &mut SqliteConnection,
    patient_id: &str,
    password_hash: &str,
    now: i64,
    except: Option<&[u8]>,
) -> Result<u64, IdentityError> {
    let query = "UPDATE users SET password_hash = $1, updated_at = $2 WHERE patient_id = $3";
    let span = info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(password_hash)
        .bind(now)
        .bind(patient_id)
        .execute(&mut *conn)
        .instrument(span)
        .await
        .context("failed to update password hash")?;

    if result.rows_affected() == 0 {
        return Err(IdentityError::NotFound);
    }

    Ok(revoke_patient_sessions(&mut *conn, patient_id, except).await?)
}

pub(crate) async fn insert_user<'e, E>(
    executor: E,
    record: &UserRecord<'_>,
    now: i64,
) -> Result<User, InsertError>
where
    E: SqliteExecutor<'e>,
{
    let query = format!(
        "INSERT INTO users ({USER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $7) RETURNING {USER_COLUMNS}"
    );
    let span = info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    sqlx::query_as::<_, User>(&query)
        .bind(record.patient_id)
        .bind(record.password_hash)
        .bind(record.name)
        .bind(normalize_email(record.email))
        .bind(record.phone)
        .bind(record.oauth_subject)
        .bind(now)
        .fetch_one(executor)
        .instrument(span)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                warn!(patient_id = record.patient_id, "Duplicate patient identity rejected");
                InsertError::Duplicate
            } else {
                InsertError::Store(anyhow::Error::new(err).context("failed to insert user"))
            }
        })
}

pub(crate) async fn fetch_user_by_id<'e, E>(
    executor: E,
    patient_id: &str,
) -> anyhow::Result<Option<User>>
where
    E: SqliteExecutor<'e>,
{
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE patient_id = $1");
    let span = info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    sqlx::query_as::<_, User>(&query)
        .bind(patient_id)
        .fetch_optional(executor)
        .instrument(span)
        .await
        .context("failed to lookup user by patient id")
}

pub(crate) async fn fetch_user_by_email<'e, E>(
    executor: E,
    email: &str,
) -> anyhow::Result<Option<User>>
where
    E: SqliteExecutor<'e>,
{
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
    let span = info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    sqlx::query_as::<_, User>(&query)
        .bind(normalize_email(email))
        .fetch_optional(executor)
        .instrument(span)
        .await
        .context("failed to lookup user by email")
}

pub(crate) async fn fetch_user_by_subject<'e, E>(
    executor: E,
    subject: &str,
) -> anyhow::Result<Option<User>>
where
    E: SqliteExecutor<'e>,
{
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE oauth_subject = $1");
    let span = info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    sqlx::query_as::<_, User>(&query)
        .bind(subject)
        .fetch_optional(executor)
        .instrument(span)
        .await
        .context("failed to lookup user by oauth subject")
}

/// Attach `subject` to the account, unless it is already linked to a
/// different subject. Returns the updated user, or `None` when the account
/// is linked elsewhere.
pub(crate) async fn link_subject<'e, E>(
    executor: E,
    patient_id: &str,
    subject: &str,
    now: i64,
) -> Result<Option<User>, InsertError>
where
    E: SqliteExecutor<'e>,
{
    let query = format!(
        "UPDATE users SET oauth_subject = $1, updated_at = $2 WHERE patient_id = $3 AND (oauth_subject IS NULL OR oauth_subject = $1) RETURNING {USER_COLUMNS}"
    );
    let span = info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "UPDATE",
        db.statement = query.as_str()
    );
    sqlx::query_as::<_, User>(&query)
        .bind(subject)
        .bind(now)
        .bind(patient_id)
        .fetch_optional(executor)
        .instrument(span)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                InsertError::Duplicate
            } else {
                InsertError::Store(anyhow::Error::new(err).context("failed to link oauth subject"))
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{identity::clock::SystemClock, store::connect_in_memory};
    use anyhow::Result;

    fn new_user(patient_id: &str, email: &str) -> NewUser {
        NewUser {
            patient_id: patient_id.to_string(),
            name: "Test Patient".to_string(),
            email: email.to_string(),
            phone: Some("+977 9812345678".to_string()),
            password: SecretString::from("s3cret-password"),
        }
    }

    async fn store() -> Result<CredentialStore> {
        Ok(CredentialStore::new(
            connect_in_memory().await?,
            Arc::new(SystemClock),
        ))
    }

    #[test]
    fn patient_ids_are_zero_padded() {
        assert_eq!(format_patient_id(1), "P0001");
        assert_eq!(format_patient_id(42), "P0042");
        assert_eq!(format_patient_id(12345), "P12345");
    }

    #[tokio::test]
    async fn create_user_once() -> Result<()> {
        let store = store().await?;
        let user = store
            .create_user(new_user("P0001", "a@example.com"))
            .await?;
        assert_eq!(user.patient_id, "P0001");
        assert!(user.has_password());
        assert_eq!(user.phone.as_deref(), Some("+977 9812345678"));

        let again = store
            .create_user(new_user("P0001", "other@example.com"))
            .await;
        assert!(matches!(again, Err(IdentityError::DuplicateIdentity)));
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_email_rejected() -> Result<()> {
        let store = store().await?;
        store
            .create_user(new_user("P0001", "a@example.com"))
            .await?;
        let result = store
            .create_user(new_user("P0002", "a@example.com"))
            .await;
        assert!(matches!(result, Err(IdentityError::DuplicateIdentity)));
        assert!(store.find_by_id("P0002").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn emails_are_stored_and_matched_case_insensitively() -> Result<()> {
        let store = store().await?;
        let user = store
            .create_user(new_user("P0001", "  Asha.Patient@Example.COM "))
            .await?;
        assert_eq!(user.email, "asha.patient@example.com");

        let found = store.find_by_email("ASHA.PATIENT@example.com").await?;
        assert_eq!(found.map(|user| user.patient_id), Some("P0001".to_string()));

        let result = store
            .create_user(new_user("P0002", "asha.patient@EXAMPLE.com"))
            .await;
        assert!(matches!(result, Err(IdentityError::DuplicateIdentity)));
        Ok(())
    }

    #[tokio::test]
    async fn verify_credentials_outcomes() -> Result<()> {
        let store = store().await?;
        store
            .create_user(new_user("P0001", "a@example.com"))
            .await?;

        assert!(
            store
                .verify_credentials("P0001", SecretString::from("s3cret-password"))
                .await?
        );
        assert!(
            !store
                .verify_credentials("P0001", SecretString::from("wrong"))
                .await?
        );
        let unknown = store
            .verify_credentials("P9999", SecretString::from("s3cret-password"))
            .await;
        assert!(matches!(unknown, Err(IdentityError::NotFound)));
        Ok(())
    }

    #[tokio::test]
    async fn allocate_follows_sequence() -> Result<()> {
        let store = store().await?;
        assert_eq!(store.allocate_patient_id().await?, "P0001");

        store
            .create_user(new_user("P0001", "a@example.com"))
            .await?;
        store
            .create_user(new_user("CUSTOM-7", "b@example.com"))
            .await?;
        store
            .create_user(new_user("P0009", "c@example.com"))
            .await?;
        assert_eq!(store.allocate_patient_id().await?, "P0010");
        Ok(())
    }

    #[tokio::test]
    async fn update_password_replaces_hash() -> Result<()> {
        let store = store().await?;
        store
            .create_user(new_user("P0001", "a@example.com"))
            .await?;
        store
            .update_password("P0001", SecretString::from("new-password-1"), Revocation::All)
            .await?;

        assert!(
            !store
                .verify_credentials("P0001", SecretString::from("s3cret-password"))
                .await?
        );
        assert!(
            store
                .verify_credentials("P0001", SecretString::from("new-password-1"))
                .await?
        );

        let missing = store
            .update_password("P0404", SecretString::from("whatever1"), Revocation::All)
            .await;
        assert!(matches!(missing, Err(IdentityError::NotFound)));
        Ok(())
    }

    #[tokio::test]
    async fn link_subject_is_idempotent() -> Result<()> {
        let store = store().await?;
        store
            .create_user(new_user("P0001", "a@example.com"))
            .await?;

        let first = link_subject(&store.pool, "P0001", "google-sub-1", 1).await;
        assert!(matches!(first, Ok(Some(_))));
        let again = link_subject(&store.pool, "P0001", "google-sub-1", 2).await;
        assert!(matches!(again, Ok(Some(_))));
        let other = link_subject(&store.pool, "P0001", "google-sub-2", 3).await;
        assert!(matches!(other, Ok(None)));

        let linked = fetch_user_by_subject(&store.pool, "google-sub-1").await?;
        assert_eq!(linked.map(|user| user.patient_id), Some("P0001".to_string()));
        Ok(())
    }
}
