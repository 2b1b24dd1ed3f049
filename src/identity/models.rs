use super::clock::from_millis;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Row, sqlite::SqliteRow};
use std::fmt;

/// A patient account.
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub patient_id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub oauth_subject: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub(crate) password_hash: Option<String>,
}

impl User {
    /// OAuth-only accounts have no password and can never log in with one.
    #[must_use]
    pub const fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("patient_id", &self.patient_id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("phone", &self.phone)
            .field("oauth_subject", &self.oauth_subject)
            .field("has_password", &self.has_password())
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl<'r> FromRow<'r, SqliteRow> for User {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            patient_id: row.try_get("patient_id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            oauth_subject: row.try_get("oauth_subject")?,
            created_at: from_millis(row.try_get("created_at")?),
            updated_at: from_millis(row.try_get("updated_at")?),
            password_hash: row.try_get("password_hash")?,
        })
    }
}

/// Lifecycle of an OTP record: `Issued -> Consumed` or `Issued -> Expired`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OtpState {
    Issued,
    Consumed,
    Expired,
}

impl OtpState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::Consumed => "consumed",
            Self::Expired => "expired",
        }
    }

    pub(crate) fn from_db(value: &str) -> Option<Self> {
        match value {
            "issued" => Some(Self::Issued),
            "consumed" => Some(Self::Consumed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// A live session handle. `token` is the only copy of the raw value; the
/// store keeps its SHA-256 digest.
#[derive(Clone)]
pub struct Session {
    pub token: String,
    pub patient_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"[REDACTED]")
            .field("patient_id", &self.patient_id)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Authenticated caller, threaded explicitly through profile and password
/// operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionContext {
    pub patient_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub(crate) token_hash: Vec<u8>,
}

/// A user with a freshly minted session.
#[derive(Clone, Debug)]
pub struct SignedIn {
    pub user: User,
    pub session: Session,
}
