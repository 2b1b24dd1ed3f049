//! Identity core: credentials, OTP reset, sessions and federated sign-in.
//!
//! [`IdentityService`] is the operation surface used by the HTTP layer. It
//! composes the four components and owns the policies that span them:
//! password changes revoke sessions, and an OTP reset grant authorizes
//! exactly one password update.

pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod maintenance;
pub mod models;
pub mod oauth;
pub mod otp;
pub mod session;

mod password;
mod tokens;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::IdentityConfig;
pub use credentials::{CredentialStore, NewUser, normalize_email};
pub use error::IdentityError;
pub use maintenance::{PurgeReport, spawn_maintenance_worker};
pub use models::{OtpState, Session, SessionContext, SignedIn, User};
pub use oauth::{CompleteLink, LinkOutcome, OAuthLinker, PendingLink};
pub use otp::{
    Delivery, MAX_OTP_ATTEMPTS, OTP_TTL_MINUTES, OtpOutcome, OtpReceipt, OtpService,
    PasswordResetGrant,
};
pub use session::SessionManager;

use crate::{email::EmailDispatcher, oidc::TokenVerifier};
use credentials::Revocation;
use secrecy::SecretString;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

/// Outcome of a federated sign-in.
#[derive(Debug)]
pub enum SignIn {
    SignedIn(SignedIn),
    PendingLink(PendingLink),
}

impl SignIn {
    /// # Errors
    /// `PendingLink` if the identity still needs a local account.
    pub fn into_signed_in(self) -> Result<SignedIn, IdentityError> {
        match self {
            Self::SignedIn(signed_in) => Ok(signed_in),
            Self::PendingLink(_) => Err(IdentityError::PendingLink),
        }
    }
}

#[derive(Clone, Debug)]
pub struct IdentityService {
    config: IdentityConfig,
    credentials: CredentialStore,
    otp: OtpService,
    sessions: SessionManager,
    oauth: OAuthLinker,
}

impl IdentityService {
    #[must_use]
    pub fn new(
        pool: SqlitePool,
        config: IdentityConfig,
        dispatcher: Arc<dyn EmailDispatcher>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        Self::with_clock(pool, config, dispatcher, verifier, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(
        pool: SqlitePool,
        config: IdentityConfig,
        dispatcher: Arc<dyn EmailDispatcher>,
        verifier: Arc<dyn TokenVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let credentials = CredentialStore::new(pool.clone(), clock.clone());
        let otp = OtpService::new(
            pool.clone(),
            clock.clone(),
            credentials.clone(),
            dispatcher,
            config.otp_email_subject().to_string(),
        );
        let sessions = SessionManager::new(
            pool.clone(),
            clock.clone(),
            credentials.clone(),
            config.session_ttl(),
        );
        let oauth = OAuthLinker::new(
            pool,
            clock,
            verifier,
            config.oauth_client_id().map(str::to_string),
            config.pending_link_ttl(),
        );
        Self {
            config,
            credentials,
            otp,
            sessions,
            oauth,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &IdentityConfig {
        &self.config
    }

    #[must_use]
    pub const fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// # Errors
    /// `DuplicateIdentity` if the patient id or email is taken.
    pub async fn create_user(&self, new_user: NewUser) -> Result<User, IdentityError> {
        self.credentials.create_user(new_user).await
    }

    /// # Errors
    /// `StoreUnavailable` on storage failure.
    pub async fn allocate_patient_id(&self) -> Result<String, IdentityError> {
        self.credentials.allocate_patient_id().await
    }

    /// # Errors
    /// `InvalidCredentials` for an unknown id or a wrong password.
    pub async fn login(
        &self,
        patient_id: &str,
        password: SecretString,
    ) -> Result<Session, IdentityError> {
        self.sessions.login(patient_id, password).await
    }

    /// # Errors
    /// `StoreUnavailable` on storage failure.
    pub async fn logout(&self, token: &str) -> Result<(), IdentityError> {
        self.sessions.logout(token).await
    }

    /// # Errors
    /// `StoreUnavailable` on storage failure.
    pub async fn validate_session(
        &self,
        token: &str,
    ) -> Result<Option<SessionContext>, IdentityError> {
        self.sessions.validate(token).await
    }

    /// # Errors
    /// `NotFound` if the account behind the session is gone.
    pub async fn profile(&self, session: &SessionContext) -> Result<User, IdentityError> {
        self.credentials
            .find_by_id(&session.patient_id)
            .await?
            .ok_or(IdentityError::NotFound)
    }

    /// # Errors
    /// `IdentityMismatch` if the email does not match the patient.
    pub async fn request_otp(
        &self,
        email: &str,
        patient_id: &str,
    ) -> Result<OtpReceipt, IdentityError> {
        self.otp.request_otp(email, patient_id).await
    }

    /// # Errors
    /// `StoreUnavailable` on storage failure.
    pub async fn verify_otp(
        &self,
        patient_id: &str,
        code: &str,
    ) -> Result<OtpOutcome, IdentityError> {
        self.otp.verify_otp(patient_id, code).await
    }

    /// Spend a reset grant on a new password. Every session of the patient
    /// is revoked.
    ///
    /// # Errors
    /// `NotFound` if the account is gone, `StoreUnavailable` on storage failure.
    pub async fn reset_password(
        &self,
        grant: PasswordResetGrant,
        new_password: SecretString,
    ) -> Result<(), IdentityError> {
        let otp_id = grant.otp_id();
        let patient_id = grant.into_patient_id();
        self.credentials
            .update_password(&patient_id, new_password, Revocation::All)
            .await?;
        info!(patient_id = %patient_id, otp_id, "Password reset with OTP");
        Ok(())
    }

    /// Check an OTP and set the new password in one step. A storage failure
    /// leaves the code unspent; every session of the patient is revoked on
    /// success.
    ///
    /// # Errors
    /// `OtpInvalid`, `OtpExpired` or `OtpAlreadyConsumed` for a rejected
    /// code, `NotFound` if nothing was ever issued.
    pub async fn reset_password_with_otp(
        &self,
        patient_id: &str,
        code: &str,
        new_password: SecretString,
    ) -> Result<(), IdentityError> {
        self.otp.reset_password(patient_id, code, new_password).await
    }

    /// Change the password of the signed-in patient. Other sessions are
    /// revoked; the caller's stays valid.
    ///
    /// # Errors
    /// `InvalidCredentials` if `current_password` is wrong or the account
    /// has no password.
    pub async fn change_password(
        &self,
        session: &SessionContext,
        current_password: SecretString,
        new_password: SecretString,
    ) -> Result<(), IdentityError> {
        match self
            .credentials
            .verify_credentials(&session.patient_id, current_password)
            .await
        {
            Ok(true) => {}
            Ok(false) | Err(IdentityError::NotFound) => {
                return Err(IdentityError::InvalidCredentials);
            }
            Err(err) => return Err(err),
        }

        self.credentials
            .update_password(
                &session.patient_id,
                new_password,
                Revocation::AllExcept(&session.token_hash),
            )
            .await
    }

    /// Federated sign-in; a linked account also gets a session.
    ///
    /// # Errors
    /// `TokenInvalid` if the token fails verification, `IdentityMismatch`
    /// if the email belongs to an account linked elsewhere.
    pub async fn sign_in_with_token(&self, id_token: &str) -> Result<SignIn, IdentityError> {
        match self.oauth.sign_in_with_token(id_token).await? {
            LinkOutcome::Linked(user) => {
                let session = self.sessions.issue(&user.patient_id).await?;
                Ok(SignIn::SignedIn(SignedIn { user, session }))
            }
            LinkOutcome::Pending(pending) => Ok(SignIn::PendingLink(pending)),
        }
    }

    /// Finish a pending link and sign the new account in.
    ///
    /// # Errors
    /// `TokenInvalid` for a bad ticket, `DuplicateIdentity` for a taken
    /// patient id (the ticket stays usable).
    pub async fn complete_pending_link(
        &self,
        request: CompleteLink,
    ) -> Result<SignedIn, IdentityError> {
        let user = self.oauth.complete_pending_link(request).await?;
        let session = self.sessions.issue(&user.patient_id).await?;
        Ok(SignedIn { user, session })
    }

    /// Remove dead sessions, spent or expired pending links, and old OTP
    /// records.
    ///
    /// # Errors
    /// `StoreUnavailable` on storage failure.
    pub async fn purge_expired(&self) -> Result<PurgeReport, IdentityError> {
        let sessions = self.sessions.purge().await?;
        let pending_links = self.oauth.purge().await?;
        let otp_records = self.otp.purge(self.config.otp_retention()).await?;
        Ok(PurgeReport {
            sessions,
            pending_links,
            otp_records,
        })
    }
}
