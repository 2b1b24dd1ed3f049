#![allow(dead_code)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use healthoracle::{
    email::{EmailDispatcher, EmailMessage},
    identity::{IdentityConfig, IdentityService, ManualClock, NewUser, User},
    oidc::{TokenError, TokenVerifier, VerifiedIdentity},
    store,
};
use secrecy::SecretString;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

pub const AUDIENCE: &str = "healthoracle-test.apps.googleusercontent.com";
pub const PASSWORD: &str = "correct horse 42";

/// Keeps every outgoing message so tests can read the code back.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<EmailMessage>>,
    failing: AtomicBool,
}

impl RecordingDispatcher {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// The six digit code from the newest message.
    pub fn last_code(&self) -> Result<String> {
        let sent = self.sent();
        let message = sent.last().ok_or_else(|| anyhow!("no email sent"))?;
        message
            .body
            .split(|c: char| !c.is_ascii_digit())
            .find(|chunk| chunk.len() == 6)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("no code in body: {}", message.body))
    }
}

#[async_trait]
impl EmailDispatcher for RecordingDispatcher {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("SMTP relay refused connection"));
        }
        self.sent
            .lock()
            .map_err(|_| anyhow!("outbox poisoned"))?
            .push(message.clone());
        Ok(())
    }
}

/// Accepts only the tokens it was told about.
#[derive(Debug, Default)]
pub struct ScriptedVerifier {
    identities: Mutex<HashMap<String, VerifiedIdentity>>,
}

impl ScriptedVerifier {
    pub fn allow(&self, token: &str, subject: &str, email: &str, name: Option<&str>) {
        if let Ok(mut identities) = self.identities.lock() {
            identities.insert(
                token.to_string(),
                VerifiedIdentity {
                    subject: subject.to_string(),
                    email: email.to_string(),
                    name: name.map(str::to_string),
                },
            );
        }
    }
}

#[async_trait]
impl TokenVerifier for ScriptedVerifier {
    async fn verify(
        &self,
        id_token: &str,
        expected_audience: &str,
    ) -> Result<VerifiedIdentity, TokenError> {
        if expected_audience != AUDIENCE {
            return Err(TokenError::Rejected("wrong audience".to_string()));
        }
        self.identities
            .lock()
            .map_err(|_| TokenError::Unavailable("verifier poisoned".to_string()))?
            .get(id_token)
            .cloned()
            .ok_or_else(|| TokenError::Rejected("signature mismatch".to_string()))
    }
}

pub struct Harness {
    pub identity: Arc<IdentityService>,
    pub clock: Arc<ManualClock>,
    pub outbox: Arc<RecordingDispatcher>,
    pub verifier: Arc<ScriptedVerifier>,
    pub pool: sqlx::SqlitePool,
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_760_000_000, 0).unwrap_or_default()
}

pub async fn harness() -> Result<Harness> {
    harness_with_pool(store::connect_in_memory().await?).await
}

pub async fn harness_with_pool(pool: sqlx::SqlitePool) -> Result<Harness> {
    let clock = Arc::new(ManualClock::new(start_time()));
    let outbox = Arc::new(RecordingDispatcher::default());
    let verifier = Arc::new(ScriptedVerifier::default());
    let config = IdentityConfig::new().with_oauth_client_id(Some(AUDIENCE.to_string()));
    let identity = Arc::new(IdentityService::with_clock(
        pool.clone(),
        config,
        outbox.clone(),
        verifier.clone(),
        clock.clone(),
    ));
    Ok(Harness {
        identity,
        clock,
        outbox,
        verifier,
        pool,
    })
}

pub async fn create_patient(identity: &IdentityService, patient_id: &str, email: &str) -> Result<User> {
    Ok(identity
        .create_user(NewUser {
            patient_id: patient_id.to_string(),
            name: "Sita Sharma".to_string(),
            email: email.to_string(),
            phone: Some("+977 9812345678".to_string()),
            password: SecretString::from(PASSWORD),
        })
        .await?)
}
