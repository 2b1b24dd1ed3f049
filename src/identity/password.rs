//! Argon2id password hashing. All hashing runs on the blocking pool.

use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use std::sync::OnceLock;
use tracing::error;

const DUMMY_PASSWORD: &str = "healthoracle-dummy-password";

static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();

/// Hash a raw password into a PHC string with a fresh random salt.
pub(crate) async fn hash_password(raw: SecretString) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_blocking(raw.expose_secret()))
        .await
        .context("password hashing task failed")?
}

/// Verify `raw` against a stored PHC string.
///
/// `None` (unknown user or OAuth-only account) still pays for one
/// verification against a dummy digest and then reports a mismatch.
pub(crate) async fn verify_password(raw: SecretString, stored: Option<String>) -> Result<bool> {
    tokio::task::spawn_blocking(move || match stored {
        Some(phc) => verify_blocking(raw.expose_secret(), &phc),
        None => {
            if let Some(dummy) = dummy_hash() {
                let _ = verify_blocking(raw.expose_secret(), dummy);
            }
            Ok(false)
        }
    })
    .await
    .context("password verification task failed")?
}

fn hash_blocking(raw: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(raw.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

fn verify_blocking(raw: &str, phc: &str) -> Result<bool> {
    let parsed =
        PasswordHash::new(phc).map_err(|err| anyhow!("stored password hash is malformed: {err}"))?;
    Ok(Argon2::default()
        .verify_password(raw.as_bytes(), &parsed)
        .is_ok())
}

fn dummy_hash() -> Option<&'static str> {
    DUMMY_HASH
        .get_or_init(|| match hash_blocking(DUMMY_PASSWORD) {
            Ok(hash) => Some(hash),
            Err(err) => {
                error!("Failed to prepare dummy password hash: {err}");
                None
            }
        })
        .as_deref()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_and_verify() -> Result<()> {
        let hash = hash_password(SecretString::from("correct horse")).await?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(!hash.contains("correct horse"));

        assert!(verify_password(SecretString::from("correct horse"), Some(hash.clone())).await?);
        assert!(!verify_password(SecretString::from("wrong horse"), Some(hash)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn salts_differ() -> Result<()> {
        let first = hash_password(SecretString::from("same password")).await?;
        let second = hash_password(SecretString::from("same password")).await?;
        assert_ne!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn missing_hash_never_verifies() -> Result<()> {
        assert!(!verify_password(SecretString::from(DUMMY_PASSWORD), None).await?);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_hash_is_an_error() {
        let result = verify_password(SecretString::from("pw"), Some("plaintext".to_string())).await;
        assert!(result.is_err());
    }
}
