//! # Health Oracle identity core
//!
//! `healthoracle` owns patient identity for the Health Oracle platform:
//! credential storage, one-time-password (OTP) password reset, session
//! issuance and Google sign-in with account linking. Everything else in the
//! platform (dashboards, templates, data exports) calls into this core.
//!
//! ## Storage
//!
//! A single SQLite database is the source of truth. Passwords are stored as
//! Argon2id PHC strings; session tokens, OTP codes and pending-link tickets
//! are stored only as SHA-256 digests.
//!
//! ## Guarantees
//!
//! - A patient id, an email and an OAuth subject each map to at most one user.
//! - An OTP is accepted at most once and only inside its 10 minute window;
//!   consumption is a single conditional `UPDATE`.
//! - A federated identity token is verified before any account is touched.

pub mod api;
pub mod cli;
pub mod email;
pub mod identity;
pub mod oidc;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
