use thiserror::Error;

/// Failure taxonomy for every identity operation.
///
/// Validation-shaped variants carry a fixed, user-safe message via
/// [`IdentityError::public_message`]. `StoreUnavailable` wraps the internal
/// error for logging and is rendered only as a generic failure.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("patient identity already exists")]
    DuplicateIdentity,
    #[error("invalid patient id or password")]
    InvalidCredentials,
    #[error("record not found")]
    NotFound,
    #[error("email does not match the patient record")]
    IdentityMismatch,
    #[error("one-time password expired")]
    OtpExpired,
    #[error("one-time password invalid")]
    OtpInvalid,
    #[error("one-time password already used")]
    OtpAlreadyConsumed,
    #[error("identity token rejected")]
    TokenInvalid,
    #[error("verified identity has no local account yet")]
    PendingLink,
    #[error("store unavailable")]
    StoreUnavailable(anyhow::Error),
}

impl IdentityError {
    /// Message safe to show to the person on the other side of the boundary.
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        match self {
            Self::DuplicateIdentity => "Patient ID or email already exists.",
            Self::InvalidCredentials => "Invalid Patient ID or password.",
            Self::NotFound => "Record not found.",
            Self::IdentityMismatch => "The details provided do not match our records.",
            Self::OtpExpired => "OTP expired. Please request a new one.",
            Self::OtpInvalid => "Invalid OTP. Please try again.",
            Self::OtpAlreadyConsumed => "OTP already used. Please request a new one.",
            Self::TokenInvalid => "Sign-in could not be verified. Please try again.",
            Self::PendingLink => "Finish creating your account to continue.",
            Self::StoreUnavailable(_) => "Service temporarily unavailable. Please try again later.",
        }
    }

    /// True for failures caused by the service rather than by the caller.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<anyhow::Error> for IdentityError {
    fn from(err: anyhow::Error) -> Self {
        Self::StoreUnavailable(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn store_errors_hide_detail() {
        let err = IdentityError::from(anyhow!("disk I/O error at /var/lib/healthoracle.db"));
        assert!(err.is_internal());
        assert_eq!(err.to_string(), "store unavailable");
        assert!(!err.public_message().contains("disk"));
    }

    #[test]
    fn validation_errors_are_not_internal() {
        for err in [
            IdentityError::DuplicateIdentity,
            IdentityError::InvalidCredentials,
            IdentityError::IdentityMismatch,
            IdentityError::OtpExpired,
            IdentityError::OtpInvalid,
            IdentityError::OtpAlreadyConsumed,
            IdentityError::TokenInvalid,
        ] {
            assert!(!err.is_internal());
            assert!(!err.public_message().is_empty());
        }
    }
}
