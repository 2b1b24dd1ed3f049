use chrono::TimeDelta;

pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
pub const DEFAULT_PENDING_LINK_TTL_SECONDS: i64 = 10 * 60;
pub const DEFAULT_OTP_RETENTION_SECONDS: i64 = 7 * 24 * 60 * 60;
pub const DEFAULT_OTP_EMAIL_SUBJECT: &str = "Your Health Oracle OTP";
/// Upper bound for every configurable duration.
pub const MAX_TTL_SECONDS: i64 = 366 * 24 * 60 * 60;

/// Policy knobs for the identity core.
///
/// The OTP validity window is fixed at 10 minutes and is not configurable.
#[derive(Clone, Debug)]
pub struct IdentityConfig {
    session_ttl_seconds: i64,
    pending_link_ttl_seconds: i64,
    otp_retention_seconds: i64,
    oauth_client_id: Option<String>,
    otp_email_subject: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            pending_link_ttl_seconds: DEFAULT_PENDING_LINK_TTL_SECONDS,
            otp_retention_seconds: DEFAULT_OTP_RETENTION_SECONDS,
            oauth_client_id: None,
            otp_email_subject: DEFAULT_OTP_EMAIL_SUBJECT.to_string(),
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds.clamp(1, MAX_TTL_SECONDS);
        self
    }

    #[must_use]
    pub fn with_pending_link_ttl_seconds(mut self, seconds: i64) -> Self {
        self.pending_link_ttl_seconds = seconds.clamp(1, MAX_TTL_SECONDS);
        self
    }

    #[must_use]
    pub fn with_otp_retention_seconds(mut self, seconds: i64) -> Self {
        self.otp_retention_seconds = seconds.clamp(0, MAX_TTL_SECONDS);
        self
    }

    /// Audience expected in federated identity tokens. Without it every
    /// federated sign-in is rejected.
    #[must_use]
    pub fn with_oauth_client_id(mut self, client_id: Option<String>) -> Self {
        self.oauth_client_id = client_id.filter(|id| !id.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_otp_email_subject(mut self, subject: impl Into<String>) -> Self {
        self.otp_email_subject = subject.into();
        self
    }

    #[must_use]
    pub const fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn session_ttl(&self) -> TimeDelta {
        bounded(self.session_ttl_seconds, DEFAULT_SESSION_TTL_SECONDS)
    }

    #[must_use]
    pub fn pending_link_ttl(&self) -> TimeDelta {
        bounded(self.pending_link_ttl_seconds, DEFAULT_PENDING_LINK_TTL_SECONDS)
    }

    #[must_use]
    pub fn otp_retention(&self) -> TimeDelta {
        bounded(self.otp_retention_seconds, DEFAULT_OTP_RETENTION_SECONDS)
    }

    #[must_use]
    pub fn oauth_client_id(&self) -> Option<&str> {
        self.oauth_client_id.as_deref()
    }

    #[must_use]
    pub fn otp_email_subject(&self) -> &str {
        &self.otp_email_subject
    }
}

fn bounded(seconds: i64, fallback: i64) -> TimeDelta {
    TimeDelta::try_seconds(seconds.min(MAX_TTL_SECONDS))
        .or_else(|| TimeDelta::try_seconds(fallback))
        .unwrap_or_default()
}
