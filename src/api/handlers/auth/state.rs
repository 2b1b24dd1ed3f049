use anyhow::{Context, Result, anyhow};
use axum::http::HeaderValue;
use url::Url;

pub const DEFAULT_FRONTEND_BASE_URL: &str = "http://localhost:3000";

/// HTTP-facing auth settings: where the frontend lives and how long the
/// session cookie lasts.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String, session_ttl_seconds: i64) -> Self {
        Self {
            frontend_base_url,
            session_ttl_seconds,
        }
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub const fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    /// Only mark cookies secure when the frontend is served over HTTPS.
    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }

    /// Origin header value allowed by CORS.
    ///
    /// # Errors
    /// Returns an error if the frontend base URL has no host.
    pub fn frontend_origin(&self) -> Result<HeaderValue> {
        let parsed = Url::parse(&self.frontend_base_url)
            .with_context(|| format!("Invalid frontend base URL: {}", self.frontend_base_url))?;
        let host = parsed.host_str().ok_or_else(|| {
            anyhow!(
                "Frontend base URL must include a valid host: {}",
                self.frontend_base_url
            )
        })?;
        let port = parsed
            .port()
            .map_or_else(String::new, |port| format!(":{port}"));
        let origin = format!("{}://{}{}", parsed.scheme(), host, port);
        HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_only_over_https() {
        assert!(AuthConfig::new("https://app.healthoracle.example".to_string(), 60).session_cookie_secure());
        assert!(!AuthConfig::new("http://localhost:3000".to_string(), 60).session_cookie_secure());
    }

    #[test]
    fn frontend_origin_drops_path() -> Result<()> {
        let config = AuthConfig::new("https://app.healthoracle.example:8443/portal/".to_string(), 60);
        assert_eq!(
            config.frontend_origin()?,
            HeaderValue::from_static("https://app.healthoracle.example:8443")
        );
        Ok(())
    }

    #[test]
    fn frontend_origin_requires_host() {
        let config = AuthConfig::new("not a url".to_string(), 60);
        assert!(config.frontend_origin().is_err());
    }
}
