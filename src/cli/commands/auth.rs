use clap::{Arg, ArgMatches, Command};

use crate::{api::handlers::auth::state::DEFAULT_FRONTEND_BASE_URL, identity::config};

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_GOOGLE_CLIENT_ID: &str = "google-client-id";
pub const ARG_MAINTENANCE_INTERVAL_SECONDS: &str = "maintenance-interval-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub frontend_base_url: String,
    pub session_ttl_seconds: i64,
    pub google_client_id: Option<String>,
    pub maintenance_interval_seconds: u64,
}

impl Options {
    /// Parse auth arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the session TTL is not positive or exceeds
    /// [`config::MAX_TTL_SECONDS`].
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let session_ttl_seconds = matches
            .get_one::<i64>(ARG_SESSION_TTL_SECONDS)
            .copied()
            .unwrap_or(config::DEFAULT_SESSION_TTL_SECONDS);
        if session_ttl_seconds <= 0 {
            anyhow::bail!("--{ARG_SESSION_TTL_SECONDS} must be greater than zero");
        }
        if session_ttl_seconds > config::MAX_TTL_SECONDS {
            anyhow::bail!(
                "--{ARG_SESSION_TTL_SECONDS} must be at most {} (366 days)",
                config::MAX_TTL_SECONDS
            );
        }

        Ok(Self {
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .unwrap_or_else(|| DEFAULT_FRONTEND_BASE_URL.to_string()),
            session_ttl_seconds,
            google_client_id: matches
                .get_one::<String>(ARG_GOOGLE_CLIENT_ID)
                .cloned()
                .filter(|v| !v.trim().is_empty()),
            maintenance_interval_seconds: matches
                .get_one::<u64>(ARG_MAINTENANCE_INTERVAL_SECONDS)
                .copied()
                .unwrap_or(300),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL, used as the only allowed CORS origin")
                .env("HEALTHORACLE_FRONTEND_BASE_URL")
                .default_value(DEFAULT_FRONTEND_BASE_URL),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session TTL in seconds, measured from login")
                .env("HEALTHORACLE_SESSION_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_ID)
                .long(ARG_GOOGLE_CLIENT_ID)
                .help("Google OAuth client id; Google sign-in is disabled without it")
                .env("HEALTHORACLE_GOOGLE_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_MAINTENANCE_INTERVAL_SECONDS)
                .long(ARG_MAINTENANCE_INTERVAL_SECONDS)
                .help("Seconds between purges of expired sessions, links and codes (0 disables)")
                .env("HEALTHORACLE_MAINTENANCE_INTERVAL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}
