//! Map parsed arguments to the action the binary runs.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{auth, email};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;
    let email_opts = email::Options::parse(matches);

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url: auth_opts.frontend_base_url,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        google_client_id: auth_opts.google_client_id,
        maintenance_interval_seconds: auth_opts.maintenance_interval_seconds,
        smtp: email_opts.smtp,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    fn clean_env() -> [(&'static str, Option<&'static str>); 6] {
        [
            ("HEALTHORACLE_SMTP_HOST", None),
            ("HEALTHORACLE_SMTP_USERNAME", None),
            ("HEALTHORACLE_SMTP_PASSWORD", None),
            ("HEALTHORACLE_SESSION_TTL_SECONDS", None),
            ("HEALTHORACLE_GOOGLE_CLIENT_ID", None),
            ("HEALTHORACLE_DSN", None),
        ]
    }

    #[test]
    fn partial_smtp_settings_fall_back_to_log_dispatcher() {
        temp_env::with_vars(clean_env(), || {
            let matches = commands::new().get_matches_from(vec![
                "healthoracle",
                "--smtp-host",
                "smtp.gmail.com",
                "--smtp-username",
                "clinic@example.com",
            ]);
            let result = handler(&matches);
            assert!(result.is_ok());
            if let Ok(Action::Server(args)) = result {
                assert!(args.smtp.is_none());
            }
        });
    }

    #[test]
    fn full_smtp_settings_are_parsed() {
        temp_env::with_vars(clean_env(), || {
            let matches = commands::new().get_matches_from(vec![
                "healthoracle",
                "--smtp-host",
                "smtp.gmail.com",
                "--smtp-username",
                "clinic@example.com",
                "--smtp-password",
                "app-password",
                "--smtp-port",
                "2525",
                "--email-sender",
                "otp@healthoracle.example",
            ]);
            let result = handler(&matches);
            assert!(result.is_ok());
            if let Ok(Action::Server(args)) = result {
                assert!(args.smtp.is_some());
                if let Some(smtp) = args.smtp {
                    assert_eq!(smtp.host(), "smtp.gmail.com");
                    assert_eq!(smtp.port(), 2525);
                    assert_eq!(smtp.sender(), "otp@healthoracle.example");
                }
            }
        });
    }

    #[test]
    fn blank_google_client_id_disables_google() {
        temp_env::with_vars(clean_env(), || {
            let matches = commands::new().get_matches_from(vec![
                "healthoracle",
                "--google-client-id",
                "  ",
            ]);
            let result = handler(&matches);
            assert!(result.is_ok());
            if let Ok(Action::Server(args)) = result {
                assert_eq!(args.google_client_id, None);
                assert_eq!(args.dsn, commands::DEFAULT_DSN);
            }
        });
    }

    #[test]
    fn non_positive_session_ttl_is_rejected() {
        temp_env::with_vars(clean_env(), || {
            let matches = commands::new().get_matches_from(vec![
                "healthoracle",
                "--session-ttl-seconds",
                "0",
            ]);
            let result = handler(&matches);
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(err.to_string().contains("--session-ttl-seconds"));
            }
        });
    }

    #[test]
    fn session_ttl_is_bounded_to_a_year() {
        temp_env::with_vars(clean_env(), || {
            let max = crate::identity::config::MAX_TTL_SECONDS.to_string();
            let matches = commands::new().get_matches_from(vec![
                "healthoracle",
                "--session-ttl-seconds",
                max.as_str(),
            ]);
            let result = handler(&matches);
            assert!(result.is_ok());
            if let Ok(Action::Server(args)) = result {
                assert_eq!(args.session_ttl_seconds, 366 * 24 * 60 * 60);
            }

            for too_long in ["31622401", "10000000000000", "9223372036854775807"] {
                let matches = commands::new().get_matches_from(vec![
                    "healthoracle",
                    "--session-ttl-seconds",
                    too_long,
                ]);
                let result = handler(&matches);
                assert!(result.is_err(), "accepted {too_long}");
                if let Err(err) = result {
                    assert!(err.to_string().contains("at most"));
                }
            }
        });
    }
}
