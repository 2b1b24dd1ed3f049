use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::email::{DEFAULT_EMAIL_SENDER, DEFAULT_SMTP_PORT, SmtpConfig};

pub const ARG_SMTP_HOST: &str = "smtp-host";
pub const ARG_SMTP_PORT: &str = "smtp-port";
pub const ARG_SMTP_USERNAME: &str = "smtp-username";
pub const ARG_SMTP_PASSWORD: &str = "smtp-password";
pub const ARG_EMAIL_SENDER: &str = "email-sender";

#[derive(Debug, Clone)]
pub struct Options {
    /// `None` unless host, username and password are all set.
    pub smtp: Option<SmtpConfig>,
}

impl Options {
    /// Parse SMTP arguments from matches.
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let smtp = match (
            get_non_empty(ARG_SMTP_HOST),
            get_non_empty(ARG_SMTP_USERNAME),
            get_non_empty(ARG_SMTP_PASSWORD),
        ) {
            (Some(host), Some(username), Some(password)) => Some(
                SmtpConfig::new(host, username, SecretString::from(password))
                    .with_port(
                        matches
                            .get_one::<u16>(ARG_SMTP_PORT)
                            .copied()
                            .unwrap_or(DEFAULT_SMTP_PORT),
                    )
                    .with_sender(
                        get_non_empty(ARG_EMAIL_SENDER)
                            .unwrap_or_else(|| DEFAULT_EMAIL_SENDER.to_string()),
                    ),
            ),
            _ => None,
        };

        Self { smtp }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SMTP_HOST)
                .long(ARG_SMTP_HOST)
                .help("SMTP relay host; OTP emails are only logged without it")
                .env("HEALTHORACLE_SMTP_HOST"),
        )
        .arg(
            Arg::new(ARG_SMTP_PORT)
                .long(ARG_SMTP_PORT)
                .help("SMTP relay port (STARTTLS)")
                .env("HEALTHORACLE_SMTP_PORT")
                .default_value("587")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_SMTP_USERNAME)
                .long(ARG_SMTP_USERNAME)
                .help("SMTP username")
                .env("HEALTHORACLE_SMTP_USERNAME"),
        )
        .arg(
            Arg::new(ARG_SMTP_PASSWORD)
                .long(ARG_SMTP_PASSWORD)
                .help("SMTP password")
                .env("HEALTHORACLE_SMTP_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_EMAIL_SENDER)
                .long(ARG_EMAIL_SENDER)
                .help("From address of outgoing email")
                .env("HEALTHORACLE_EMAIL_SENDER")
                .default_value(DEFAULT_EMAIL_SENDER),
        )
}
