//! Outbound email delivery.
//!
//! The identity core hands finished messages to an `EmailDispatcher` after
//! its database work has committed. `SmtpEmailDispatcher` relays through an
//! SMTP server with STARTTLS; `LogEmailDispatcher` is the development
//! fallback used when SMTP is not configured and simply logs the message,
//! body included, so OTP codes can be read from the console.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_EMAIL_SENDER: &str = "no-reply@example.com";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Email delivery abstraction.
#[async_trait]
pub trait EmailDispatcher: Send + Sync {
    /// Deliver a message or return why it could not be delivered.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev dispatcher that logs the message instead of sending it.
#[derive(Clone, Debug)]
pub struct LogEmailDispatcher;

#[async_trait]
impl EmailDispatcher for LogEmailDispatcher {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            body = %message.body,
            "email dispatch stub (SMTP not configured)"
        );
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    host: String,
    port: u16,
    username: String,
    password: SecretString,
    sender: String,
}

impl SmtpConfig {
    #[must_use]
    pub fn new(host: String, username: String, password: SecretString) -> Self {
        Self {
            host,
            port: DEFAULT_SMTP_PORT,
            username,
            password,
            sender: DEFAULT_EMAIL_SENDER.to_string(),
        }
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_sender(mut self, sender: String) -> Self {
        self.sender = sender;
        self
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }
}

pub struct SmtpEmailDispatcher {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl SmtpEmailDispatcher {
    /// Build a STARTTLS relay. No connection is opened until the first send.
    ///
    /// # Errors
    /// Returns an error if the sender address or relay host is invalid.
    pub fn new(config: SmtpConfig) -> Result<Self> {
        let sender = config
            .sender
            .parse::<Mailbox>()
            .with_context(|| format!("Invalid email sender address: {}", config.sender))?;

        let credentials = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .with_context(|| format!("Invalid SMTP host: {}", config.host))?
            .port(config.port)
            .credentials(credentials)
            .build();

        debug!(host = %config.host, port = config.port, "SMTP dispatcher configured");

        Ok(Self { transport, sender })
    }
}

#[async_trait]
impl EmailDispatcher for SmtpEmailDispatcher {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let to = message
            .to
            .parse::<Mailbox>()
            .with_context(|| format!("Invalid recipient address: {}", message.to))?;

        let email = Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .context("failed to build email message")?;

        let response = self
            .transport
            .send(email)
            .await
            .map_err(|err| anyhow!("SMTP delivery failed: {err}"))?;

        debug!(code = %response.code(), "SMTP relay accepted message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> EmailMessage {
        EmailMessage {
            to: "patient@example.com".to_string(),
            subject: "Your Health Oracle OTP".to_string(),
            body: "Your one-time password is 123456. It expires in 10 minutes.".to_string(),
        }
    }

    #[tokio::test]
    async fn log_dispatcher_always_succeeds() -> Result<()> {
        LogEmailDispatcher.send(&message()).await?;
        Ok(())
    }

    #[test]
    fn smtp_config_defaults() {
        let config = SmtpConfig::new(
            "smtp.example.com".to_string(),
            "mailer".to_string(),
            SecretString::from("app-password"),
        );
        assert_eq!(config.port(), 587);
        assert_eq!(config.sender(), "no-reply@example.com");
        assert!(!format!("{config:?}").contains("app-password"));
    }

    #[test]
    fn smtp_dispatcher_rejects_bad_sender() {
        let config = SmtpConfig::new(
            "smtp.example.com".to_string(),
            "mailer".to_string(),
            SecretString::from("app-password"),
        )
        .with_sender("not an address".to_string());
        assert!(SmtpEmailDispatcher::new(config).is_err());
    }

    #[tokio::test]
    async fn smtp_dispatcher_builds_without_connecting() -> Result<()> {
        let config = SmtpConfig::new(
            "smtp.example.com".to_string(),
            "mailer".to_string(),
            SecretString::from("app-password"),
        )
        .with_port(2525)
        .with_sender("Health Oracle <no-reply@healthoracle.example>".to_string());
        let dispatcher = SmtpEmailDispatcher::new(config)?;
        assert_eq!(dispatcher.sender.email.to_string(), "no-reply@healthoracle.example");
        Ok(())
    }
}
