use crate::{
    api::{self, AuthConfig},
    cli::telemetry,
    email::{EmailDispatcher, LogEmailDispatcher, SmtpConfig, SmtpEmailDispatcher},
    identity::{IdentityConfig, IdentityService, spawn_maintenance_worker},
    oidc::GoogleTokenVerifier,
    store,
};
use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub frontend_base_url: String,
    pub session_ttl_seconds: i64,
    pub google_client_id: Option<String>,
    pub maintenance_interval_seconds: u64,
    pub smtp: Option<SmtpConfig>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database cannot be opened, the SMTP relay is
/// misconfigured, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Server args: {:?}", args);

    let pool = store::connect(&args.dsn, store::DEFAULT_MAX_CONNECTIONS)
        .await
        .context("Failed to open identity database")?;

    let dispatcher: Arc<dyn EmailDispatcher> = match args.smtp {
        Some(smtp) => {
            info!(host = smtp.host(), port = smtp.port(), "Sending email through SMTP");
            Arc::new(SmtpEmailDispatcher::new(smtp)?)
        }
        None => {
            warn!("SMTP is not configured; OTP emails will only be logged");
            Arc::new(LogEmailDispatcher)
        }
    };

    if args.google_client_id.is_none() {
        info!("Google sign-in disabled: no client id configured");
    }

    let config = IdentityConfig::new()
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_oauth_client_id(args.google_client_id);
    let verifier = Arc::new(GoogleTokenVerifier::new()?);
    let identity = Arc::new(IdentityService::new(
        pool.clone(),
        config,
        dispatcher,
        verifier,
    ));

    let maintenance = spawn_maintenance_worker(
        identity.clone(),
        Duration::from_secs(args.maintenance_interval_seconds),
    );

    let auth_config = AuthConfig::new(args.frontend_base_url, args.session_ttl_seconds);
    let result = api::serve(args.port, pool.clone(), identity, auth_config).await;

    if let Some(handle) = maintenance {
        handle.abort();
    }
    pool.close().await;
    telemetry::shutdown_tracer();

    result
}
