//! Periodic cleanup of rows that can never be used again.

use super::IdentityService;
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::interval};
use tracing::{Instrument, debug, error, info, info_span};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub sessions: u64,
    pub pending_links: u64,
    pub otp_records: u64,
}

impl PurgeReport {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.sessions + self.pending_links + self.otp_records
    }
}

/// Run `purge_expired` every `period` until the runtime shuts down.
/// A zero period disables the worker.
pub fn spawn_maintenance_worker(
    service: Arc<IdentityService>,
    period: Duration,
) -> Option<JoinHandle<()>> {
    if period.is_zero() {
        info!("Maintenance worker disabled");
        return None;
    }

    let handle = tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            let span = info_span!("identity.maintenance");
            match service.purge_expired().instrument(span).await {
                Ok(report) if report.total() > 0 => info!(
                    sessions = report.sessions,
                    pending_links = report.pending_links,
                    otp_records = report.otp_records,
                    "Purged expired identity records"
                ),
                Ok(_) => debug!("Nothing to purge"),
                Err(err) => error!("Identity maintenance failed: {err:?}"),
            }
        }
    });

    Some(handle)
}
