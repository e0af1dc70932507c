//! Staleness sweeper.
//!
//! A leg unseen by every source for a full freshness window is presumed
//! expired. Sweeping is a status transition only — refs and snapshots are
//! never touched — and must run after all merges of the cycle have
//! committed, so a flight whose refreshing observation is still in flight
//! isn't demoted by mistake.

use std::sync::Arc;

use chrono::{Duration, Utc};
use elcat_storage::{FlightStore, StoreError};
use tracing::info;

pub struct Sweeper {
    store: Arc<dyn FlightStore>,
}

impl Sweeper {
    pub fn new(store: Arc<dyn FlightStore>) -> Self {
        Self { store }
    }

    /// Demote every canonical flight whose last-seen is older than
    /// `now - window`. Idempotent: a second sweep with no intervening
    /// observations demotes nothing further.
    pub async fn sweep(&self, window: Duration) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - window;
        let demoted = self.store.demote_stale(cutoff).await?;
        if demoted > 0 {
            info!(demoted, %cutoff, "demoted stale flights to unavailable");
        }
        Ok(demoted)
    }
}
