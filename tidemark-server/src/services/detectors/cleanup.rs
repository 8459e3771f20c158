//! Reaction-log garbage collection.
//!
//! Reaction changes are cheap to recompute in full on each update scan, so
//! the audit log only needs to answer "did anything change since my last
//! look". A short retention window bounds table growth under reaction
//! churn. Delete entries are never touched here.

use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::services::hub::{SharedHub, StreamHub};

pub fn spawn(hub: SharedHub) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(
            hub.config().stream.cleanup_interval_secs,
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let shutdown = hub.shutdown_token();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            sweep(&hub).await;
        }
    })
}

pub(crate) async fn sweep(hub: &StreamHub) {
    let retention = chrono::Duration::seconds(hub.config().stream.reaction_log_retention_secs);
    let cutoff = Utc::now() - retention;

    match hub.repo().delete_reaction_log_before(cutoff).await {
        Ok(0) => {}
        Ok(removed) => {
            counter!("tidemark_reaction_log_rows_removed_total").increment(removed);
            debug!(removed, "reaction log swept");
        }
        Err(err) => warn!(error = %err, "reaction log sweep failed; will retry next tick"),
    }
}
