//! Daily purge of abandoned rolling-day totals.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{aggregator::Aggregator, scheduler::next_boundary, Result};

const DAY: Duration = Duration::from_secs(24 * 3600);

pub struct Sweeper {
    aggregator: Aggregator,
    stale_after: Duration,
}

impl Sweeper {
    pub fn new(aggregator: Aggregator, stale_after: Duration) -> Self {
        Self {
            aggregator,
            stale_after,
        }
    }

    /// Sweep once per day at 00:00 UTC until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let now = Utc::now();
            let at = next_boundary(now, DAY);
            let dur = (at - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(dur) => {
                    if let Err(e) = self.sweep(at).await {
                        error!("stale sweep failed: {e}");
                    }
                }
            }
        }
        info!("sweeper stopped");
    }

    /// Delete daily buckets not written since `now - stale_after`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let horizon = chrono::Duration::from_std(self.stale_after)
            .unwrap_or_else(|_| chrono::Duration::hours(26));
        let purged = self.aggregator.purge_stale_daily(now - horizon).await?;
        if purged > 0 {
            info!(purged, "purged stale daily totals");
        }
        Ok(purged)
    }
}
