//! Background scheduler that re-runs tag aggregation periodically.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tagspend_cost::{AggregationScheduler, ExclusionList, TagCostDatabase};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let db = Arc::new(TagCostDatabase::open("tagspend.db")?);
//!     let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//!     let handle = AggregationScheduler::new(db, ExclusionList::new()).start(shutdown_rx);
//!
//!     tokio::signal::ctrl_c().await?;
//!     shutdown_tx.send(true)?;
//!     handle.await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::TagCostDatabase;
use crate::error::Result;
use crate::exclusion::ExclusionList;
use crate::pipeline::{PublishReport, run_aggregation};

/// Default aggregation interval in seconds (10 minutes).
pub const DEFAULT_AGGREGATION_INTERVAL_SECS: u64 = 600;

/// Shortest interval accepted by [`AggregationScheduler::with_interval`].
pub const MIN_AGGREGATION_INTERVAL: Duration = Duration::from_secs(1);

/// Periodically aggregates the stored records and persists the result.
pub struct AggregationScheduler {
    db: Arc<TagCostDatabase>,
    exclusions: ExclusionList,
    interval: Duration,
}

impl AggregationScheduler {
    /// Create a scheduler with the default interval (10 minutes).
    pub fn new(db: Arc<TagCostDatabase>, exclusions: ExclusionList) -> Self {
        Self {
            db,
            exclusions,
            interval: Duration::from_secs(DEFAULT_AGGREGATION_INTERVAL_SECS),
        }
    }

    /// Set the interval between runs, clamped to [`MIN_AGGREGATION_INTERVAL`].
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval < MIN_AGGREGATION_INTERVAL {
            warn!(
                requested_ms = interval.as_millis(),
                "Aggregation interval too short, using minimum"
            );
        }
        self.interval = interval.max(MIN_AGGREGATION_INTERVAL);
        self
    }

    /// Get the aggregation interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the loop. It runs once immediately, then every interval, until
    /// `shutdown` becomes `true` or its sender is dropped.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        info!(
            interval_secs = self.interval.as_secs(),
            excluded_keys = self.exclusions.len(),
            "Starting aggregation scheduler"
        );

        tokio::spawn(async move {
            self.run_loop(shutdown).await;
        })
    }

    async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let scheduler_db = Arc::clone(&self.db);
                    let exclusions = self.exclusions.clone();
                    // SQLite calls block; keep them off the async workers
                    let outcome = tokio::task::spawn_blocking(move || {
                        run_aggregation(scheduler_db.as_ref(), scheduler_db.as_ref(), &exclusions)
                    })
                    .await;

                    match outcome {
                        Ok(result) => Self::log_outcome(result),
                        Err(e) => error!(error = %e, "Aggregation task panicked"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Aggregation scheduler stopped");
                        return;
                    }
                }
            }
        }
    }

    fn log_outcome(result: Result<PublishReport>) {
        match result {
            Ok(report) if report.is_complete() => {
                debug!(written = report.written, "Aggregation cycle completed");
            }
            Ok(report) => {
                warn!(
                    written = report.written,
                    failed = report.failures.len(),
                    "Aggregation cycle completed with failed rows"
                );
            }
            Err(e) => {
                error!(error = %e, "Aggregation cycle failed");
            }
        }
    }

    /// Run aggregation once (synchronous, for manual triggering).
    pub fn run_once(&self) -> Result<PublishReport> {
        run_aggregation(self.db.as_ref(), self.db.as_ref(), &self.exclusions)
    }
}
