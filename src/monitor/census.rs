//! Worker Census
//!
//! Periodically publishes how many execution units are alive: probe
//! loops, driver sub-probes and the census itself.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::metrics::MetricSink;

/// Cadence of the census, independent of any service interval.
pub const CENSUS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct WorkerCensus {
    tracker: TaskTracker,
    sink: MetricSink,
    interval: Duration,
}

impl WorkerCensus {
    pub fn new(tracker: TaskTracker, sink: MetricSink) -> Self {
        Self {
            tracker,
            sink,
            interval: CENSUS_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Count live units now and publish the count.
    pub fn sample(&self) -> usize {
        let live = self.tracker.len();
        self.sink.set_thread_count(live);
        live
    }

    /// Sample every interval until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval = ?self.interval, "Starting worker census");

        loop {
            let live = self.sample();
            debug!(live, "Worker census");

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Worker census stopped");
    }
}
