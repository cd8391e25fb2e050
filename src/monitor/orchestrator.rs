//! Monitor Orchestrator
//!
//! Startup sequence:
//!
//! ```text
//! start census → for each service: resolve driver → start probe loop
//!              → sample census → run until the shutdown token fires
//! ```
//!
//! A service whose driver cannot be built is reported and skipped; the
//! rest still start.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::config::ServiceSpec;
use crate::error::Error;
use crate::metrics::MetricSink;
use crate::monitor::census::WorkerCensus;
use crate::monitor::probe::{ProbeHandle, ProbeLoop};
use crate::monitor::registry::DriverRegistry;

/// Outcome of [`Monitor::launch`].
#[derive(Debug, Default)]
pub struct LaunchReport {
    /// Services whose probe loop is running
    pub started: Vec<String>,
    /// Services that were skipped, with the reason
    pub failed: Vec<(String, Error)>,
}

impl LaunchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owns every probe loop, the census and the stop signal.
pub struct Monitor {
    sink: MetricSink,
    registry: DriverRegistry,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    census: WorkerCensus,
    census_started: bool,
    handles: Vec<ProbeHandle>,
    names: HashSet<String>,
}

impl Monitor {
    /// Monitor with the built-in drivers.
    pub fn new(sink: MetricSink) -> Self {
        Self::with_registry(sink, DriverRegistry::builtin())
    }

    pub fn with_registry(sink: MetricSink, registry: DriverRegistry) -> Self {
        let tracker = TaskTracker::new();
        let census = WorkerCensus::new(tracker.clone(), sink.clone());

        Self {
            sink,
            registry,
            tracker,
            shutdown: CancellationToken::new(),
            census,
            census_started: false,
            handles: Vec::new(),
            names: HashSet::new(),
        }
    }

    /// Override the census cadence. Takes effect if set before `launch`.
    pub fn with_census_interval(mut self, interval: Duration) -> Self {
        self.census = self.census.with_interval(interval);
        self
    }

    pub fn sink(&self) -> &MetricSink {
        &self.sink
    }

    /// Token that stops every unit when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn handles(&self) -> &[ProbeHandle] {
        &self.handles
    }

    /// Handle of one running service.
    pub fn handle(&self, name: &str) -> Option<&ProbeHandle> {
        self.handles.iter().find(|h| h.name() == name)
    }

    /// Live execution units right now.
    pub fn live_units(&self) -> usize {
        self.tracker.len()
    }

    /// Start the census (once) and one probe loop per service.
    ///
    /// Must be called inside a tokio runtime.
    pub fn launch(&mut self, services: Vec<ServiceSpec>) -> LaunchReport {
        if !self.census_started {
            self.tracker
                .spawn(self.census.clone().run(self.shutdown.clone()));
            self.census_started = true;
        }

        let mut report = LaunchReport::default();

        for spec in services {
            let name = spec.name.clone();

            if self.names.contains(&name) {
                let e = Error::Configuration {
                    service: name.clone(),
                    reason: "duplicate service name".to_string(),
                };
                error!(severity = "critical", service = %name, "{}", e);
                report.failed.push((name, e));
                continue;
            }

            match self.registry.build(&spec) {
                Ok(driver) => {
                    let probe = ProbeLoop::new(
                        spec,
                        driver,
                        self.sink.clone(),
                        self.shutdown.child_token(),
                    );
                    self.handles.push(probe.start(&self.tracker));
                    self.names.insert(name.clone());
                    report.started.push(name);
                }
                Err(e) => {
                    error!(severity = "critical", service = %name, "{}", e);
                    report.failed.push((name, e));
                }
            }
        }

        let live = self.census.sample();
        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            live,
            "Probe loops launched"
        );

        report
    }

    /// Signal every unit to stop.
    pub fn shutdown(&self) {
        info!("Stopping all probe loops");
        self.shutdown.cancel();
    }

    /// Wait for every launched unit to finish.
    ///
    /// Without a prior [`shutdown`](Self::shutdown) this never returns.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.sink.set_thread_count(self.tracker.len());
        info!("All probe loops stopped");
    }

    /// Run until `signal` completes, then stop everything and wait.
    pub async fn run_until<F>(&self, signal: F)
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = signal => self.shutdown(),
            _ = self.shutdown.cancelled() => {}
        }
        self.wait().await;
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("services", &self.handles.len())
            .field("live_units", &self.tracker.len())
            .field("stopping", &self.shutdown.is_cancelled())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
