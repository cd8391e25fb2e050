//! Probe Loop
//!
//! One loop per configured service. Each cycle:
//!
//! ```text
//! get_connection(force) → exercise() → gauge = 1 | 0 → sleep(check_interval)
//! ```
//!
//! Any error in a cycle is caught, logged and recorded as 0. The loop only
//! ends when its cancellation token fires.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use prometheus::Gauge;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::ServiceSpec;
use crate::domain::{BackendDriver, ProbeState, ServiceLabels, SubProbeContext};
use crate::error::{Error, Result};
use crate::metrics::MetricSink;

/// Periodic probe of one service.
pub struct ProbeLoop {
    spec: ServiceSpec,
    labels: ServiceLabels,
    driver: Box<dyn BackendDriver>,
    sink: MetricSink,
    gauge: Gauge,
    state: Arc<AtomicU8>,
    shutdown: CancellationToken,
    last_outcome: Option<bool>,
}

impl ProbeLoop {
    /// Bind a driver to a freshly labeled series of `sink`.
    pub fn new(
        spec: ServiceSpec,
        driver: Box<dyn BackendDriver>,
        sink: MetricSink,
        shutdown: CancellationToken,
    ) -> Self {
        let labels = ServiceLabels::from_spec(&spec);
        let gauge = sink.gauge(&labels);

        Self {
            spec,
            labels,
            driver,
            sink,
            gauge,
            state: Arc::new(AtomicU8::new(ProbeState::Idle as u8)),
            shutdown,
            last_outcome: None,
        }
    }

    pub fn state(&self) -> ProbeState {
        ProbeState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn labels(&self) -> &ServiceLabels {
        &self.labels
    }

    /// Outcome of the most recent cycle, `None` before the first.
    pub fn last_outcome(&self) -> Option<bool> {
        self.last_outcome
    }

    /// Run one connect → exercise → record step and return the outcome.
    pub async fn run_cycle(&mut self) -> bool {
        let force = self.spec.reconnect.force_reconnect(self.last_outcome);
        let attempt = probe_once(self.driver.as_mut(), force);

        let result = match self.spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    service: self.spec.name.clone(),
                    after: limit,
                }),
            },
            None => attempt.await,
        };

        let healthy = match result {
            Ok(healthy) => healthy,
            Err(e) => {
                error!(
                    service = %self.spec.name,
                    backend = self.driver.backend(),
                    forced = force,
                    "{}",
                    e
                );
                false
            }
        };

        self.gauge.set(if healthy { 1.0 } else { 0.0 });
        self.log_transition(healthy);
        self.last_outcome = Some(healthy);
        healthy
    }

    fn log_transition(&self, healthy: bool) {
        let service = &self.spec.name;
        match (self.last_outcome, healthy) {
            (None, true) => info!(service = %service, "Service is healthy"),
            (None, false) => warn!(service = %service, "Service is unhealthy"),
            (Some(false), true) => info!(service = %service, "Service recovered"),
            (Some(true), false) => warn!(service = %service, "Service became unhealthy"),
            (Some(_), _) => debug!(service = %service, healthy, "Probe cycle complete"),
        }
    }

    /// Spawn the loop and the driver's sub-probes on `tracker`.
    pub fn start(mut self, tracker: &TaskTracker) -> ProbeHandle {
        let ctx = SubProbeContext {
            labels: self.labels.clone(),
            sink: self.sink.clone(),
            check_interval: self.spec.check_interval,
            shutdown: self.shutdown.clone(),
        };
        for sub_probe in self.driver.sub_probes(&ctx) {
            tracker.spawn(sub_probe);
        }

        let handle = ProbeHandle {
            name: self.spec.name.clone(),
            state: Arc::clone(&self.state),
            shutdown: self.shutdown.clone(),
        };

        self.state.store(ProbeState::Probing as u8, Ordering::SeqCst);
        tracker.spawn(self.run());
        handle
    }

    async fn run(mut self) {
        info!(
            service = %self.labels,
            interval = ?self.spec.check_interval,
            reconnect = ?self.spec.reconnect,
            "Starting probe loop"
        );

        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.run_cycle() => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.spec.check_interval) => {}
            }
        }

        self.state.store(ProbeState::Stopped as u8, Ordering::SeqCst);
        info!(service = %self.spec.name, "Probe loop stopped");
    }
}

async fn probe_once(driver: &mut dyn BackendDriver, force: bool) -> Result<bool> {
    driver.get_connection(force).await?;
    driver.exercise().await
}

impl std::fmt::Debug for ProbeLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeLoop")
            .field("service", &self.labels)
            .field("state", &self.state())
            .field("last_outcome", &self.last_outcome)
            .finish()
    }
}

/// Handle on a started probe loop.
#[derive(Debug, Clone)]
pub struct ProbeHandle {
    name: String,
    state: Arc<AtomicU8>,
    shutdown: CancellationToken,
}

impl ProbeHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProbeState {
        ProbeState::from(self.state.load(Ordering::SeqCst))
    }

    /// Ask the loop and its sub-probes to stop.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectPolicy;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Scripted driver: pops one exercise outcome per cycle and records the
    /// `force` flag it was called with.
    #[derive(Clone, Default)]
    struct ScriptedDriver {
        outcomes: Arc<Mutex<VecDeque<Result<bool>>>>,
        forced: Arc<Mutex<Vec<bool>>>,
        hang: bool,
    }

    impl ScriptedDriver {
        fn new(outcomes: Vec<Result<bool>>) -> Self {
            Self {
                outcomes: Arc::new(Mutex::new(outcomes.into())),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl BackendDriver for ScriptedDriver {
        fn backend(&self) -> &'static str {
            "Scripted"
        }

        async fn get_connection(&mut self, force: bool) -> Result<()> {
            self.forced.lock().push(force);
            Ok(())
        }

        async fn exercise(&mut self) -> Result<bool> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.outcomes.lock().pop_front().unwrap_or(Ok(true))
        }
    }

    fn spec() -> ServiceSpec {
        ServiceSpec::new("svc1", "scripted", "host.local", 1000, Duration::from_secs(1))
    }

    fn probe(spec: ServiceSpec, driver: ScriptedDriver) -> (ProbeLoop, MetricSink) {
        let sink = MetricSink::new().unwrap();
        let probe = ProbeLoop::new(spec, Box::new(driver), sink.clone(), CancellationToken::new());
        (probe, sink)
    }

    #[tokio::test]
    async fn test_cycle_records_outcomes() {
        let driver = ScriptedDriver::new(vec![
            Ok(true),
            Ok(false),
            Err(Error::exercise("Scripted", "boom")),
            Ok(true),
        ]);
        let (mut probe, sink) = probe(spec(), driver);
        let labels = probe.labels().clone();

        assert_eq!(probe.state(), ProbeState::Idle);
        assert_eq!(sink.value(&labels), Some(0.0));

        let mut observed = Vec::new();
        for _ in 0..4 {
            observed.push(probe.run_cycle().await);
            observed.push(sink.value(&labels) == Some(1.0));
        }
        assert_eq!(
            observed,
            vec![true, true, false, false, false, false, true, true]
        );
    }

    #[tokio::test]
    async fn test_on_failure_forces_after_failure() {
        let driver = ScriptedDriver::new(vec![Ok(true), Ok(true), Ok(false), Ok(true)]);
        let forced = driver.forced.clone();
        let (mut probe, _sink) = probe(spec(), driver);

        for _ in 0..4 {
            probe.run_cycle().await;
        }
        assert_eq!(*forced.lock(), vec![true, false, false, true]);
    }

    #[tokio::test]
    async fn test_when_closed_never_forces() {
        let driver = ScriptedDriver::new(vec![Ok(false), Ok(false), Ok(true)]);
        let forced = driver.forced.clone();
        let (mut probe, _sink) = probe(spec().with_reconnect(ReconnectPolicy::WhenClosed), driver);

        for _ in 0..3 {
            probe.run_cycle().await;
        }
        assert_eq!(*forced.lock(), vec![false, false, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_failure() {
        let driver = ScriptedDriver {
            hang: true,
            ..Default::default()
        };
        let (mut probe, sink) = probe(spec().with_timeout(Duration::from_secs(2)), driver);
        let labels = probe.labels().clone();

        assert!(!probe.run_cycle().await);
        assert_eq!(sink.value(&labels), Some(0.0));
        assert_eq!(probe.last_outcome(), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_until_stopped() {
        let driver = ScriptedDriver::new(Vec::new());
        let forced = driver.forced.clone();
        let (probe, sink) = probe(spec(), driver);
        let labels = probe.labels().clone();
        let tracker = TaskTracker::new();

        let handle = probe.start(&tracker);
        assert_eq!(handle.name(), "svc1");
        assert_eq!(handle.state(), ProbeState::Probing);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(sink.value(&labels), Some(1.0));
        assert_eq!(forced.lock().len(), 4);

        handle.stop();
        tracker.close();
        tracker.wait().await;
        assert_eq!(handle.state(), ProbeState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_hung_cycle() {
        let driver = ScriptedDriver {
            hang: true,
            ..Default::default()
        };
        let (probe, _sink) = probe(spec(), driver);
        let tracker = TaskTracker::new();

        let handle = probe.start(&tracker);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(handle.state(), ProbeState::Probing);

        handle.stop();
        tracker.close();
        tracker.wait().await;
        assert_eq!(handle.state(), ProbeState::Stopped);
    }
}
