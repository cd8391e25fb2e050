//! Metric Sink
//!
//! Labeled gauge store shared by every probe loop and read by the
//! exposition server.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

use crate::domain::{Direction, ServiceLabels, LABEL_NAMES};
use crate::error::{Error, Result};

/// Per-service health gauge (1 healthy, 0 unhealthy)
pub const SERVICE_METRIC: &str = "plus_monitoring";

/// Live execution unit count
pub const THREAD_COUNT_METRIC: &str = "plus_monitoring_thread_count";

/// Per-direction health of broker sub-probes
pub const BROKER_METRIC: &str = "plus_monitoring_broker";

struct SinkInner {
    registry: Registry,
    services: GaugeVec,
    directions: GaugeVec,
    thread_count: Gauge,
    /// Series handed out so far, for reads that must not create series
    known: RwLock<HashMap<ServiceLabels, Gauge>>,
    known_directions: RwLock<HashMap<(ServiceLabels, Direction), Gauge>>,
}

/// Thread-safe labeled gauge store.
///
/// Cloning is cheap; all clones share one registry. Each write is a single
/// atomic store on the series, so readers never see a partial update.
#[derive(Clone)]
pub struct MetricSink {
    inner: Arc<SinkInner>,
}

impl MetricSink {
    /// Create a sink with its own private registry.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let services = GaugeVec::new(Opts::new(SERVICE_METRIC, "Plus Monitoring"), &LABEL_NAMES)?;
        let directions = GaugeVec::new(
            Opts::new(BROKER_METRIC, "Plus Monitoring broker sub-probe health"),
            &["name", "fqdn", "port", "type", "direction"],
        )?;
        let thread_count = Gauge::with_opts(Opts::new(
            THREAD_COUNT_METRIC,
            "Plus Monitoring Thread Count",
        ))?;

        registry.register(Box::new(services.clone()))?;
        registry.register(Box::new(directions.clone()))?;
        registry.register(Box::new(thread_count.clone()))?;

        Ok(Self {
            inner: Arc::new(SinkInner {
                registry,
                services,
                directions,
                thread_count,
                known: RwLock::new(HashMap::new()),
                known_directions: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// Handle on the health series of one service.
    pub fn gauge(&self, labels: &ServiceLabels) -> Gauge {
        if let Some(gauge) = self.inner.known.read().get(labels) {
            return gauge.clone();
        }

        self.inner
            .known
            .write()
            .entry(labels.clone())
            .or_insert_with(|| self.inner.services.with_label_values(&labels.values()))
            .clone()
    }

    /// Handle on one direction series of a broker service.
    pub fn direction_gauge(&self, labels: &ServiceLabels, direction: Direction) -> Gauge {
        let key = (labels.clone(), direction);
        if let Some(gauge) = self.inner.known_directions.read().get(&key) {
            return gauge.clone();
        }

        let [name, fqdn, port, service_type] = labels.values();
        self.inner
            .known_directions
            .write()
            .entry(key)
            .or_insert_with(|| {
                self.inner.directions.with_label_values(&[
                    name,
                    fqdn,
                    port,
                    service_type,
                    direction.as_str(),
                ])
            })
            .clone()
    }

    /// Overwrite the value of one service series.
    pub fn set(&self, labels: &ServiceLabels, value: f64) {
        self.gauge(labels).set(value);
    }

    /// Record a probe outcome as 1 or 0.
    pub fn record(&self, labels: &ServiceLabels, healthy: bool) {
        self.set(labels, if healthy { 1.0 } else { 0.0 });
    }

    /// Overwrite the execution unit count.
    pub fn set_thread_count(&self, count: usize) {
        self.inner.thread_count.set(count as f64);
    }

    /// Current execution unit count.
    pub fn thread_count(&self) -> f64 {
        self.inner.thread_count.get()
    }

    /// Last written value of a service series, if the series exists.
    pub fn value(&self, labels: &ServiceLabels) -> Option<f64> {
        self.inner.known.read().get(labels).map(|g| g.get())
    }

    /// Last written value of a broker direction series, if it exists.
    pub fn direction_value(&self, labels: &ServiceLabels, direction: Direction) -> Option<f64> {
        self.inner
            .known_directions
            .read()
            .get(&(labels.clone(), direction))
            .map(|g| g.get())
    }

    /// All service series and their values, ordered by labels.
    pub fn snapshot(&self) -> Vec<(ServiceLabels, f64)> {
        let mut series: Vec<_> = self
            .inner
            .known
            .read()
            .iter()
            .map(|(labels, gauge)| (labels.clone(), gauge.get()))
            .collect();
        series.sort_by(|a, b| a.0.cmp(&b.0));
        series
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Internal(format!("Metrics are not valid UTF-8: {}", e)))
    }
}

impl std::fmt::Debug for MetricSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSink")
            .field("series", &self.inner.known.read().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
