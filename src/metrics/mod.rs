//! Metrics module
//!
//! Holds the labeled gauges written by the probe loops and serves them to
//! Prometheus scrapers.

mod sink;

pub mod server;

pub use server::{run_metrics_server, DEFAULT_METRICS_ADDR};
pub use sink::{MetricSink, BROKER_METRIC, SERVICE_METRIC, THREAD_COUNT_METRIC};
