//! Plus Monitoring - Polling Health Monitor
//!
//! Probes databases, caches and message brokers on a fixed cadence and
//! exposes the latest health of every service as Prometheus gauges.
//!
//! # Architecture
//!
//! ```text
//! conf.yml → Config → Monitor ─┬─ ProbeLoop (one per service) ─┐
//!                              ├─ broker consumer sub-probes ───┼─▶ MetricSink ─▶ /metrics
//!                              └─ WorkerCensus ─────────────────┘
//! ```
//!
//! # Supported Backends
//!
//! - MySQL (`mysql`)
//! - PostgreSQL (`postgresql`)
//! - Redis (`redis`)
//! - RabbitMQ (`rabbitmq`)
//!
//! # Modules
//!
//! - [`adapters`] - Backend drivers implementing domain ports
//! - [`config`] - Service configuration schema and loader
//! - [`domain`] - Domain layer with ports and value objects (DDD)
//! - [`error`] - Error types
//! - [`metrics`] - Metric sink and exposition server
//! - [`monitor`] - Driver registry, probe loops, census and orchestrator

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod monitor;

// Re-export commonly used types
pub use config::{ReconnectPolicy, ServiceSpec};
pub use domain::{BackendDriver, ProbeState, ServiceLabels};
pub use error::{Error, Result};
pub use metrics::MetricSink;
pub use monitor::{DriverRegistry, LaunchReport, Monitor, ProbeLoop, WorkerCensus};
