//! Domain Ports (DDD Port/Adapter Pattern)
//!
//! The probe loop only knows backends through the [`BackendDriver`] port.
//! Concrete drivers live in [`crate::adapters`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │        BackendDriver │ SubProbe │ ServiceLabels      │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  MySqlDriver │ PostgresDriver │ RedisDriver │ AMQP  │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::config::ServiceSpec;
use crate::error::Result;
use crate::metrics::MetricSink;

// =============================================================================
// Value Objects
// =============================================================================

/// Label names of the per-service health gauge, in exposition order.
pub const LABEL_NAMES: [&str; 4] = ["name", "fqdn", "port", "type"];

/// Metric identity of one service.
///
/// Names are unique in the configuration, so two services never share a
/// label tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceLabels {
    pub name: String,
    pub fqdn: String,
    pub port: String,
    pub service_type: String,
}

impl ServiceLabels {
    pub fn new(
        name: impl Into<String>,
        fqdn: impl Into<String>,
        port: u16,
        service_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            fqdn: fqdn.into(),
            port: port.to_string(),
            service_type: service_type.into(),
        }
    }

    /// Labels for a configured service.
    pub fn from_spec(spec: &ServiceSpec) -> Self {
        Self::new(&spec.name, &spec.fqdn, spec.port, &spec.service_type)
    }

    /// Label values in [`LABEL_NAMES`] order.
    pub fn values(&self) -> [&str; 4] {
        [&self.name, &self.fqdn, &self.port, &self.service_type]
    }
}

impl std::fmt::Display for ServiceLabels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({}://{}:{})",
            self.name, self.service_type, self.fqdn, self.port
        )
    }
}

/// Lifecycle of a probe loop.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    /// Created, not started
    Idle = 0,
    /// Loop is running
    Probing = 1,
    /// Loop observed the stop signal and exited
    Stopped = 2,
}

impl From<u8> for ProbeState {
    fn from(val: u8) -> Self {
        match val {
            1 => ProbeState::Probing,
            2 => ProbeState::Stopped,
            _ => ProbeState::Idle,
        }
    }
}

impl std::fmt::Display for ProbeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeState::Idle => write!(f, "Idle"),
            ProbeState::Probing => write!(f, "Probing"),
            ProbeState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Direction of a broker sub-probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Publish,
    Consume,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Publish => "publish",
            Direction::Consume => "consume",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Built-in backend types, keyed by their configuration tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    MySql,
    PostgreSql,
    Redis,
    RabbitMq,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::MySql,
        BackendKind::PostgreSql,
        BackendKind::Redis,
        BackendKind::RabbitMq,
    ];

    /// Tag used in the `type` field of a service entry.
    pub fn tag(&self) -> &'static str {
        match self {
            BackendKind::MySql => "mysql",
            BackendKind::PostgreSql => "postgresql",
            BackendKind::Redis => "redis",
            BackendKind::RabbitMq => "rabbitmq",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

// =============================================================================
// Sub-probes
// =============================================================================

/// Extra execution unit a driver runs next to its probe loop.
pub type SubProbe = BoxFuture<'static, ()>;

/// Everything a sub-probe needs to report and to stop.
#[derive(Clone)]
pub struct SubProbeContext {
    /// Identity of the owning service
    pub labels: ServiceLabels,
    /// Shared metric store
    pub sink: MetricSink,
    /// Cadence of the owning service
    pub check_interval: Duration,
    /// Stop signal shared with the owning loop
    pub shutdown: CancellationToken,
}

// =============================================================================
// Backend Driver Port
// =============================================================================

/// Port for one monitored backend.
///
/// One instance exists per configured service and is owned by exactly one
/// probe loop, which calls the methods strictly in sequence. Adding a new
/// backend type means implementing this trait and registering a
/// constructor; the probe loop and metric sink stay untouched.
#[async_trait]
pub trait BackendDriver: Send + 'static {
    /// Human readable backend name used in logs and errors.
    fn backend(&self) -> &'static str;

    /// Make sure a usable connection is cached.
    ///
    /// A cached connection is reused unless `force` is set or it is absent
    /// or observably closed, in which case a fresh one is opened. Failure
    /// leaves the cache empty and returns `Error::Connection`.
    async fn get_connection(&mut self, force: bool) -> Result<()>;

    /// Run one minimal round-trip proving liveness.
    async fn exercise(&mut self) -> Result<bool>;

    /// Companion execution units to run for the lifetime of the loop.
    fn sub_probes(&mut self, _ctx: &SubProbeContext) -> Vec<SubProbe> {
        Vec::new()
    }
}

impl std::fmt::Debug for dyn BackendDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendDriver")
            .field("backend", &self.backend())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_from_spec() {
        let spec = ServiceSpec::new("db1", "mysql", "db.local", 3306, Duration::from_secs(1));
        let labels = ServiceLabels::from_spec(&spec);

        assert_eq!(labels.values(), ["db1", "db.local", "3306", "mysql"]);
        assert_eq!(labels.to_string(), "db1(mysql://db.local:3306)");
    }

    #[test]
    fn test_probe_state_roundtrip() {
        for state in [ProbeState::Idle, ProbeState::Probing, ProbeState::Stopped] {
            assert_eq!(ProbeState::from(state as u8), state);
        }
        assert_eq!(ProbeState::from(42), ProbeState::Idle);
        assert_eq!(ProbeState::Probing.to_string(), "Probing");
    }

    #[test]
    fn test_backend_kind_tags() {
        let tags: Vec<_> = BackendKind::ALL.iter().map(BackendKind::tag).collect();
        assert_eq!(tags, ["mysql", "postgresql", "redis", "rabbitmq"]);
        assert_eq!(BackendKind::RabbitMq.to_string(), "rabbitmq");
    }

    #[test]
    fn test_direction_labels() {
        assert_eq!(Direction::Publish.as_str(), "publish");
        assert_eq!(Direction::Consume.to_string(), "consume");
    }
}
