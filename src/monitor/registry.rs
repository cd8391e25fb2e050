//! Driver Registry
//!
//! Maps a service `type` tag to a driver constructor. The built-in table
//! covers the four supported backends; extra types are added with
//! [`DriverRegistry::register`] without touching the probe loop or the
//! metric sink.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapters::{MySqlDriver, PostgresDriver, RabbitMqDriver, RedisDriver};
use crate::config::ServiceSpec;
use crate::domain::{BackendDriver, BackendKind};
use crate::error::{Error, Result};

/// Constructor for one backend type.
pub type DriverFactory =
    Arc<dyn Fn(&ServiceSpec) -> Result<Box<dyn BackendDriver>> + Send + Sync>;

type Constructor = fn(&ServiceSpec) -> Result<Box<dyn BackendDriver>>;

static BUILTIN: [(BackendKind, Constructor); 4] = [
    (BackendKind::MySql, MySqlDriver::from_spec),
    (BackendKind::PostgreSql, PostgresDriver::from_spec),
    (BackendKind::Redis, RedisDriver::from_spec),
    (BackendKind::RabbitMq, RabbitMqDriver::from_spec),
];

/// Exact-match lookup table from type tag to driver constructor.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// Registry with no types at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for (kind, constructor) in BUILTIN {
            registry.register(kind.tag(), constructor);
        }
        registry
    }

    /// Add or replace the constructor for a type tag.
    pub fn register<F>(&mut self, service_type: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ServiceSpec) -> Result<Box<dyn BackendDriver>> + Send + Sync + 'static,
    {
        self.factories.insert(service_type.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, service_type: &str) -> bool {
        self.factories.contains_key(service_type)
    }

    /// Registered type tags, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Constructor for the service's type.
    ///
    /// An unknown type is an [`Error::UnknownServiceType`] naming the
    /// service, so the caller can skip just that service.
    pub fn resolve(&self, spec: &ServiceSpec) -> Result<DriverFactory> {
        self.factories
            .get(&spec.service_type)
            .cloned()
            .ok_or_else(|| Error::UnknownServiceType {
                service: spec.name.clone(),
                service_type: spec.service_type.clone(),
            })
    }

    /// Resolve and construct a driver for the service.
    pub fn build(&self, spec: &ServiceSpec) -> Result<Box<dyn BackendDriver>> {
        let factory = self.resolve(spec)?;
        factory(spec)
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("types", &self.types())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
