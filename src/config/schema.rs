//! Service configuration schema.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

// =============================================================================
// Raw Entry
// =============================================================================

/// One entry under `services:` exactly as written in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEntry {
    /// Backend type tag (`mysql`, `postgresql`, `redis`, `rabbitmq`)
    #[serde(rename = "type")]
    pub service_type: String,

    /// Host name of the backend
    pub fqdn: String,

    /// TCP port of the backend
    pub port: u16,

    /// Credentials
    #[serde(default)]
    pub authentication: Authentication,

    /// Seconds between probe cycles, fractions allowed
    pub check_interval: f64,

    /// Reconnect policy
    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    /// Optional bound on one connect+exercise step, in seconds
    #[serde(default)]
    pub timeout: Option<f64>,
}

// =============================================================================
// Authentication
// =============================================================================

/// Database selector: a name for SQL backends, an index for redis.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Database {
    Index(i64),
    Name(String),
}

impl Database {
    /// Database name as used by SQL backends.
    pub fn name(&self) -> String {
        match self {
            Database::Index(i) => i.to_string(),
            Database::Name(n) => n.clone(),
        }
    }

    /// Numeric index as used by redis.
    pub fn index(&self) -> Option<i64> {
        match self {
            Database::Index(i) => Some(*i),
            Database::Name(n) => n.trim().parse().ok(),
        }
    }
}

/// Credential bundle for one backend.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Authentication {
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: Option<Database>,
}

impl std::fmt::Debug for Authentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authentication")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("db", &self.db)
            .finish()
    }
}

// =============================================================================
// Reconnect Policy
// =============================================================================

/// When a probe loop asks its driver for a fresh connection.
///
/// A cached connection that is absent or observably closed is always
/// replaced, whatever the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Force a new connection after every failed cycle
    #[default]
    OnFailure,
    /// Keep the cached connection until it is gone or closed
    WhenClosed,
}

impl ReconnectPolicy {
    /// Whether the next cycle should force a reconnect.
    ///
    /// `last_outcome` is `None` before the first cycle.
    pub fn force_reconnect(&self, last_outcome: Option<bool>) -> bool {
        match self {
            ReconnectPolicy::OnFailure => last_outcome != Some(true),
            ReconnectPolicy::WhenClosed => false,
        }
    }
}

// =============================================================================
// Service Spec
// =============================================================================

/// Validated, immutable descriptor of one monitored service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub service_type: String,
    pub fqdn: String,
    pub port: u16,
    pub authentication: Authentication,
    pub check_interval: Duration,
    pub reconnect: ReconnectPolicy,
    pub timeout: Option<Duration>,
}

impl ServiceSpec {
    /// Create a spec with default credentials and policy.
    pub fn new(
        name: impl Into<String>,
        service_type: impl Into<String>,
        fqdn: impl Into<String>,
        port: u16,
        check_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            fqdn: fqdn.into(),
            port,
            authentication: Authentication::default(),
            check_interval,
            reconnect: ReconnectPolicy::default(),
            timeout: None,
        }
    }

    /// Set credentials
    pub fn with_authentication(mut self, authentication: Authentication) -> Self {
        self.authentication = authentication;
        self
    }

    /// Set reconnect policy
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set probe timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validate a raw entry into a spec.
    pub fn from_entry(name: &str, entry: ServiceEntry) -> Result<Self> {
        let invalid = |reason: &str| Error::Configuration {
            service: name.to_string(),
            reason: reason.to_string(),
        };

        if name.trim().is_empty() {
            return Err(invalid("service name is empty"));
        }
        if entry.service_type.trim().is_empty() {
            return Err(invalid("type is empty"));
        }
        if entry.fqdn.trim().is_empty() {
            return Err(invalid("fqdn is empty"));
        }
        let check_interval = positive_seconds(entry.check_interval)
            .ok_or_else(|| invalid("check_interval must be a positive number of seconds"))?;
        let timeout = match entry.timeout {
            Some(secs) => Some(
                positive_seconds(secs)
                    .ok_or_else(|| invalid("timeout must be a positive number of seconds"))?,
            ),
            None => None,
        };

        Ok(Self {
            name: name.to_string(),
            service_type: entry.service_type.trim().to_string(),
            fqdn: entry.fqdn.trim().to_string(),
            port: entry.port,
            authentication: entry.authentication,
            check_interval,
            reconnect: entry.reconnect,
            timeout,
        })
    }
}

/// Seconds as a non-zero duration; rejects zero, negative, NaN and overflow.
fn positive_seconds(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn entry(yaml: &str) -> ServiceEntry {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_entry_defaults() {
        let e = entry("type: redis\nfqdn: cache.local\nport: 6379\ncheck_interval: 5\n");
        let spec = ServiceSpec::from_entry("cache1", e).unwrap();

        assert_eq!(spec.name, "cache1");
        assert_eq!(spec.check_interval, Duration::from_secs(5));
        assert_eq!(spec.reconnect, ReconnectPolicy::OnFailure);
        assert_eq!(spec.timeout, None);
        assert_eq!(spec.authentication, Authentication::default());
    }

    #[test]
    fn test_database_selector_forms() {
        let e = entry(
            "type: redis\nfqdn: c\nport: 1\ncheck_interval: 1\nauthentication:\n  db: 3\n",
        );
        assert_eq!(e.authentication.db, Some(Database::Index(3)));
        assert_eq!(e.authentication.db.unwrap().index(), Some(3));

        let e = entry(
            "type: mysql\nfqdn: d\nport: 1\ncheck_interval: 1\nauthentication:\n  db: app\n",
        );
        let db = e.authentication.db.unwrap();
        assert_eq!(db.name(), "app");
        assert_eq!(db.index(), None);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let e = entry("type: mysql\nfqdn: d\nport: 3306\ncheck_interval: 0\n");
        assert_matches!(
            ServiceSpec::from_entry("db1", e),
            Err(Error::Configuration { service, .. }) if service == "db1"
        );
    }

    #[test]
    fn test_fractional_interval_accepted() {
        let e = entry("type: mysql\nfqdn: d\nport: 3306\ncheck_interval: 0.5\ntimeout: 0.25\n");
        let spec = ServiceSpec::from_entry("db1", e).unwrap();
        assert_eq!(spec.check_interval, Duration::from_millis(500));
        assert_eq!(spec.timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_negative_interval_rejected() {
        let e = entry("type: mysql\nfqdn: d\nport: 3306\ncheck_interval: -1\n");
        assert!(ServiceSpec::from_entry("db1", e).is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let e = entry("type: mysql\nfqdn: d\nport: 3306\ncheck_interval: 1\ntimeout: 0\n");
        assert!(ServiceSpec::from_entry("db1", e).is_err());
    }

    #[test]
    fn test_reconnect_policy() {
        let e = entry("type: mysql\nfqdn: d\nport: 1\ncheck_interval: 1\nreconnect: when_closed\n");
        assert_eq!(e.reconnect, ReconnectPolicy::WhenClosed);

        assert!(ReconnectPolicy::OnFailure.force_reconnect(None));
        assert!(ReconnectPolicy::OnFailure.force_reconnect(Some(false)));
        assert!(!ReconnectPolicy::OnFailure.force_reconnect(Some(true)));
        assert!(!ReconnectPolicy::WhenClosed.force_reconnect(Some(false)));
    }

    #[test]
    fn test_password_redacted_in_debug() {
        let auth = Authentication {
            username: Some("monitor".to_string()),
            password: Some("hunter2".to_string()),
            db: None,
        };
        let debug = format!("{:?}", auth);
        assert!(debug.contains("monitor"));
        assert!(!debug.contains("hunter2"));
    }
}
