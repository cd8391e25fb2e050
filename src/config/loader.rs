//! Configuration loading from disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::config::schema::{ServiceEntry, ServiceSpec};
use crate::error::{Error, Result};

/// Production location of the service file.
pub const DEFAULT_CONFIG_PATH: &str = "/config/conf.yml";

/// Top-level document. Entries stay untyped so one bad entry cannot fail
/// the whole document.
#[derive(Debug, Deserialize)]
struct RawConfig {
    services: Option<BTreeMap<String, serde_yaml::Value>>,
}

/// Outcome of loading the service file.
#[derive(Debug, Default)]
pub struct LoadedServices {
    /// Valid services, ordered by name
    pub services: Vec<ServiceSpec>,
    /// Entries that failed validation
    pub rejected: Vec<(String, Error)>,
}

impl LoadedServices {
    /// Number of valid services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// True when no service survived loading.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Parse a YAML document into per-service specs.
pub fn parse_services(content: &str) -> Result<LoadedServices> {
    let raw: RawConfig = serde_yaml::from_str(content)?;
    let entries = raw.services.ok_or_else(|| Error::Configuration {
        service: "services".to_string(),
        reason: "missing 'services' section".to_string(),
    })?;

    let mut loaded = LoadedServices::default();
    for (name, value) in entries {
        let spec = serde_yaml::from_value::<ServiceEntry>(value)
            .map_err(|e| Error::Configuration {
                service: name.clone(),
                reason: e.to_string(),
            })
            .and_then(|entry| ServiceSpec::from_entry(&name, entry));

        match spec {
            Ok(spec) => loaded.services.push(spec),
            Err(e) => loaded.rejected.push((name, e)),
        }
    }

    Ok(loaded)
}

/// Load and validate the service file.
pub fn load_services(path: &Path) -> Result<LoadedServices> {
    let content = fs::read_to_string(path).map_err(|source| Error::ConfigFile {
        path: path.to_path_buf(),
        source,
    })?;
    parse_services(&content)
}

/// Load the service file, degrading to an empty set on any file-level
/// failure.
pub fn load_services_or_empty(path: &Path) -> LoadedServices {
    let loaded = match load_services(path) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(
                severity = "critical",
                path = %path.display(),
                "Failed to load configuration: {}",
                e
            );
            return LoadedServices::default();
        }
    };

    for (name, e) in &loaded.rejected {
        error!(service = %name, "Skipping service: {}", e);
    }

    let summary: Vec<serde_json::Value> = loaded
        .services
        .iter()
        .map(|s| {
            serde_json::json!({
                "name": s.name,
                "type": s.service_type,
                "fqdn": s.fqdn,
                "port": s.port,
                "check_interval": s.check_interval.as_secs_f64(),
            })
        })
        .collect();

    if loaded.is_empty() {
        warn!(path = %path.display(), "Configuration contains no usable services");
    } else {
        info!(
            services = %serde_json::Value::Array(summary),
            "Configuration loaded"
        );
    }

    loaded
}

// =============================================================================
// Tests
// =============================================================================
