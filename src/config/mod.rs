//! Configuration module
//!
//! Loads the monitored service set from a YAML file.
//!
//! ```text
//! conf.yml
//!     → loader.rs (parse document, split per service)
//!     → schema.rs (validate each entry into a ServiceSpec)
//!     → Monitor (one probe loop per ServiceSpec)
//! ```
//!
//! A broken file yields an empty service set. A broken entry only
//! removes that entry.

mod loader;
mod schema;

pub use loader::{
    load_services, load_services_or_empty, parse_services, LoadedServices, DEFAULT_CONFIG_PATH,
};
pub use schema::{Authentication, Database, ReconnectPolicy, ServiceEntry, ServiceSpec};
