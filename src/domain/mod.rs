//! Domain Layer
//!
//! Core abstractions shared by the probe engine and the backend adapters.
//!
//! - **Ports** (`ports.rs`) - the `BackendDriver` trait and the value objects
//!   that identify a service in the metric space
//!
//! # Usage
//!
//! ```ignore
//! use plus_monitoring::domain::{BackendDriver, ServiceLabels};
//!
//! async fn probe_once(driver: &mut dyn BackendDriver) -> bool {
//!     driver.get_connection(false).await.is_ok()
//!         && driver.exercise().await.unwrap_or(false)
//! }
//! ```

pub mod ports;

pub use ports::{
    BackendDriver, BackendKind, Direction, ProbeState, ServiceLabels, SubProbe, SubProbeContext,
    LABEL_NAMES,
};
