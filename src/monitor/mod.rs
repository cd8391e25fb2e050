//! Monitor module
//!
//! Runs the probe engine:
//!
//! - [`DriverRegistry`] - resolves a service type to a driver constructor
//! - [`ProbeLoop`] - periodic connect/exercise/record loop for one service
//! - [`WorkerCensus`] - publishes the number of live execution units
//! - [`Monitor`] - starts and stops all of the above
//!
//! All units are tokio tasks tracked by one `TaskTracker` and stopped by one
//! `CancellationToken`.

mod census;
mod orchestrator;
mod probe;
mod registry;

pub use census::{WorkerCensus, CENSUS_INTERVAL};
pub use orchestrator::{LaunchReport, Monitor};
pub use probe::{ProbeHandle, ProbeLoop};
pub use registry::{DriverFactory, DriverRegistry};
