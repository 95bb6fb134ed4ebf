//! Fleet health for edgefleet.
//!
//! A [`HealthAggregator`] probes each configured service on the nodes it
//! applies to, one fan-out sweep per distinct probe, and folds the results
//! into a [`HealthSnapshot`]. Failing services with a remediation command get
//! that command once per snapshot followed by a single re-probe. Failure
//! streaks carry across snapshots so alerts key on repeated failures rather
//! than a single bad probe.

mod aggregator;
mod error;
mod monitor;
mod probe;
mod snapshot;

pub use aggregator::{HealthAggregator, HealthPolicy};
pub use error::HealthError;
pub use monitor::HealthMonitor;
pub use probe::{Evaluation, Probe, ServiceSpec, ServiceStatus, default_services};
pub use snapshot::{Alert, HealthSnapshot, NodeHealth, Remediation, RemediationOutcome, ServiceHealth};
