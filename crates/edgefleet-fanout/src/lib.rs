//! Fan-out execution for edgefleet.
//!
//! The [`Coordinator`] runs one request per node, all concurrently, each
//! bounded by the same deadline, and collects a [`FanOutReport`] holding
//! exactly one result per requested node. Partial failure is the normal case
//! and is reported, never raised.

mod coordinator;
mod error;
mod report;
mod table;

pub use coordinator::{Coordinator, SWEEP_OVERHEAD};
pub use error::FanOutError;
pub use report::{AggregateStatus, FanOutReport};
pub use table::Table;
