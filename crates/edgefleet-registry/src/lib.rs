//! Edgefleet Registry
//!
//! The registry is the validated, immutable table of fleet members for one
//! run. It is built from a [`FleetDef`](edgefleet_config::FleetDef) and never
//! mutated afterwards; membership changes require loading a new registry.
//!
//! Key differences from `edgefleet-config`:
//! - Names and addresses are checked for presence and uniqueness
//! - Roles are typed and per-node SSH settings are resolved against fleet defaults
//! - Nodes are ordered by name so every listing is deterministic

mod error;
mod filter;
mod node;
mod registry;

pub use error::RegistryError;
pub use filter::NodeFilter;
pub use node::{Node, Role, capability};
pub use registry::{Registry, read_fleet};
