//! Edgefleet Config
//!
//! This crate contains the serializable fleet configuration types for edgefleet.
//! These types describe the fleet as written in the fleet file, before the
//! registry validates them and lowers them into runtime nodes.
//!
//! Configuration is loaded from JSON files (via CLI with `--fleet=fleet.json`).
//! Nothing in this crate performs validation beyond what serde enforces; the
//! registry is responsible for rejecting malformed or conflicting entries.

mod artifacts;
mod fleet;
mod health;
mod node;
mod service;

pub use artifacts::ArtifactsDef;
pub use fleet::{DefaultsDef, FleetDef, SshDef};
pub use health::HealthDef;
pub use node::NodeDef;
pub use service::{CheckDef, ServiceDef};
