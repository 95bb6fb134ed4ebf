//! Model distribution for edgefleet.
//!
//! Artifacts are large content-addressed files. A [`SyncEngine`] diffs a
//! source manifest against a target manifest, then copies each missing or
//! mismatched artifact in digest-checked chunks, resuming partial copies,
//! and publishes it at the target only after the whole-file hash matches.
//!
//! Storage goes through the [`ArtifactStore`] trait: [`FsStore`] for a local
//! directory and [`RemoteStore`] for the same layout on a node.

mod engine;
mod error;
mod fs;
mod inventory;
mod manifest;
mod remote;
mod report;
mod store;

pub use engine::{DEFAULT_CHUNK_SIZE, SyncEngine, TransferOp, TransferReason, Transferred, diff};
pub use error::SyncError;
pub use fs::FsStore;
pub use inventory::{INVENTORY_PATH, InventoryReport, inventory_request};
pub use manifest::{
  ArtifactDigest, ArtifactManifestEntry, DivergenceFault, Manifest, ModelInfo, ModelInventory, ReplicaVariant,
  check_replicas, sha256_hex,
};
pub use remote::RemoteStore;
pub use report::{ArtifactOutcome, SyncReport, TransferStatus};
pub use store::ArtifactStore;
