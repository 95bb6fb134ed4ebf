//! Fleet SSH key lifecycle.
//!
//! One fleet-wide keypair authenticates the orchestrator on every node. The
//! [`CredentialManager`] generates replacements, pushes them with the
//! current key, verifies them with the new key, and only then removes the
//! old key from nodes that verified. A node is never left without a key the
//! orchestrator can use.

mod commands;
mod error;
mod key;
mod lock;
mod manager;
mod report;
mod store;

pub use commands::{AuthorizedKeysFile, KeyStoreCommands};
pub use error::CredentialError;
pub use key::{GeneratedKey, KeyMaterial, KeyState, fingerprint, generate_key};
pub use lock::RotationLock;
pub use manager::CredentialManager;
pub use report::{KeyVerification, PhaseRecord, RotationPhase, RotationReport};
pub use store::{KeyStore, Ledger};
