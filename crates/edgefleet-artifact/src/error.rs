use std::path::PathBuf;

use edgefleet_executor::ErrorDetail;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
  /// The assembled artifact does not hash to its manifest digest. The partial
  /// copy has been discarded; the artifact must be transferred again.
  #[error("integrity check failed for '{id}' on {location}: expected {expected}, got {actual}")]
  Integrity {
    id: String,
    location: String,
    expected: String,
    actual: String,
  },

  #[error("chunk at offset {offset} of {hash} rejected by {location}: digest mismatch")]
  ChunkRejected {
    hash: String,
    offset: u64,
    location: String,
  },

  #[error("short read from {location}: {hash} at offset {offset} returned {actual} of {expected} bytes")]
  ShortRead {
    location: String,
    hash: String,
    offset: u64,
    expected: u64,
    actual: u64,
  },

  #[error("blob {hash} not present on {location}")]
  NotFound { location: String, hash: String },

  #[error("'{0}' is not a sha256 hex digest")]
  InvalidHash(String),

  #[error("{location}: {detail}")]
  Remote { location: String, detail: ErrorDetail },

  #[error("manifest on {location} is malformed: {source}")]
  Manifest {
    location: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("{path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl SyncError {
  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
    let path = path.into();
    move |source| SyncError::Io { path, source }
  }

  pub fn is_integrity(&self) -> bool {
    matches!(self, SyncError::Integrity { .. } | SyncError::ChunkRejected { .. })
  }
}
