use std::path::PathBuf;

use edgefleet_fanout::FanOutError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
  #[error("no active fleet key; adopt one first")]
  NoActiveKey,

  #[error("a different key is already active: {fingerprint}")]
  ActiveKeyExists { fingerprint: String },

  #[error("another rotation is in progress")]
  RotationInProgress,

  /// A live process holds the cross-process lock file.
  #[error("another rotation is in progress (pid {pid}); remove {path} if that process is gone")]
  RotationLocked { path: PathBuf, pid: String },

  #[error("invalid public key in {path}: {message}")]
  InvalidPublicKey { path: PathBuf, message: String },

  #[error("{path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("credential ledger {path} is malformed: {source}")]
  Ledger {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error(transparent)]
  Sweep(#[from] FanOutError),
}

impl CredentialError {
  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
    let path = path.into();
    move |source| CredentialError::Io { path, source }
  }
}
