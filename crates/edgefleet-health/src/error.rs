use std::path::PathBuf;

use edgefleet_fanout::FanOutError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
  #[error("{path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("health snapshot {path} is malformed: {source}")]
  Snapshot {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error(transparent)]
  Sweep(#[from] FanOutError),
}

impl HealthError {
  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
    let path = path.into();
    move |source| HealthError::Io { path, source }
  }
}
