use thiserror::Error;

/// Configuration errors. Any of these aborts before a remote operation runs.
#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("node entry #{index} has an empty name")]
  EmptyName { index: usize },

  #[error("node '{name}' has no address")]
  MissingAddress { name: String },

  #[error("duplicate node name: {name}")]
  DuplicateName { name: String },

  #[error("nodes '{first}' and '{second}' both claim address {address}")]
  DuplicateAddress {
    address: String,
    first: String,
    second: String,
  },

  #[error("node not found: {0}")]
  NotFound(String),

  #[error("failed to read fleet file: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to parse fleet file: {0}")]
  Parse(#[from] serde_json::Error),
}
