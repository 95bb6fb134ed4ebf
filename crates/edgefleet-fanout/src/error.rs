use thiserror::Error;

/// Structural errors in a sweep request. Reported before any node is contacted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FanOutError {
  #[error("sweep requested over an empty node set")]
  EmptyNodeSet,

  #[error("node '{name}' appears more than once in the sweep")]
  DuplicateNode { name: String },
}
