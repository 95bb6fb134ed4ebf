use async_trait::async_trait;
use bytes::Bytes;
use edgefleet_registry::Node;

use crate::request::{HttpProbe, Identity, RemoteCommand};

/// Captured output of a remote command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
  pub exit_code: i32,
  pub stdout: Bytes,
  pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Bytes,
}

/// Failures below the level of "the command ran and exited".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
  #[error("authentication rejected: {0}")]
  Auth(String),

  #[error("connection failed: {0}")]
  Connect(String),

  /// The transport's own connect or read timeout fired.
  #[error("timed out: {0}")]
  Timeout(String),

  #[error("{0}")]
  Other(String),
}

/// The wire layer under the executor.
///
/// Implementations must release the underlying connection or session when the
/// returned future is dropped; the executor drops it at the deadline.
#[async_trait]
pub trait Transport: Send + Sync {
  /// Run a command on the node and wait for it to exit.
  async fn exec(
    &self,
    node: &Node,
    identity: Option<&Identity>,
    command: &RemoteCommand,
  ) -> Result<CommandOutput, TransportError>;

  /// Issue an HTTP request against the node.
  async fn http(&self, node: &Node, probe: &HttpProbe) -> Result<HttpResponse, TransportError>;
}
