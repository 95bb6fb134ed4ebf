//! Remote executor implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use edgefleet_registry::Node;
use tracing::{info, instrument, warn};

use crate::request::{ExecutionRequest, Identity, Operation};
use crate::result::{ErrorDetail, ExecStatus, ExecutionResult};
use crate::transport::{Transport, TransportError};

/// How an execution fell short, before it is stamped into a result.
enum Shortfall {
  TimedOut,
  Failed(ErrorDetail),
}

impl From<TransportError> for Shortfall {
  fn from(err: TransportError) -> Self {
    match err {
      TransportError::Timeout(_) => Shortfall::TimedOut,
      TransportError::Auth(message) => Shortfall::Failed(ErrorDetail::Auth { message }),
      TransportError::Connect(message) => Shortfall::Failed(ErrorDetail::Connect { message }),
      TransportError::Other(message) => Shortfall::Failed(ErrorDetail::Transport { message }),
    }
  }
}

/// Runs requests against single nodes.
///
/// Stateless across calls; cloning shares the transport.
#[derive(Clone)]
pub struct RemoteExecutor {
  transport: Arc<dyn Transport>,
  /// Per-node credential for commands that carry no identity of their own.
  identities: Arc<HashMap<String, Identity>>,
}

impl RemoteExecutor {
  pub fn new(transport: Arc<dyn Transport>) -> Self {
    Self {
      transport,
      identities: Arc::default(),
    }
  }

  /// Authenticate commands without an explicit identity with the key mapped
  /// to their node. Unmapped nodes fall back to the transport's default.
  pub fn with_identities(mut self, identities: HashMap<String, Identity>) -> Self {
    self.identities = Arc::new(identities);
    self
  }

  pub fn identity_for(&self, node: &str) -> Option<&Identity> {
    self.identities.get(node)
  }

  /// Execute one request, returning no later than `request.deadline`.
  ///
  /// The in-flight transport future is dropped when the deadline passes,
  /// which closes its session. Failures are reported in the result, never as
  /// an error.
  #[instrument(
    name = "remote_execute",
    skip(self, node, request),
    fields(
      node = %node.name,
      kind = request.operation.kind(),
      idempotency = ?request.idempotency,
    )
  )]
  pub async fn execute(&self, node: &Node, request: &ExecutionRequest) -> ExecutionResult {
    let started = Instant::now();
    let outcome = tokio::time::timeout(request.deadline, self.execute_inner(node, request)).await;
    let elapsed = started.elapsed();

    let result = match outcome {
      Ok(Ok(output)) => ExecutionResult::success(&node.name, output, elapsed),
      Ok(Err(Shortfall::Failed(detail))) => ExecutionResult::failure(&node.name, detail, elapsed),
      Ok(Err(Shortfall::TimedOut)) | Err(_) => {
        ExecutionResult::timeout(&node.name, request.deadline, elapsed)
      }
    };

    match (&result.status, &result.error) {
      (ExecStatus::Success, _) => {
        info!(duration_ms = elapsed.as_millis() as u64, "execution_succeeded");
      }
      (ExecStatus::Timeout, _) => {
        warn!(deadline_ms = request.deadline.as_millis() as u64, "execution_timed_out");
      }
      (ExecStatus::Failure, Some(ErrorDetail::Auth { message })) => {
        warn!(error = %message, "execution_auth_rejected");
      }
      (ExecStatus::Failure, error) => {
        warn!(error = ?error, "execution_failed");
      }
    }

    result
  }

  async fn execute_inner(&self, node: &Node, request: &ExecutionRequest) -> Result<Bytes, Shortfall> {
    match &request.operation {
      Operation::Command { command, identity } => {
        let identity = identity.as_ref().or_else(|| self.identity_for(&node.name));
        let output = self.transport.exec(node, identity, command).await?;
        if output.exit_code == 0 {
          Ok(output.stdout)
        } else {
          Err(Shortfall::Failed(ErrorDetail::Exit {
            code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
          }))
        }
      }
      Operation::Http(probe) => {
        let response = self.transport.http(node, probe).await?;
        if (200..300).contains(&response.status) {
          Ok(response.body)
        } else {
          Err(Shortfall::Failed(ErrorDetail::Http {
            status: response.status,
            body: String::from_utf8_lossy(&response.body)
              .chars()
              .take(512)
              .collect(),
          }))
        }
      }
    }
  }
}
