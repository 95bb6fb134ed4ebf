//! Execution results.

use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
  Success,
  Failure,
  Timeout,
}

/// Why an execution did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorDetail {
  /// The remote command ran and exited non-zero.
  #[error("exit code {code}: {stderr}")]
  Exit { code: i32, stderr: String },

  /// The node rejected the credential. Distinct from the node being down.
  #[error("authentication rejected: {message}")]
  Auth { message: String },

  /// The endpoint answered with a non-2xx status.
  #[error("http status {status}")]
  Http { status: u16, body: String },

  /// The node could not be reached (refused, no route, resolution failure).
  #[error("connection failed: {message}")]
  Connect { message: String },

  #[error("deadline of {deadline_ms}ms exceeded")]
  Timeout { deadline_ms: u64 },

  /// Local transport failure (spawn error, malformed URL, decode error).
  #[error("transport error: {message}")]
  Transport { message: String },

  /// The per-node task died before producing a result.
  #[error("execution aborted: {message}")]
  Aborted { message: String },
}

/// The outcome of one request against one node. A value: never mutated after
/// the executor returns it.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
  pub node: String,
  pub status: ExecStatus,
  /// Stdout for commands, response body for HTTP probes.
  #[serde(serialize_with = "serialize_lossy")]
  pub output: Bytes,
  /// Present iff `status` is not `Success`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<ErrorDetail>,
  #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
  pub duration: Duration,
}

impl ExecutionResult {
  pub fn success(node: impl Into<String>, output: Bytes, duration: Duration) -> Self {
    Self {
      node: node.into(),
      status: ExecStatus::Success,
      output,
      error: None,
      duration,
    }
  }

  pub fn failure(node: impl Into<String>, error: ErrorDetail, duration: Duration) -> Self {
    Self {
      node: node.into(),
      status: ExecStatus::Failure,
      output: Bytes::new(),
      error: Some(error),
      duration,
    }
  }

  pub fn timeout(node: impl Into<String>, deadline: Duration, duration: Duration) -> Self {
    Self {
      node: node.into(),
      status: ExecStatus::Timeout,
      output: Bytes::new(),
      error: Some(ErrorDetail::Timeout {
        deadline_ms: deadline.as_millis() as u64,
      }),
      duration,
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == ExecStatus::Success
  }

  pub fn is_auth_error(&self) -> bool {
    matches!(self.error, Some(ErrorDetail::Auth { .. }))
  }

  /// Output decoded as UTF-8, lossily.
  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.output).into_owned()
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
    serde_json::from_slice(&self.output)
  }
}

fn serialize_lossy<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_u64(duration.as_millis() as u64)
}
