//! Execution requests.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Whether repeating a request could change the outcome.
///
/// The executor never retries on its own; the class is carried so callers and
/// logs can tell a harmless re-run from one that needs an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyClass {
  SafeToRetry,
  NotSafe,
}

/// The credential used to open a session.
///
/// `None` on a request means "whatever the transport is configured with".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
  /// Login user; the node's `ssh_user` when unset.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user: Option<String>,
  pub private_key: PathBuf,
  /// The matching OpenSSH public key line.
  pub public_key: String,
}

impl Identity {
  pub fn new(private_key: impl Into<PathBuf>, public_key: impl Into<String>) -> Self {
    Self {
      user: None,
      private_key: private_key.into(),
      public_key: public_key.into(),
    }
  }

  pub fn with_user(mut self, user: impl Into<String>) -> Self {
    self.user = Some(user.into());
    self
  }
}

/// A shell command, optionally fed a payload on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
  pub script: String,
  pub stdin: Option<Bytes>,
}

impl RemoteCommand {
  pub fn new(script: impl Into<String>) -> Self {
    Self {
      script: script.into(),
      stdin: None,
    }
  }

  pub fn with_stdin(mut self, data: impl Into<Bytes>) -> Self {
    self.stdin = Some(data.into());
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
  Get,
  Post,
}

/// An HTTP request against a node-hosted endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpProbe {
  pub method: HttpMethod,
  pub port: u16,
  pub path: String,
  pub body: Option<serde_json::Value>,
}

impl HttpProbe {
  pub fn get(port: u16, path: impl Into<String>) -> Self {
    Self {
      method: HttpMethod::Get,
      port,
      path: path.into(),
      body: None,
    }
  }

  pub fn post(port: u16, path: impl Into<String>, body: serde_json::Value) -> Self {
    Self {
      method: HttpMethod::Post,
      port,
      path: path.into(),
      body: Some(body),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
  Command {
    command: RemoteCommand,
    identity: Option<Identity>,
  },
  Http(HttpProbe),
}

impl Operation {
  pub fn kind(&self) -> &'static str {
    match self {
      Operation::Command { .. } => "command",
      Operation::Http(_) => "http",
    }
  }
}

/// One operation to run against one node.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
  pub operation: Operation,
  /// Hard upper bound on the call, enforced by the executor.
  pub deadline: Duration,
  pub idempotency: IdempotencyClass,
}

impl ExecutionRequest {
  /// A command authenticated with the transport's default credential.
  pub fn command(script: impl Into<String>, deadline: Duration) -> Self {
    Self {
      operation: Operation::Command {
        command: RemoteCommand::new(script),
        identity: None,
      },
      deadline,
      idempotency: IdempotencyClass::SafeToRetry,
    }
  }

  pub fn http(probe: HttpProbe, deadline: Duration) -> Self {
    let idempotency = match probe.method {
      HttpMethod::Get => IdempotencyClass::SafeToRetry,
      HttpMethod::Post => IdempotencyClass::NotSafe,
    };
    Self {
      operation: Operation::Http(probe),
      deadline,
      idempotency,
    }
  }

  pub fn remote(command: RemoteCommand, deadline: Duration) -> Self {
    Self {
      operation: Operation::Command {
        command,
        identity: None,
      },
      deadline,
      idempotency: IdempotencyClass::SafeToRetry,
    }
  }

  /// Authenticate the command with a specific key. No effect on HTTP probes.
  pub fn with_identity(mut self, identity: Identity) -> Self {
    if let Operation::Command { identity: slot, .. } = &mut self.operation {
      *slot = Some(identity);
    }
    self
  }

  pub fn not_idempotent(mut self) -> Self {
    self.idempotency = IdempotencyClass::NotSafe;
    self
  }

  pub fn with_deadline(mut self, deadline: Duration) -> Self {
    self.deadline = deadline;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_identity_only_applies_to_commands() {
    let identity = Identity::new("/tmp/k", "ssh-ed25519 AAAA test");

    let cmd = ExecutionRequest::command("true", Duration::from_secs(1)).with_identity(identity.clone());
    assert!(matches!(
      cmd.operation,
      Operation::Command { identity: Some(ref i), .. } if *i == identity
    ));

    let probe = ExecutionRequest::http(HttpProbe::get(11434, "/api/tags"), Duration::from_secs(1))
      .with_identity(identity);
    assert!(matches!(probe.operation, Operation::Http(_)));
  }

  #[test]
  fn test_post_probes_are_not_idempotent() {
    let req = ExecutionRequest::http(
      HttpProbe::post(11434, "/api/pull", serde_json::json!({"name": "phi3:mini"})),
      Duration::from_secs(1),
    );
    assert_eq!(req.idempotency, IdempotencyClass::NotSafe);
  }
}
