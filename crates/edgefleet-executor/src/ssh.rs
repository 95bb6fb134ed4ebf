//! Remote commands over the system `ssh` client.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use edgefleet_registry::Node;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::request::{Identity, RemoteCommand};
use crate::transport::{CommandOutput, TransportError};

/// Exit status the OpenSSH client uses for its own errors.
const SSH_CLIENT_ERROR: i32 = 255;

#[derive(Debug, Clone)]
pub struct SshOptions {
  /// Client binary, `ssh` unless overridden.
  pub program: PathBuf,
  pub connect_timeout: Duration,
  /// Key used when a request carries no identity.
  pub default_identity: Option<PathBuf>,
}

impl Default for SshOptions {
  fn default() -> Self {
    Self {
      program: PathBuf::from("ssh"),
      connect_timeout: Duration::from_secs(5),
      default_identity: None,
    }
  }
}

/// Runs commands through non-interactive `ssh` sessions.
///
/// The child process is spawned with `kill_on_drop`, so dropping the future at
/// a deadline tears the session down instead of leaking it.
#[derive(Debug, Clone, Default)]
pub struct SshClient {
  options: SshOptions,
}

impl SshClient {
  pub fn new(options: SshOptions) -> Self {
    Self { options }
  }

  pub async fn exec(
    &self,
    node: &Node,
    identity: Option<&Identity>,
    command: &RemoteCommand,
  ) -> Result<CommandOutput, TransportError> {
    let args = self.build_args(node, identity, &command.script);
    debug!(node = %node.name, program = %self.options.program.display(), "ssh_spawn");

    let mut child = Command::new(&self.options.program)
      .args(&args)
      .stdin(if command.stdin.is_some() {
        Stdio::piped()
      } else {
        Stdio::null()
      })
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()
      .map_err(|e| TransportError::Other(format!("failed to spawn ssh: {}", e)))?;

    let stdin = child.stdin.take();
    let payload = command.stdin.clone();
    let feed = async move {
      if let (Some(mut pipe), Some(data)) = (stdin, payload) {
        pipe.write_all(&data).await?;
        pipe.shutdown().await?;
      }
      Ok::<(), std::io::Error>(())
    };

    let (fed, output) = tokio::join!(feed, child.wait_with_output());
    let output = output.map_err(|e| TransportError::Other(format!("ssh wait failed: {}", e)))?;
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let exit_code = output.status.code().unwrap_or(-1);

    if exit_code == SSH_CLIENT_ERROR
      && let Some(err) = classify_client_error(&stderr)
    {
      return Err(err);
    }

    if let Err(e) = fed {
      // The remote side closed stdin early; only an error if the command also failed.
      if exit_code != 0 {
        return Err(TransportError::Other(format!("failed to write stdin: {}", e)));
      }
    }

    Ok(CommandOutput {
      exit_code,
      stdout: Bytes::from(output.stdout),
      stderr,
    })
  }

  fn build_args(&self, node: &Node, identity: Option<&Identity>, script: &str) -> Vec<String> {
    let mut args = vec![
      "-p".to_string(),
      node.ssh_port.to_string(),
      "-o".to_string(),
      "BatchMode=yes".to_string(),
      "-o".to_string(),
      format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)),
      "-o".to_string(),
      "StrictHostKeyChecking=accept-new".to_string(),
    ];

    let key = identity
      .map(|i| i.private_key.clone())
      .or_else(|| self.options.default_identity.clone());
    if let Some(key) = key {
      args.push("-i".to_string());
      args.push(key.display().to_string());
      args.push("-o".to_string());
      args.push("IdentitiesOnly=yes".to_string());
    }

    let user = identity.and_then(|i| i.user.as_deref()).unwrap_or(&node.ssh_user);
    args.push(format!("{}@{}", user, node.address));
    args.push("--".to_string());
    args.push(script.to_string());
    args
  }
}

/// Map an OpenSSH client failure to a transport error.
///
/// Returns `None` when stderr does not look like a client-side failure, in
/// which case exit 255 came from the remote command itself.
fn classify_client_error(stderr: &str) -> Option<TransportError> {
  let message = stderr.trim().lines().last().unwrap_or_default().to_string();
  let lower = stderr.to_ascii_lowercase();

  if lower.contains("permission denied")
    || lower.contains("too many authentication failures")
    || lower.contains("no supported authentication methods")
  {
    Some(TransportError::Auth(message))
  } else if lower.contains("timed out") {
    Some(TransportError::Timeout(message))
  } else if lower.contains("connection refused")
    || lower.contains("no route to host")
    || lower.contains("could not resolve hostname")
    || lower.contains("network is unreachable")
    || lower.contains("connection closed")
    || lower.contains("connection reset")
  {
    Some(TransportError::Connect(message))
  } else {
    None
  }
}
