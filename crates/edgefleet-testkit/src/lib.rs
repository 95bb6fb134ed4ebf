//! In-memory fleet for exercising edgefleet without real hosts.
//!
//! [`SimulatedFleet`] implements [`Transport`]: each node has a link state,
//! an authorized key list, canned HTTP responses and scripted command
//! handlers. Key management uses the small `sim-keys` vocabulary from
//! [`keys`] so tests can drive credential rotation end to end.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use edgefleet_executor::{
  CommandOutput, HttpProbe, HttpResponse, Identity, RemoteCommand, RemoteExecutor, Transport,
  TransportError,
};
use edgefleet_registry::Node;

/// Command vocabulary understood by the simulated key store.
pub mod keys {
  pub const APPEND: &str = "sim-keys append ";
  pub const REMOVE: &str = "sim-keys remove ";
  pub const LIST: &str = "sim-keys list";

  pub fn append(public_key: &str) -> String {
    format!("{APPEND}{public_key}")
  }

  pub fn remove(public_key: &str) -> String {
    format!("{REMOVE}{public_key}")
  }

  /// Key type and blob, without the comment.
  pub fn key_id(line: &str) -> String {
    line.split_whitespace().take(2).collect::<Vec<_>>().join(" ")
  }
}

/// Network state of a simulated node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
  Up,
  /// Connections are refused immediately.
  Refused,
  /// Connections never complete.
  Hang,
}

pub type Handler = Arc<dyn Fn(&mut SimNode, &RemoteCommand) -> CommandOutput + Send + Sync>;

/// One simulated host.
#[derive(Clone)]
pub struct SimNode {
  pub link: Link,
  pub latency: Duration,
  pub authorized_keys: Vec<String>,
  /// Appends report success but the key never becomes usable.
  pub ignores_new_keys: bool,
  pub http: HashMap<(u16, String), (u16, Bytes)>,
  pub handlers: HashMap<String, Handler>,
  pub log: Vec<String>,
}

impl Default for SimNode {
  fn default() -> Self {
    Self {
      link: Link::Up,
      latency: Duration::ZERO,
      authorized_keys: Vec::new(),
      ignores_new_keys: false,
      http: HashMap::new(),
      handlers: HashMap::new(),
      log: Vec::new(),
    }
  }
}

impl SimNode {
  fn accepts(&self, public_key: &str) -> bool {
    let id = keys::key_id(public_key);
    self.authorized_keys.iter().any(|k| keys::key_id(k) == id)
  }

  fn run(&mut self, command: &RemoteCommand) -> CommandOutput {
    let script = command.script.as_str();
    if let Some(handler) = self.handlers.get(script).cloned() {
      return handler(self, command);
    }
    if let Some(key) = script.strip_prefix(keys::APPEND) {
      if !self.ignores_new_keys && !self.accepts(key) {
        self.authorized_keys.push(key.to_string());
      }
      return ok("");
    }
    if let Some(key) = script.strip_prefix(keys::REMOVE) {
      let id = keys::key_id(key);
      self.authorized_keys.retain(|k| keys::key_id(k) != id);
      return ok("");
    }
    if script == keys::LIST {
      let mut listing = self.authorized_keys.join("\n");
      listing.push('\n');
      return ok(&listing);
    }
    match script {
      "true" => ok(""),
      _ => CommandOutput {
        exit_code: 127,
        stdout: Bytes::new(),
        stderr: format!("sh: {script}: command not found"),
      },
    }
  }
}

/// Successful command output with the given stdout.
pub fn ok(stdout: &str) -> CommandOutput {
  CommandOutput {
    exit_code: 0,
    stdout: Bytes::from(stdout.to_string()),
    stderr: String::new(),
  }
}

/// Failed command output with the given exit code and stderr.
pub fn fail(exit_code: i32, stderr: &str) -> CommandOutput {
  CommandOutput {
    exit_code,
    stdout: Bytes::new(),
    stderr: stderr.to_string(),
  }
}

/// A shared, mutable set of simulated nodes.
#[derive(Clone, Default)]
pub struct SimulatedFleet {
  nodes: Arc<Mutex<HashMap<String, SimNode>>>,
  /// Public key offered for commands that name no identity.
  default_key: Arc<Mutex<Option<String>>>,
}

impl SimulatedFleet {
  /// A fleet with every node up and nothing authorized.
  pub fn new(nodes: &[Node]) -> Self {
    let fleet = Self::default();
    {
      let mut state = fleet.state();
      for node in nodes {
        state.insert(node.name.clone(), SimNode::default());
      }
    }
    fleet
  }

  pub fn executor(&self) -> RemoteExecutor {
    RemoteExecutor::new(Arc::new(self.clone()))
  }

  fn state(&self) -> MutexGuard<'_, HashMap<String, SimNode>> {
    self.nodes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Mutate one node. Panics if the node was never added.
  pub fn update<R>(&self, name: &str, f: impl FnOnce(&mut SimNode) -> R) -> R {
    let mut state = self.state();
    let node = state
      .get_mut(name)
      .unwrap_or_else(|| panic!("no simulated node '{name}'"));
    f(node)
  }

  pub fn set_link(&self, name: &str, link: Link) {
    self.update(name, |n| n.link = link);
  }

  pub fn set_latency(&self, name: &str, latency: Duration) {
    self.update(name, |n| n.latency = latency);
  }

  pub fn authorize(&self, name: &str, public_key: &str) {
    self.update(name, |n| n.authorized_keys.push(public_key.to_string()));
  }

  pub fn authorize_all(&self, public_key: &str) {
    for node in self.state().values_mut() {
      node.authorized_keys.push(public_key.to_string());
    }
  }

  pub fn authorized_keys(&self, name: &str) -> Vec<String> {
    self.update(name, |n| n.authorized_keys.clone())
  }

  /// Offer `public_key` for commands that carry no identity, the way `ssh`
  /// falls back to its configured key. Until this is called such commands
  /// are let through.
  pub fn use_default_key(&self, public_key: &str) {
    *self
      .default_key
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(public_key.to_string());
  }

  fn default_key(&self) -> Option<String> {
    self
      .default_key
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .clone()
  }

  pub fn ignore_new_keys(&self, name: &str, ignore: bool) {
    self.update(name, |n| n.ignores_new_keys = ignore);
  }

  pub fn serve(&self, name: &str, port: u16, path: &str, status: u16, body: impl Into<Bytes>) {
    let body = body.into();
    self.update(name, |n| {
      n.http.insert((port, path.to_string()), (status, body));
    });
  }

  /// Register a handler for an exact command script. Handlers run under the
  /// fleet lock and must change state through their `SimNode` argument.
  pub fn on_command(
    &self,
    name: &str,
    script: &str,
    handler: impl Fn(&mut SimNode, &RemoteCommand) -> CommandOutput + Send + Sync + 'static,
  ) {
    let handler: Handler = Arc::new(handler);
    self.update(name, |n| {
      n.handlers.insert(script.to_string(), handler);
    });
  }

  /// Register a fixed response for an exact command script.
  pub fn respond(&self, name: &str, script: &str, output: CommandOutput) {
    self.on_command(name, script, move |_, _| output.clone());
  }

  /// Every command script this node has been asked to run, in order.
  pub fn commands(&self, name: &str) -> Vec<String> {
    self.update(name, |n| n.log.clone())
  }

  /// Snapshot link and latency, failing fast on refused connections.
  fn connect(&self, node: &Node) -> Result<(Link, Duration), TransportError> {
    let state = self.state();
    let sim = state
      .get(&node.name)
      .ok_or_else(|| TransportError::Connect(format!("ssh: Could not resolve hostname {}", node.address)))?;
    if sim.link == Link::Refused {
      return Err(TransportError::Connect(format!(
        "ssh: connect to host {} port {}: Connection refused",
        node.address, node.ssh_port
      )));
    }
    Ok((sim.link, sim.latency))
  }

  async fn settle(link: Link, latency: Duration) {
    if link == Link::Hang {
      std::future::pending::<()>().await;
    }
    if !latency.is_zero() {
      tokio::time::sleep(latency).await;
    }
  }
}

#[async_trait]
impl Transport for SimulatedFleet {
  async fn exec(
    &self,
    node: &Node,
    identity: Option<&Identity>,
    command: &RemoteCommand,
  ) -> Result<CommandOutput, TransportError> {
    let (link, latency) = self.connect(node)?;
    Self::settle(link, latency).await;

    let offered = match identity {
      Some(identity) => Some(identity.public_key.clone()),
      None => self.default_key(),
    };
    let mut state = self.state();
    let sim = state
      .get_mut(&node.name)
      .ok_or_else(|| TransportError::Connect(format!("{} vanished", node.name)))?;
    if let Some(key) = offered
      && !sim.accepts(&key)
    {
      return Err(TransportError::Auth(format!(
        "{}@{}: Permission denied (publickey).",
        node.ssh_user, node.address
      )));
    }
    sim.log.push(command.script.clone());
    Ok(sim.run(command))
  }

  async fn http(&self, node: &Node, probe: &HttpProbe) -> Result<HttpResponse, TransportError> {
    let (link, latency) = self.connect(node)?;
    Self::settle(link, latency).await;

    let state = self.state();
    let response = state
      .get(&node.name)
      .and_then(|sim| sim.http.get(&(probe.port, probe.path.clone())).cloned());
    match response {
      Some((status, body)) => Ok(HttpResponse { status, body }),
      None => Err(TransportError::Connect(format!(
        "error sending request for url (http://{}:{}{}): connection refused",
        node.address, probe.port, probe.path
      ))),
    }
  }
}

/// The reference seven-node fleet.
pub fn reference_nodes() -> Vec<Node> {
  vec![
    Node::new("pi51", "192.168.1.147", "gateway"),
    Node::new("agx0", "192.168.1.154", "primary-ai").with_capability("has-gpu"),
    Node::new("orin0", "192.168.1.157", "secondary-ai").with_capability("has-gpu"),
    Node::new("pi52", "192.168.1.247", "backend").with_capability("nfs-server"),
    Node::new("pi41", "192.168.1.204", "utility"),
    Node::new("nano", "192.168.1.159", "edge").with_capability("has-gpu"),
    Node::new("pi31", "192.168.1.234", "legacy"),
  ]
}

/// Nodes from the reference fleet with the given names, in the given order.
pub fn pick(names: &[&str]) -> Vec<Node> {
  let all = reference_nodes();
  names
    .iter()
    .filter_map(|name| all.iter().find(|n| n.name == *name).cloned())
    .collect()
}

#[cfg(test)]
mod tests {
  use edgefleet_executor::{ExecutionRequest, ExecStatus};

  use super::*;

  fn identity(public_key: &str) -> Identity {
    Identity::new("/tmp/key", public_key)
  }

  #[tokio::test]
  async fn test_key_vocabulary_and_auth() {
    let nodes = pick(&["agx0"]);
    let fleet = SimulatedFleet::new(&nodes);
    fleet.authorize("agx0", "ssh-ed25519 AAAAold edgefleet");
    let executor = fleet.executor();
    let old = identity("ssh-ed25519 AAAAold edgefleet");
    let new = identity("ssh-ed25519 AAAAnew edgefleet");

    let denied = executor
      .execute(&nodes[0], &ExecutionRequest::command("true", Duration::from_secs(1)).with_identity(new.clone()))
      .await;
    assert!(denied.is_auth_error());

    let append = ExecutionRequest::command(keys::append("ssh-ed25519 AAAAnew other-comment"), Duration::from_secs(1))
      .with_identity(old);
    assert!(executor.execute(&nodes[0], &append).await.is_success());

    let allowed = executor
      .execute(&nodes[0], &ExecutionRequest::command("true", Duration::from_secs(1)).with_identity(new))
      .await;
    assert_eq!(allowed.status, ExecStatus::Success);
    assert_eq!(fleet.authorized_keys("agx0").len(), 2);
  }

  #[tokio::test]
  async fn test_default_key_is_checked_for_anonymous_commands() {
    let nodes = pick(&["agx0"]);
    let fleet = SimulatedFleet::new(&nodes);
    let executor = fleet.executor();
    let request = ExecutionRequest::command("true", Duration::from_secs(1));

    assert!(executor.execute(&nodes[0], &request).await.is_success());

    fleet.use_default_key("ssh-ed25519 AAAAold edgefleet");
    assert!(executor.execute(&nodes[0], &request).await.is_auth_error());

    fleet.authorize("agx0", "ssh-ed25519 AAAAold edgefleet");
    assert!(executor.execute(&nodes[0], &request).await.is_success());
  }

  #[tokio::test]
  async fn test_unknown_command_exits_127() {
    let nodes = pick(&["pi31"]);
    let fleet = SimulatedFleet::new(&nodes);
    let result = fleet
      .executor()
      .execute(&nodes[0], &ExecutionRequest::command("uptime", Duration::from_secs(1)))
      .await;
    assert_eq!(result.status, ExecStatus::Failure);
  }
}
