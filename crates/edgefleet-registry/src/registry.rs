use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use edgefleet_config::FleetDef;
use tokio::fs;
use tracing::info;

use crate::error::RegistryError;
use crate::filter::NodeFilter;
use crate::node::Node;

/// Read and parse a fleet file without validating it.
pub async fn read_fleet(path: &Path) -> Result<FleetDef, RegistryError> {
  let content = fs::read_to_string(path).await?;
  let fleet: FleetDef = serde_json::from_str(&content)?;
  Ok(fleet)
}

/// The loaded set of fleet members.
///
/// Read-only after construction, so it can be shared across tasks without
/// locking.
#[derive(Debug, Clone)]
pub struct Registry {
  nodes: BTreeMap<String, Node>,
}

impl Registry {
  /// Read a fleet file and build a registry from it.
  pub async fn load(path: &Path) -> Result<Self, RegistryError> {
    let fleet = read_fleet(path).await?;
    Self::from_def(&fleet)
  }

  /// Validate a fleet definition and lower it into nodes.
  ///
  /// Fails on the first entry with an empty name, a missing address, a name
  /// already taken, or an address already claimed by another node.
  pub fn from_def(fleet: &FleetDef) -> Result<Self, RegistryError> {
    let mut nodes = BTreeMap::new();
    let mut addresses: HashMap<String, String> = HashMap::new();

    for (index, def) in fleet.nodes.iter().enumerate() {
      let name = def.name.trim();
      if name.is_empty() {
        return Err(RegistryError::EmptyName { index });
      }

      let address = def
        .address
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| RegistryError::MissingAddress {
          name: name.to_string(),
        })?;

      if nodes.contains_key(name) {
        return Err(RegistryError::DuplicateName {
          name: name.to_string(),
        });
      }

      if let Some(first) = addresses.get(address) {
        return Err(RegistryError::DuplicateAddress {
          address: address.to_string(),
          first: first.clone(),
          second: name.to_string(),
        });
      }
      addresses.insert(address.to_string(), name.to_string());

      let node = Node {
        name: name.to_string(),
        address: address.to_string(),
        role: def.role.as_str().into(),
        capabilities: def.capabilities.iter().cloned().collect(),
        ssh_user: def.ssh_user.clone().unwrap_or_else(|| fleet.ssh.user.clone()),
        ssh_port: def.ssh_port.unwrap_or(fleet.ssh.port),
        inference_port: def
          .inference_port
          .unwrap_or(fleet.defaults.inference_port),
      };
      nodes.insert(node.name.clone(), node);
    }

    info!(nodes = nodes.len(), "registry_loaded");

    Ok(Self { nodes })
  }

  /// Build a registry directly from nodes, applying the same uniqueness rules.
  pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Result<Self, RegistryError> {
    let mut map = BTreeMap::new();
    let mut addresses: HashMap<String, String> = HashMap::new();

    for node in nodes {
      if map.contains_key(&node.name) {
        return Err(RegistryError::DuplicateName { name: node.name });
      }
      if let Some(first) = addresses.get(&node.address) {
        return Err(RegistryError::DuplicateAddress {
          address: node.address.clone(),
          first: first.clone(),
          second: node.name,
        });
      }
      addresses.insert(node.address.clone(), node.name.clone());
      map.insert(node.name.clone(), node);
    }

    Ok(Self { nodes: map })
  }

  pub fn lookup(&self, name: &str) -> Result<&Node, RegistryError> {
    self
      .nodes
      .get(name)
      .ok_or_else(|| RegistryError::NotFound(name.to_string()))
  }

  /// All nodes, ordered by name.
  pub fn nodes(&self) -> Vec<Node> {
    self.nodes.values().cloned().collect()
  }

  pub fn filter(&self, filter: &NodeFilter) -> Vec<Node> {
    self.filter_by(|node| filter.matches(node))
  }

  pub fn filter_by(&self, predicate: impl Fn(&Node) -> bool) -> Vec<Node> {
    self
      .nodes
      .values()
      .filter(|node| predicate(node))
      .cloned()
      .collect()
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }
}
