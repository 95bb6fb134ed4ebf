use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known capability tags. Capabilities are free-form; these are the ones
/// the fleet file uses today.
pub mod capability {
  pub const HAS_GPU: &str = "has-gpu";
  pub const NFS_SERVER: &str = "nfs-server";
  pub const NFS_CLIENT: &str = "nfs-client";
}

/// The part a node plays in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
  Gateway,
  PrimaryAi,
  SecondaryAi,
  Backend,
  Utility,
  Edge,
  Legacy,
  Other(String),
}

impl Role {
  pub fn as_str(&self) -> &str {
    match self {
      Role::Gateway => "gateway",
      Role::PrimaryAi => "primary-ai",
      Role::SecondaryAi => "secondary-ai",
      Role::Backend => "backend",
      Role::Utility => "utility",
      Role::Edge => "edge",
      Role::Legacy => "legacy",
      Role::Other(s) => s,
    }
  }
}

impl From<&str> for Role {
  fn from(s: &str) -> Self {
    match s {
      "gateway" => Role::Gateway,
      "primary-ai" => Role::PrimaryAi,
      "secondary-ai" => Role::SecondaryAi,
      "backend" => Role::Backend,
      "utility" => Role::Utility,
      "edge" => Role::Edge,
      "legacy" => Role::Legacy,
      other => Role::Other(other.to_string()),
    }
  }
}

impl From<String> for Role {
  fn from(s: String) -> Self {
    Role::from(s.as_str())
  }
}

impl From<Role> for String {
  fn from(role: Role) -> Self {
    role.as_str().to_string()
  }
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A fleet member. Immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
  pub name: String,
  pub address: String,
  pub role: Role,
  pub capabilities: BTreeSet<String>,
  pub ssh_user: String,
  pub ssh_port: u16,
  pub inference_port: u16,
}

impl Node {
  /// Build a node with fleet-default SSH and inference settings. Mostly used
  /// by tests and tools that address a host outside a fleet file.
  pub fn new(name: impl Into<String>, address: impl Into<String>, role: impl Into<Role>) -> Self {
    Self {
      name: name.into(),
      address: address.into(),
      role: role.into(),
      capabilities: BTreeSet::new(),
      ssh_user: "ubuntu".to_string(),
      ssh_port: 22,
      inference_port: 11434,
    }
  }

  pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
    self.capabilities.insert(capability.into());
    self
  }

  pub fn has_capability(&self, capability: &str) -> bool {
    self.capabilities.contains(capability)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_role_round_trips_known_and_unknown() {
    assert_eq!(Role::from("primary-ai"), Role::PrimaryAi);
    assert_eq!(Role::from("legacy").to_string(), "legacy");
    assert_eq!(Role::from("camera"), Role::Other("camera".to_string()));
    assert_eq!(String::from(Role::Other("camera".to_string())), "camera");
  }

  #[test]
  fn test_role_serializes_as_string() {
    let json = serde_json::to_string(&Role::SecondaryAi).unwrap();
    assert_eq!(json, "\"secondary-ai\"");
  }
}
