use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactsDef;
use crate::health::HealthDef;
use crate::node::NodeDef;
use crate::service::ServiceDef;

/// The top-level fleet file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetDef {
  #[serde(default)]
  pub ssh: SshDef,
  #[serde(default)]
  pub defaults: DefaultsDef,
  pub nodes: Vec<NodeDef>,
  #[serde(default)]
  pub services: Vec<ServiceDef>,
  #[serde(default)]
  pub health: HealthDef,
  #[serde(default)]
  pub artifacts: ArtifactsDef,
}

/// Fleet-wide SSH settings. The fleet shares one login user and one keypair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshDef {
  #[serde(default = "default_user")]
  pub user: String,
  #[serde(default = "default_ssh_port")]
  pub port: u16,
  #[serde(default = "default_connect_timeout")]
  pub connect_timeout_secs: u64,
  /// Key used when no credential ledger exists yet.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub identity_file: Option<String>,
}

impl Default for SshDef {
  fn default() -> Self {
    Self {
      user: default_user(),
      port: default_ssh_port(),
      connect_timeout_secs: default_connect_timeout(),
      identity_file: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsDef {
  /// Per-node deadline for a single remote operation.
  #[serde(default = "default_deadline_ms")]
  pub deadline_ms: u64,
  /// Port the inference server listens on when a node does not override it.
  #[serde(default = "default_inference_port")]
  pub inference_port: u16,
}

impl Default for DefaultsDef {
  fn default() -> Self {
    Self {
      deadline_ms: default_deadline_ms(),
      inference_port: default_inference_port(),
    }
  }
}

fn default_user() -> String {
  "ubuntu".to_string()
}

fn default_ssh_port() -> u16 {
  22
}

fn default_connect_timeout() -> u64 {
  5
}

fn default_deadline_ms() -> u64 {
  10_000
}

fn default_inference_port() -> u16 {
  11434
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::CheckDef;

  #[test]
  fn test_parse_minimal_fleet() {
    let fleet: FleetDef = serde_json::from_str(
      r#"{ "nodes": [ { "name": "agx0", "address": "192.168.1.154", "role": "primary-ai" } ] }"#,
    )
    .unwrap();

    assert_eq!(fleet.nodes.len(), 1);
    assert_eq!(fleet.ssh.user, "ubuntu");
    assert_eq!(fleet.ssh.port, 22);
    assert_eq!(fleet.defaults.deadline_ms, 10_000);
    assert_eq!(fleet.health.failure_threshold, 3);
    assert!(fleet.services.is_empty());
    assert!(fleet.nodes[0].capabilities.is_empty());
  }

  #[test]
  fn test_parse_service_checks() {
    let fleet: FleetDef = serde_json::from_str(
      r#"{
        "nodes": [],
        "services": [
          { "name": "ssh", "check": { "type": "reachability" } },
          { "name": "ollama",
            "check": { "type": "http", "port": 11434, "path": "/api/tags", "min_models": 1 },
            "roles": ["primary-ai"],
            "remediation": "docker restart ollama" },
          { "name": "disk",
            "check": { "type": "resource", "command": "df --output=pcent / | tail -1", "warn": 80, "critical": 95 } }
        ]
      }"#,
    )
    .unwrap();

    assert_eq!(fleet.services.len(), 3);
    assert_eq!(fleet.services[0].check, CheckDef::Reachability);
    assert!(matches!(
      fleet.services[1].check,
      CheckDef::Http { port: Some(11434), min_models: Some(1), .. }
    ));
    assert_eq!(
      fleet.services[1].remediation.as_deref(),
      Some("docker restart ollama")
    );
    assert!(matches!(fleet.services[2].check, CheckDef::Resource { .. }));
  }
}
