use serde::{Deserialize, Serialize};

/// A monitored service and the nodes it applies to.
///
/// A service with no `roles` and no `capabilities` applies to every node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDef {
  pub name: String,
  pub check: CheckDef,
  #[serde(default)]
  pub roles: Vec<String>,
  #[serde(default)]
  pub capabilities: Vec<String>,
  /// Command run on the node once per sweep when the check fails.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub remediation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckDef {
  /// Authenticated session to the node succeeds.
  Reachability,
  /// HTTP GET against a node-hosted endpoint.
  Http {
    /// Defaults to the node's inference port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    path: String,
    /// When set, the body is decoded as a model inventory and fewer models
    /// than this marks the service degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    min_models: Option<usize>,
  },
  /// A command printing a single number compared against thresholds.
  Resource {
    command: String,
    warn: f64,
    critical: f64,
  },
}
