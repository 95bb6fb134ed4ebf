use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  pub name: String,
  /// Host reachable over the management network. Missing or empty is rejected
  /// by the registry.
  #[serde(default)]
  pub address: Option<String>,
  pub role: String,
  #[serde(default)]
  pub capabilities: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ssh_user: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ssh_port: Option<u16>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub inference_port: Option<u16>,
}
