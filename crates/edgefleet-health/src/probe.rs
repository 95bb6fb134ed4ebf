//! Service checks and how their results map to a status.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use edgefleet_artifact::ModelInventory;
use edgefleet_config::{CheckDef, ServiceDef};
use edgefleet_executor::{ErrorDetail, ExecStatus, ExecutionRequest, ExecutionResult, HttpProbe};
use edgefleet_registry::{Node, Role};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
  Up,
  Degraded,
  Down,
}

impl ServiceStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      ServiceStatus::Up => "up",
      ServiceStatus::Degraded => "degraded",
      ServiceStatus::Down => "down",
    }
  }

  /// Anything short of `Up` counts toward the consecutive-failure streak.
  pub fn is_failing(&self) -> bool {
    *self != ServiceStatus::Up
  }
}

impl fmt::Display for ServiceStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// What to ask a node to decide whether a service is healthy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Probe {
  /// An authenticated no-op command.
  Reachability,
  Http {
    /// `None` probes the node's inference port.
    port: Option<u16>,
    path: String,
    min_models: Option<usize>,
  },
  /// A command printing one number, optionally suffixed with `%`.
  Resource { command: String, warn: f64, critical: f64 },
}

/// Status of one service on one node, derived from one probe result.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
  pub status: ServiceStatus,
  pub detail: String,
}

impl Evaluation {
  fn new(status: ServiceStatus, detail: impl Into<String>) -> Self {
    Self {
      status,
      detail: detail.into(),
    }
  }
}

impl Probe {
  pub fn request(&self, node: &Node, deadline: Duration) -> ExecutionRequest {
    match self {
      Probe::Reachability => ExecutionRequest::command("true", deadline),
      Probe::Http { port, path, .. } => {
        ExecutionRequest::http(HttpProbe::get(port.unwrap_or(node.inference_port), path.clone()), deadline)
      }
      Probe::Resource { command, .. } => ExecutionRequest::command(command.clone(), deadline),
    }
  }

  pub fn evaluate(&self, result: &ExecutionResult) -> Evaluation {
    if result.status != ExecStatus::Success {
      return Evaluation::new(ServiceStatus::Down, failure_detail(result));
    }
    match self {
      Probe::Reachability => Evaluation::new(ServiceStatus::Up, "reachable"),
      Probe::Http { min_models: None, .. } => Evaluation::new(ServiceStatus::Up, "responding"),
      Probe::Http {
        min_models: Some(min), ..
      } => match result.json::<ModelInventory>() {
        Err(e) => Evaluation::new(ServiceStatus::Degraded, format!("unreadable model inventory: {e}")),
        Ok(inventory) if inventory.models.is_empty() => {
          Evaluation::new(ServiceStatus::Degraded, "no models available")
        }
        Ok(inventory) if inventory.models.len() < *min => Evaluation::new(
          ServiceStatus::Degraded,
          format!("{} models loaded, expected at least {min}", inventory.models.len()),
        ),
        Ok(inventory) => Evaluation::new(ServiceStatus::Up, format!("{} models loaded", inventory.models.len())),
      },
      Probe::Resource { warn, critical, .. } => {
        let text = result.text();
        let Some(value) = parse_reading(&text) else {
          return Evaluation::new(ServiceStatus::Down, format!("unreadable value: {:?}", text.trim()));
        };
        let status = if value >= *critical {
          ServiceStatus::Down
        } else if value >= *warn {
          ServiceStatus::Degraded
        } else {
          ServiceStatus::Up
        };
        Evaluation::new(status, format!("{value} (warn {warn}, critical {critical})"))
      }
    }
  }
}

fn failure_detail(result: &ExecutionResult) -> String {
  match &result.error {
    Some(ErrorDetail::Connect { .. }) => "connection refused".to_string(),
    Some(ErrorDetail::Timeout { deadline_ms }) => format!("no answer within {deadline_ms}ms"),
    Some(detail) => detail.to_string(),
    None => "probe failed".to_string(),
  }
}

fn parse_reading(text: &str) -> Option<f64> {
  text.trim().trim_end_matches('%').trim().parse().ok()
}

impl From<&CheckDef> for Probe {
  fn from(check: &CheckDef) -> Self {
    match check {
      CheckDef::Reachability => Probe::Reachability,
      CheckDef::Http { port, path, min_models } => Probe::Http {
        port: *port,
        path: path.clone(),
        min_models: *min_models,
      },
      CheckDef::Resource { command, warn, critical } => Probe::Resource {
        command: command.clone(),
        warn: *warn,
        critical: *critical,
      },
    }
  }
}

/// A monitored service, the nodes it applies to and how to repair it.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
  pub name: String,
  pub probe: Probe,
  /// Empty applies to every role.
  pub roles: BTreeSet<Role>,
  /// Every listed capability is required.
  pub capabilities: BTreeSet<String>,
  pub remediation: Option<String>,
}

impl ServiceSpec {
  pub fn new(name: impl Into<String>, probe: Probe) -> Self {
    Self {
      name: name.into(),
      probe,
      roles: BTreeSet::new(),
      capabilities: BTreeSet::new(),
      remediation: None,
    }
  }

  pub fn for_role(mut self, role: impl Into<Role>) -> Self {
    self.roles.insert(role.into());
    self
  }

  pub fn requiring(mut self, capability: impl Into<String>) -> Self {
    self.capabilities.insert(capability.into());
    self
  }

  pub fn remediate_with(mut self, command: impl Into<String>) -> Self {
    self.remediation = Some(command.into());
    self
  }

  pub fn applies_to(&self, node: &Node) -> bool {
    (self.roles.is_empty() || self.roles.contains(&node.role))
      && self.capabilities.iter().all(|c| node.has_capability(c))
  }
}

impl From<&ServiceDef> for ServiceSpec {
  fn from(def: &ServiceDef) -> Self {
    Self {
      name: def.name.clone(),
      probe: Probe::from(&def.check),
      roles: def.roles.iter().map(|r| Role::from(r.as_str())).collect(),
      capabilities: def.capabilities.iter().cloned().collect(),
      remediation: def.remediation.clone(),
    }
  }
}

/// The services monitored when the fleet file names none: reachability on
/// every node and the inference endpoint on AI nodes.
pub fn default_services() -> Vec<ServiceSpec> {
  vec![
    ServiceSpec::new("ssh", Probe::Reachability),
    ServiceSpec::new(
      "inference",
      Probe::Http {
        port: None,
        path: "/api/tags".to_string(),
        min_models: Some(1),
      },
    )
    .for_role(Role::PrimaryAi)
    .for_role(Role::SecondaryAi),
  ]
}
