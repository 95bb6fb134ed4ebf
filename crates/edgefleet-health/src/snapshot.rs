use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use edgefleet_fanout::Table;
use serde::{Deserialize, Serialize};

use crate::error::HealthError;
use crate::probe::ServiceStatus;

/// What the aggregator did about a failing service during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemediationOutcome {
  /// The re-probe came back up.
  Recovered,
  StillFailing,
  /// The remediation command itself did not succeed.
  CommandFailed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remediation {
  pub command: String,
  #[serde(flatten)]
  pub outcome: RemediationOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
  pub status: ServiceStatus,
  pub detail: String,
  pub last_checked: DateTime<Utc>,
  /// Sweeps in a row that ended with the service not up, including this one.
  pub consecutive_failures: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub remediation: Option<Remediation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeHealth {
  pub services: BTreeMap<String, ServiceHealth>,
}

impl NodeHealth {
  /// The worst status across the node's services.
  pub fn status(&self) -> ServiceStatus {
    let statuses = || self.services.values().map(|s| s.status);
    if statuses().any(|s| s == ServiceStatus::Down) {
      ServiceStatus::Down
    } else if statuses().any(|s| s == ServiceStatus::Degraded) {
      ServiceStatus::Degraded
    } else {
      ServiceStatus::Up
    }
  }
}

/// A service whose failure streak reached the alert threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
  pub node: String,
  pub service: String,
  pub status: ServiceStatus,
  pub consecutive_failures: u32,
  pub detail: String,
}

/// Fleet health as of one sweep.
///
/// A snapshot only holds the nodes its sweep covered. The saved state is the
/// fleet-wide view: see [`HealthSnapshot::merged_over`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
  pub taken_at: DateTime<Utc>,
  pub nodes: BTreeMap<String, NodeHealth>,
}

impl HealthSnapshot {
  pub fn get(&self, node: &str, service: &str) -> Option<&ServiceHealth> {
    self.nodes.get(node)?.services.get(service)
  }

  pub fn consecutive_failures(&self, node: &str, service: &str) -> u32 {
    self.get(node, service).map_or(0, |s| s.consecutive_failures)
  }

  pub fn is_healthy(&self) -> bool {
    self.nodes.values().all(|n| n.status() == ServiceStatus::Up)
  }

  /// Services that have failed `threshold` or more sweeps in a row. A single
  /// failed sweep never alerts unless the threshold is 1.
  pub fn alerts(&self, threshold: u32) -> Vec<Alert> {
    let threshold = threshold.max(1);
    self
      .nodes
      .iter()
      .flat_map(|(node, health)| {
        health
          .services
          .iter()
          .filter(move |(_, s)| s.status.is_failing() && s.consecutive_failures >= threshold)
          .map(move |(service, s)| Alert {
            node: node.clone(),
            service: service.clone(),
            status: s.status,
            consecutive_failures: s.consecutive_failures,
            detail: s.detail.clone(),
          })
      })
      .collect()
  }

  pub fn render(&self, threshold: u32) -> String {
    let mut table = Table::new(["NODE", "SERVICE", "STATUS", "STREAK", "DETAIL"]);
    for (node, health) in &self.nodes {
      for (service, s) in &health.services {
        let mut detail = s.detail.clone();
        if let Some(remediation) = &s.remediation {
          let outcome = match &remediation.outcome {
            RemediationOutcome::Recovered => "recovered".to_string(),
            RemediationOutcome::StillFailing => "still failing".to_string(),
            RemediationOutcome::CommandFailed { error } => format!("failed: {error}"),
          };
          detail.push_str(&format!(" [remediated: {outcome}]"));
        }
        table.row([
          node.clone(),
          service.clone(),
          s.status.to_string(),
          s.consecutive_failures.to_string(),
          detail,
        ]);
      }
    }
    let mut out = table.render();
    let alerts = self.alerts(threshold);
    if alerts.is_empty() {
      out.push_str("\nno alerts\n");
    } else {
      out.push('\n');
      for alert in alerts {
        out.push_str(&format!(
          "ALERT {}/{} {} for {} sweeps: {}\n",
          alert.node, alert.service, alert.status, alert.consecutive_failures, alert.detail
        ));
      }
    }
    out
  }

  /// This snapshot layered over `previous`: every node swept here replaces
  /// its older record wholesale, and nodes this sweep did not cover keep
  /// theirs, streaks included.
  pub fn merged_over(&self, previous: Option<&HealthSnapshot>) -> HealthSnapshot {
    let mut nodes = previous.map(|p| p.nodes.clone()).unwrap_or_default();
    for (name, health) in &self.nodes {
      nodes.insert(name.clone(), health.clone());
    }
    HealthSnapshot {
      taken_at: self.taken_at,
      nodes,
    }
  }

  /// Read a saved snapshot. A missing file is `None`.
  pub async fn load(path: &Path) -> Result<Option<Self>, HealthError> {
    match tokio::fs::read(path).await {
      Ok(bytes) => serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| HealthError::Snapshot {
          path: path.to_path_buf(),
          source,
        }),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(HealthError::Io {
        path: path.to_path_buf(),
        source: e,
      }),
    }
  }

  /// Write through a temporary file and rename.
  pub async fn save(&self, path: &Path) -> Result<(), HealthError> {
    if let Some(dir) = path.parent()
      && !dir.as_os_str().is_empty()
    {
      tokio::fs::create_dir_all(dir).await.map_err(HealthError::io(dir))?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(self).map_err(|source| HealthError::Snapshot {
      path: path.to_path_buf(),
      source,
    })?;
    tokio::fs::write(&tmp, json).await.map_err(HealthError::io(&tmp))?;
    tokio::fs::rename(&tmp, path).await.map_err(HealthError::io(path))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn service(status: ServiceStatus, streak: u32) -> ServiceHealth {
    ServiceHealth {
      status,
      detail: "x".to_string(),
      last_checked: Utc::now(),
      consecutive_failures: streak,
      remediation: None,
    }
  }

  fn snapshot(entries: &[(&str, &str, ServiceStatus, u32)]) -> HealthSnapshot {
    let mut nodes: BTreeMap<String, NodeHealth> = BTreeMap::new();
    for (node, name, status, streak) in entries {
      nodes
        .entry(node.to_string())
        .or_default()
        .services
        .insert(name.to_string(), service(*status, *streak));
    }
    HealthSnapshot {
      taken_at: Utc::now(),
      nodes,
    }
  }

  #[test]
  fn test_alerts_only_at_threshold() {
    let snap = snapshot(&[
      ("agx0", "inference", ServiceStatus::Down, 3),
      ("orin0", "inference", ServiceStatus::Degraded, 2),
      ("pi51", "ssh", ServiceStatus::Up, 0),
    ]);
    let alerts = snap.alerts(3);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].node, "agx0");
    assert_eq!(snap.alerts(2).len(), 2);
    assert_eq!(snap.alerts(0).len(), 2);
  }

  #[test]
  fn test_node_status_is_worst_service() {
    let snap = snapshot(&[
      ("agx0", "ssh", ServiceStatus::Up, 0),
      ("agx0", "inference", ServiceStatus::Degraded, 1),
    ]);
    assert_eq!(snap.nodes["agx0"].status(), ServiceStatus::Degraded);
    assert!(!snap.is_healthy());
  }

  #[test]
  fn test_render_lists_alerts() {
    let snap = snapshot(&[("nano", "ssh", ServiceStatus::Down, 4)]);
    let out = snap.render(3);
    assert!(out.contains("NODE"));
    assert!(out.contains("ALERT nano/ssh down for 4 sweeps"));
  }

  #[test]
  fn test_merge_keeps_unswept_nodes_and_replaces_swept_ones() {
    let previous = snapshot(&[
      ("pi31", "ssh", ServiceStatus::Down, 2),
      ("agx0", "ssh", ServiceStatus::Down, 1),
      ("agx0", "inference", ServiceStatus::Down, 1),
    ]);
    let scoped = snapshot(&[("agx0", "ssh", ServiceStatus::Up, 0)]);

    let merged = scoped.merged_over(Some(&previous));
    assert_eq!(merged.taken_at, scoped.taken_at);
    assert_eq!(merged.consecutive_failures("pi31", "ssh"), 2);
    assert_eq!(merged.get("agx0", "ssh").unwrap().status, ServiceStatus::Up);
    assert!(merged.get("agx0", "inference").is_none());
    assert_eq!(scoped.merged_over(None), scoped);
  }

  #[tokio::test]
  async fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("health.json");
    assert!(HealthSnapshot::load(&path).await.unwrap().is_none());

    let snap = snapshot(&[("agx0", "ssh", ServiceStatus::Down, 2)]);
    snap.save(&path).await.unwrap();
    let loaded = HealthSnapshot::load(&path).await.unwrap().unwrap();
    assert_eq!(loaded.consecutive_failures("agx0", "ssh"), 2);
    assert_eq!(loaded.consecutive_failures("agx0", "inference"), 0);
  }
}
