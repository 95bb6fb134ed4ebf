use edgefleet_fanout::{AggregateStatus, FanOutReport, Table};
use serde::Serialize;

use crate::key::KeyState;

/// Rotation state machine phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPhase {
  Generating,
  Distributing,
  Verifying,
  RetiringOld,
  Idle,
}

impl RotationPhase {
  pub fn as_str(&self) -> &'static str {
    match self {
      RotationPhase::Generating => "generating",
      RotationPhase::Distributing => "distributing",
      RotationPhase::Verifying => "verifying",
      RotationPhase::RetiringOld => "retiring-old",
      RotationPhase::Idle => "idle",
    }
  }
}

/// One sweep run during a rotation.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseRecord {
  pub phase: RotationPhase,
  /// Fingerprint the sweep pushed, checked or removed.
  pub fingerprint: String,
  pub sweep: FanOutReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct RotationReport {
  pub rotation_id: String,
  pub new_fingerprint: String,
  /// The new key was carried over from an unfinished rotation.
  pub resumed: bool,
  /// Final state of the new key: `active` on full success, else `pending`.
  pub new_state: KeyState,
  pub outcome: AggregateStatus,
  pub phases: Vec<PhaseRecord>,
  /// Nodes verified on the new key.
  pub migrated: Vec<String>,
  /// Nodes still on their previous key only.
  pub not_migrated: Vec<String>,
  /// Migrated nodes where an old key could not be removed. Retried next run.
  pub retire_failures: Vec<String>,
  /// Keys that reached `revoked` during this run.
  pub revoked: Vec<String>,
}

impl RotationReport {
  pub fn is_success(&self) -> bool {
    self.outcome.is_success()
  }

  /// Why `node` did not migrate: the first failing sweep's error.
  fn failure_detail(&self, node: &str) -> String {
    self
      .phases
      .iter()
      .filter_map(|p| p.sweep.get(node).map(|r| (p.phase, r)))
      .find(|(_, r)| !r.is_success())
      .map(|(phase, r)| match &r.error {
        Some(error) => format!("{}: {error}", phase.as_str()),
        None => format!("{}: {:?}", phase.as_str(), r.status),
      })
      .unwrap_or_default()
  }

  pub fn render(&self) -> String {
    let mut table = Table::new(["NODE", "RESULT", "DETAIL"]);
    for node in &self.migrated {
      let (result, detail) = if self.retire_failures.contains(node) {
        ("migrated, old key kept", self.failure_detail(node))
      } else {
        ("migrated", String::new())
      };
      table.row([node.clone(), result.to_string(), detail]);
    }
    for node in &self.not_migrated {
      table.row([node.clone(), "NOT MIGRATED".to_string(), self.failure_detail(node)]);
    }

    let verdict = match &self.outcome {
      AggregateStatus::Success => format!("key {} is now active", self.new_fingerprint),
      AggregateStatus::PartialFailure { failed } | AggregateStatus::Failure { failed } => format!(
        "key {} held pending; {} node(s) not migrated: {}. Re-run rotation after fixing them.",
        self.new_fingerprint,
        failed.len(),
        failed.join(", ")
      ),
    };
    format!("{}\n{verdict}\n", table.render())
  }
}

/// Result of checking the active key against every node.
#[derive(Debug, Clone, Serialize)]
pub struct KeyVerification {
  pub fingerprint: String,
  pub sweep: FanOutReport,
}

impl KeyVerification {
  pub fn is_success(&self) -> bool {
    self.sweep.is_success()
  }

  pub fn accepting(&self) -> Vec<String> {
    self.sweep.succeeded_nodes()
  }

  pub fn rejecting(&self) -> Vec<String> {
    self
      .sweep
      .results
      .iter()
      .filter(|(_, r)| r.is_auth_error())
      .map(|(name, _)| name.clone())
      .collect()
  }

  pub fn render(&self) -> String {
    format!("active key {}\n{}", self.fingerprint, self.sweep.render())
  }
}
