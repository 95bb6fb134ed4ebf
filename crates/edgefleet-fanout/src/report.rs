//! Sweep reports.

use std::collections::BTreeMap;
use std::time::Duration;

use edgefleet_executor::{ExecStatus, ExecutionResult};
use serde::{Serialize, Serializer};

use crate::table::Table;

/// Aggregate outcome of a multi-node operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AggregateStatus {
  Success,
  /// Some but not all nodes failed; the failed nodes are named.
  PartialFailure { failed: Vec<String> },
  /// Every node failed.
  Failure { failed: Vec<String> },
}

impl AggregateStatus {
  /// Classify from the failed subset of `total` nodes.
  pub fn from_failed(failed: Vec<String>, total: usize) -> Self {
    if failed.is_empty() {
      AggregateStatus::Success
    } else if failed.len() == total {
      AggregateStatus::Failure { failed }
    } else {
      AggregateStatus::PartialFailure { failed }
    }
  }

  pub fn is_success(&self) -> bool {
    matches!(self, AggregateStatus::Success)
  }
}

/// One result per requested node, keyed by node name.
#[derive(Debug, Clone, Serialize)]
pub struct FanOutReport {
  pub sweep_id: String,
  pub results: BTreeMap<String, ExecutionResult>,
  pub succeeded: usize,
  pub failed: usize,
  pub timed_out: usize,
  #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
  pub elapsed: Duration,
}

impl FanOutReport {
  pub fn new(
    sweep_id: impl Into<String>,
    results: BTreeMap<String, ExecutionResult>,
    elapsed: Duration,
  ) -> Self {
    let count = |status| results.values().filter(|r| r.status == status).count();
    let succeeded = count(ExecStatus::Success);
    let failed = count(ExecStatus::Failure);
    let timed_out = count(ExecStatus::Timeout);
    Self {
      sweep_id: sweep_id.into(),
      results,
      succeeded,
      failed,
      timed_out,
      elapsed,
    }
  }

  pub fn len(&self) -> usize {
    self.results.len()
  }

  pub fn is_empty(&self) -> bool {
    self.results.is_empty()
  }

  pub fn get(&self, node: &str) -> Option<&ExecutionResult> {
    self.results.get(node)
  }

  pub fn succeeded_nodes(&self) -> Vec<String> {
    self
      .results
      .iter()
      .filter(|(_, r)| r.is_success())
      .map(|(name, _)| name.clone())
      .collect()
  }

  /// Nodes that failed or timed out, ordered by name.
  pub fn failed_nodes(&self) -> Vec<String> {
    self
      .results
      .iter()
      .filter(|(_, r)| !r.is_success())
      .map(|(name, _)| name.clone())
      .collect()
  }

  pub fn status(&self) -> AggregateStatus {
    AggregateStatus::from_failed(self.failed_nodes(), self.results.len())
  }

  pub fn is_success(&self) -> bool {
    self.failed + self.timed_out == 0
  }

  /// Per-node outcome table followed by the aggregate counts.
  pub fn render(&self) -> String {
    let mut table = Table::new(["NODE", "STATUS", "DURATION", "DETAIL"]);
    for (name, result) in &self.results {
      let detail = match &result.error {
        Some(error) => error.to_string(),
        None => first_line(&result.text()),
      };
      table.row([
        name.clone(),
        status_label(result.status).to_string(),
        format!("{}ms", result.duration.as_millis()),
        detail,
      ]);
    }
    format!(
      "{}\n{} succeeded, {} failed, {} timed out in {}ms\n",
      table.render(),
      self.succeeded,
      self.failed,
      self.timed_out,
      self.elapsed.as_millis()
    )
  }
}

pub(crate) fn status_label(status: ExecStatus) -> &'static str {
  match status {
    ExecStatus::Success => "ok",
    ExecStatus::Failure => "FAILED",
    ExecStatus::Timeout => "TIMEOUT",
  }
}

fn first_line(text: &str) -> String {
  text.lines().next().unwrap_or_default().chars().take(80).collect()
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_u64(duration.as_millis() as u64)
}
