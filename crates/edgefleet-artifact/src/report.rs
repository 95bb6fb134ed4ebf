use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::engine::{TransferOp, TransferReason, Transferred};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferStatus {
  Transferred(Transferred),
  Failed { error: String, integrity: bool },
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactOutcome {
  pub op: TransferOp,
  #[serde(flatten)]
  pub status: TransferStatus,
}

/// Per-artifact result of one source-to-target sync.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
  pub source: String,
  pub target: String,
  pub outcomes: Vec<ArtifactOutcome>,
  #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
  pub elapsed: Duration,
}

impl SyncReport {
  pub fn is_success(&self) -> bool {
    self
      .outcomes
      .iter()
      .all(|o| matches!(o.status, TransferStatus::Transferred(_)))
  }

  pub fn failed(&self) -> Vec<&ArtifactOutcome> {
    self
      .outcomes
      .iter()
      .filter(|o| matches!(o.status, TransferStatus::Failed { .. }))
      .collect()
  }

  pub fn bytes_transferred(&self) -> u64 {
    self
      .outcomes
      .iter()
      .map(|o| match &o.status {
        TransferStatus::Transferred(t) => t.bytes,
        TransferStatus::Failed { .. } => 0,
      })
      .sum()
  }

  pub fn render(&self) -> String {
    if self.outcomes.is_empty() {
      return format!("{} is in sync with {}\n", self.target, self.source);
    }
    let mut out = format!("{} -> {}\n", self.source, self.target);
    for outcome in &self.outcomes {
      let reason = match &outcome.op.reason {
        TransferReason::Missing => "missing",
        TransferReason::HashMismatch { .. } => "hash mismatch",
      };
      let status = match &outcome.status {
        TransferStatus::Transferred(t) if t.resumed_from > 0 => {
          format!("ok ({} bytes, resumed at {})", t.bytes, t.resumed_from)
        }
        TransferStatus::Transferred(t) => format!("ok ({} bytes)", t.bytes),
        TransferStatus::Failed { error, .. } => format!("FAILED: {error}"),
      };
      out.push_str(&format!("  {:<32} {:<14} {status}\n", outcome.op.id, reason));
    }
    out.push_str(&format!(
      "{} of {} artifacts transferred, {} bytes in {}ms\n",
      self.outcomes.len() - self.failed().len(),
      self.outcomes.len(),
      self.bytes_transferred(),
      self.elapsed.as_millis()
    ));
    out
  }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_u64(duration.as_millis() as u64)
}
