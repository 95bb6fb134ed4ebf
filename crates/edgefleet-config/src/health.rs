use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthDef {
  /// Consecutive failed sweeps before a service raises an alert.
  #[serde(default = "default_failure_threshold")]
  pub failure_threshold: u32,
  /// Remediation is skipped entirely when false.
  #[serde(default = "default_remediate")]
  pub remediate: bool,
}

impl Default for HealthDef {
  fn default() -> Self {
    Self {
      failure_threshold: default_failure_threshold(),
      remediate: default_remediate(),
    }
  }
}

fn default_failure_threshold() -> u32 {
  3
}

fn default_remediate() -> bool {
  true
}
