use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use edgefleet_config::HealthDef;
use edgefleet_executor::ExecutionRequest;
use edgefleet_fanout::{Coordinator, FanOutReport};
use edgefleet_registry::Node;
use futures::future::join_all;
use tracing::{info, instrument, warn};

use crate::error::HealthError;
use crate::probe::{Evaluation, Probe, ServiceSpec};
use crate::snapshot::{HealthSnapshot, NodeHealth, Remediation, RemediationOutcome, ServiceHealth};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthPolicy {
  /// Consecutive failed sweeps before a service alerts.
  pub failure_threshold: u32,
  pub remediate: bool,
}

impl Default for HealthPolicy {
  fn default() -> Self {
    Self {
      failure_threshold: 3,
      remediate: true,
    }
  }
}

impl From<&HealthDef> for HealthPolicy {
  fn from(def: &HealthDef) -> Self {
    Self {
      failure_threshold: def.failure_threshold,
      remediate: def.remediate,
    }
  }
}

/// A service on a node: node plus index into the aggregator's services.
type Target = (Node, usize);
type Evaluations = BTreeMap<(String, usize), Evaluation>;

/// Builds health snapshots from probe sweeps and applies the recovery policy.
#[derive(Clone)]
pub struct HealthAggregator {
  coordinator: Coordinator,
  services: Vec<ServiceSpec>,
  policy: HealthPolicy,
  deadline: Duration,
}

impl HealthAggregator {
  pub fn new(coordinator: Coordinator, services: Vec<ServiceSpec>, policy: HealthPolicy, deadline: Duration) -> Self {
    Self {
      coordinator,
      services,
      policy,
      deadline,
    }
  }

  pub fn services(&self) -> &[ServiceSpec] {
    &self.services
  }

  pub fn policy(&self) -> &HealthPolicy {
    &self.policy
  }

  /// Probe every service on every node it applies to, remediate failures at
  /// most once, and carry failure streaks forward from `previous`.
  ///
  /// Services sharing an identical probe share one sweep, so a snapshot costs
  /// one fan-out per distinct probe plus, when something failed, one per
  /// remediation command and one re-probe.
  #[instrument(name = "health_snapshot", skip_all, fields(nodes = nodes.len(), services = self.services.len()))]
  pub async fn snapshot(&self, nodes: &[Node], previous: Option<&HealthSnapshot>) -> Result<HealthSnapshot, HealthError> {
    let taken_at = Utc::now();
    let targets: Vec<Target> = nodes
      .iter()
      .flat_map(|node| {
        self
          .services
          .iter()
          .enumerate()
          .filter(move |(_, service)| service.applies_to(node))
          .map(move |(idx, _)| (node.clone(), idx))
      })
      .collect();

    let mut evaluations = self.probe(&targets).await?;
    for ((node, idx), eval) in &evaluations {
      if eval.status.is_failing() {
        warn!(
          node = %node,
          service = %self.services[*idx].name,
          status = %eval.status,
          detail = %eval.detail,
          "service_unhealthy"
        );
      }
    }

    let remediations = if self.policy.remediate {
      self.remediate(&targets, &mut evaluations).await?
    } else {
      BTreeMap::new()
    };

    let mut snapshot = HealthSnapshot {
      taken_at,
      nodes: nodes.iter().map(|n| (n.name.clone(), NodeHealth::default())).collect(),
    };
    for ((node, idx), eval) in evaluations {
      let service = &self.services[idx];
      let streak = if eval.status.is_failing() {
        previous
          .map_or(0, |p| p.consecutive_failures(&node, &service.name))
          .saturating_add(1)
      } else {
        0
      };
      if eval.status.is_failing() && streak >= self.policy.failure_threshold.max(1) {
        warn!(node = %node, service = %service.name, consecutive_failures = streak, "health_alert");
      }
      let health = ServiceHealth {
        status: eval.status,
        detail: eval.detail,
        last_checked: taken_at,
        consecutive_failures: streak,
        remediation: remediations.get(&(node.clone(), idx)).cloned(),
      };
      snapshot
        .nodes
        .entry(node)
        .or_default()
        .services
        .insert(service.name.clone(), health);
    }

    info!(
      healthy = snapshot.is_healthy(),
      alerts = snapshot.alerts(self.policy.failure_threshold).len(),
      "health_snapshot_taken"
    );
    Ok(snapshot)
  }

  /// One sweep per distinct probe over the nodes that need it.
  async fn probe(&self, targets: &[Target]) -> Result<Evaluations, HealthError> {
    let mut groups: Vec<(&Probe, Vec<usize>)> = Vec::new();
    for (idx, service) in self.services.iter().enumerate() {
      match groups.iter().position(|(probe, _)| *probe == &service.probe) {
        Some(i) => groups[i].1.push(idx),
        None => groups.push((&service.probe, vec![idx])),
      }
    }

    let sweeps = groups.iter().filter_map(|(probe, members)| {
      let nodes = distinct_nodes(targets.iter().filter(|(_, idx)| members.contains(idx)));
      if nodes.is_empty() {
        return None;
      }
      let deadline = self.deadline;
      Some(async move {
        let report = self
          .coordinator
          .sweep(&nodes, |node| probe.request(node, deadline), deadline)
          .await;
        (*probe, members, report)
      })
    });

    let mut evaluations = Evaluations::new();
    for (probe, members, report) in join_all(sweeps).await {
      let report = report?;
      for (node, idx) in targets.iter().filter(|(_, idx)| members.contains(idx)) {
        if let Some(result) = report.get(&node.name) {
          evaluations.insert((node.name.clone(), *idx), probe.evaluate(result));
        }
      }
    }
    Ok(evaluations)
  }

  /// Run each failing service's remediation command once, then re-probe the
  /// services whose command succeeded. Nothing here loops: a service that is
  /// still failing after the re-probe is reported as is.
  async fn remediate(
    &self,
    targets: &[Target],
    evaluations: &mut Evaluations,
  ) -> Result<BTreeMap<(String, usize), Remediation>, HealthError> {
    let mut by_command: BTreeMap<&str, Vec<&Target>> = BTreeMap::new();
    for target in targets {
      let (node, idx) = target;
      let failing = evaluations
        .get(&(node.name.clone(), *idx))
        .is_some_and(|e| e.status.is_failing());
      if failing && let Some(command) = self.services[*idx].remediation.as_deref() {
        by_command.entry(command).or_default().push(target);
      }
    }
    if by_command.is_empty() {
      return Ok(BTreeMap::new());
    }

    let sweeps = by_command.iter().map(|(command, affected)| {
      let nodes = distinct_nodes(affected.iter().copied());
      for node in &nodes {
        warn!(node = %node.name, command = %command, "remediation_issued");
      }
      let deadline = self.deadline;
      async move {
        let report = self
          .coordinator
          .sweep(
            &nodes,
            |_| ExecutionRequest::command(*command, deadline).not_idempotent(),
            deadline,
          )
          .await;
        (*command, affected, report)
      }
    });

    let mut remediations = BTreeMap::new();
    let mut reprobe: Vec<Target> = Vec::new();
    for (command, affected, report) in join_all(sweeps).await {
      let report: FanOutReport = report?;
      for (node, idx) in affected {
        let key = (node.name.clone(), *idx);
        match report.get(&node.name) {
          Some(result) if result.is_success() => reprobe.push((node.clone(), *idx)),
          Some(result) => {
            let error = result.error.as_ref().map_or_else(|| "failed".to_string(), |e| e.to_string());
            warn!(node = %node.name, command = %command, error = %error, "remediation_failed");
            remediations.insert(
              key,
              Remediation {
                command: command.to_string(),
                outcome: RemediationOutcome::CommandFailed { error },
              },
            );
          }
          None => {}
        }
      }
    }

    let rechecked = if reprobe.is_empty() {
      Evaluations::new()
    } else {
      self.probe(&reprobe).await?
    };
    for (node, idx) in reprobe {
      let key = (node.name.clone(), idx);
      let Some(eval) = rechecked.get(&key) else {
        continue;
      };
      let outcome = if eval.status.is_failing() {
        warn!(node = %node.name, service = %self.services[idx].name, detail = %eval.detail, "remediation_ineffective");
        RemediationOutcome::StillFailing
      } else {
        info!(node = %node.name, service = %self.services[idx].name, "remediation_recovered");
        RemediationOutcome::Recovered
      };
      let command = self.services[idx].remediation.clone().unwrap_or_default();
      evaluations.insert(key.clone(), eval.clone());
      remediations.insert(key, Remediation { command, outcome });
    }
    Ok(remediations)
  }
}

/// Nodes in first-seen order without repeats.
fn distinct_nodes<'a>(targets: impl Iterator<Item = &'a Target>) -> Vec<Node> {
  let mut nodes: Vec<Node> = Vec::new();
  for (node, _) in targets {
    if !nodes.iter().any(|n| n.name == node.name) {
      nodes.push(node.clone());
    }
  }
  nodes
}
