use std::time::Duration;

use edgefleet_executor::{ExecStatus, ExecutionRequest};
use edgefleet_fanout::{AggregateStatus, Coordinator, FanOutError, SWEEP_OVERHEAD};
use edgefleet_testkit::{Link, SimulatedFleet, ok, pick, reference_nodes};

fn uptime(_: &edgefleet_registry::Node) -> ExecutionRequest {
  ExecutionRequest::command("uptime", Duration::from_secs(60))
}

fn fleet_with_uptime(nodes: &[edgefleet_registry::Node]) -> SimulatedFleet {
  let fleet = SimulatedFleet::new(nodes);
  for node in nodes {
    fleet.respond(&node.name, "uptime", ok(" 10:02:11 up 3 days,  2 users\n"));
  }
  fleet
}

#[tokio::test(start_paused = true)]
async fn test_one_unreachable_node_is_partial_failure() {
  let nodes = pick(&["agx0", "orin0", "nano"]);
  let fleet = fleet_with_uptime(&nodes);
  fleet.set_link("nano", Link::Hang);
  let coordinator = Coordinator::new(fleet.executor());

  let report = coordinator
    .sweep(&nodes, uptime, Duration::from_secs(2))
    .await
    .unwrap();

  assert_eq!(report.len(), 3);
  assert_eq!(report.succeeded, 2);
  assert_eq!(report.get("nano").unwrap().status, ExecStatus::Timeout);
  assert_eq!(
    report.status(),
    AggregateStatus::PartialFailure {
      failed: vec!["nano".to_string()]
    }
  );
}

#[tokio::test(start_paused = true)]
async fn test_hung_nodes_do_not_extend_the_sweep() {
  let nodes = reference_nodes();
  let fleet = fleet_with_uptime(&nodes);
  for hung in ["pi31", "pi41", "nano", "pi52"] {
    fleet.set_link(hung, Link::Hang);
  }
  let coordinator = Coordinator::new(fleet.executor());
  let deadline = Duration::from_millis(500);

  let started = tokio::time::Instant::now();
  let report = coordinator.sweep(&nodes, uptime, deadline).await.unwrap();

  assert!(started.elapsed() <= deadline + SWEEP_OVERHEAD);
  assert_eq!(report.len(), nodes.len());
  assert_eq!(report.timed_out, 4);
  assert_eq!(report.succeeded, 3);
}

#[tokio::test(start_paused = true)]
async fn test_nodes_run_concurrently() {
  let nodes = reference_nodes();
  let fleet = fleet_with_uptime(&nodes);
  for node in &nodes {
    fleet.set_latency(&node.name, Duration::from_millis(300));
  }
  let coordinator = Coordinator::new(fleet.executor());

  let started = tokio::time::Instant::now();
  let report = coordinator
    .sweep(&nodes, uptime, Duration::from_secs(5))
    .await
    .unwrap();

  assert!(report.is_success());
  assert!(started.elapsed() < Duration::from_millis(600));
}

#[tokio::test]
async fn test_refused_and_auth_failures_are_reported_per_node() {
  let nodes = pick(&["pi51", "pi52"]);
  let fleet = fleet_with_uptime(&nodes);
  fleet.set_link("pi52", Link::Refused);
  let coordinator = Coordinator::new(fleet.executor());

  let report = coordinator
    .sweep(&nodes, uptime, Duration::from_secs(1))
    .await
    .unwrap();

  assert!(report.get("pi51").unwrap().is_success());
  assert_eq!(report.get("pi52").unwrap().status, ExecStatus::Failure);
  assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn test_all_failed_is_failure() {
  let nodes = pick(&["pi31"]);
  let fleet = fleet_with_uptime(&nodes);
  fleet.set_link("pi31", Link::Refused);
  let report = Coordinator::new(fleet.executor())
    .sweep(&nodes, uptime, Duration::from_secs(1))
    .await
    .unwrap();
  assert!(matches!(report.status(), AggregateStatus::Failure { .. }));
}

#[tokio::test]
async fn test_structural_errors() {
  let fleet = SimulatedFleet::new(&reference_nodes());
  let coordinator = Coordinator::new(fleet.executor());

  let empty = coordinator.sweep(&[], uptime, Duration::from_secs(1)).await;
  assert_eq!(empty.unwrap_err(), FanOutError::EmptyNodeSet);

  let doubled = pick(&["agx0", "agx0"]);
  let dup = coordinator.sweep(&doubled, uptime, Duration::from_secs(1)).await;
  assert_eq!(
    dup.unwrap_err(),
    FanOutError::DuplicateNode {
      name: "agx0".to_string()
    }
  );
  assert!(fleet.commands("agx0").is_empty());
}

#[tokio::test]
async fn test_report_serializes_per_node_results() {
  let nodes = pick(&["agx0"]);
  let fleet = fleet_with_uptime(&nodes);
  let report = Coordinator::new(fleet.executor())
    .sweep(&nodes, uptime, Duration::from_secs(1))
    .await
    .unwrap();

  let json = serde_json::to_value(&report).unwrap();
  assert_eq!(json["results"]["agx0"]["status"], "success");
  assert_eq!(json["succeeded"], 1);
}
