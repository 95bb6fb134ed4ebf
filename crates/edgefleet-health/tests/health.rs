use std::time::Duration;

use bytes::Bytes;
use edgefleet_fanout::Coordinator;
use edgefleet_health::{
  HealthAggregator, HealthMonitor, HealthPolicy, HealthSnapshot, Probe, RemediationOutcome, ServiceSpec, ServiceStatus,
};
use edgefleet_registry::Node;
use edgefleet_testkit::{Link, SimulatedFleet, fail, ok, pick, reference_nodes};
use tokio_util::sync::CancellationToken;

const TAGS: &str = "/api/tags";
const MODELS: &str = r#"{"models":[{"name":"llama3.2:3b","size":2019393189,"digest":"sha256:a80c4f17acd5"}]}"#;
const RESTART: &str = "docker restart ollama";

fn inference() -> ServiceSpec {
  ServiceSpec::new(
    "inference",
    Probe::Http {
      port: None,
      path: TAGS.to_string(),
      min_models: Some(1),
    },
  )
  .for_role("primary-ai")
  .for_role("secondary-ai")
}

fn aggregator(fleet: &SimulatedFleet, services: Vec<ServiceSpec>, policy: HealthPolicy) -> HealthAggregator {
  HealthAggregator::new(
    Coordinator::new(fleet.executor()),
    services,
    policy,
    Duration::from_secs(2),
  )
}

fn take_down(fleet: &SimulatedFleet, node: &str) {
  fleet.update(node, |n| n.http.clear());
}

fn restarts(fleet: &SimulatedFleet, node: &str) -> usize {
  fleet.commands(node).iter().filter(|c| *c == RESTART).count()
}

#[tokio::test]
async fn test_single_failure_does_not_alert() {
  let nodes = pick(&["agx0"]);
  let fleet = SimulatedFleet::new(&nodes);
  fleet.serve("agx0", 11434, TAGS, 200, MODELS);
  let health = aggregator(&fleet, vec![inference()], HealthPolicy::default());

  let first = health.snapshot(&nodes, None).await.unwrap();
  assert_eq!(first.get("agx0", "inference").unwrap().status, ServiceStatus::Up);
  assert_eq!(first.consecutive_failures("agx0", "inference"), 0);

  take_down(&fleet, "agx0");
  let second = health.snapshot(&nodes, Some(&first)).await.unwrap();
  assert_eq!(second.get("agx0", "inference").unwrap().status, ServiceStatus::Down);
  assert_eq!(second.consecutive_failures("agx0", "inference"), 1);
  assert!(second.alerts(3).is_empty());

  let third = health.snapshot(&nodes, Some(&second)).await.unwrap();
  assert!(third.alerts(3).is_empty());
  let fourth = health.snapshot(&nodes, Some(&third)).await.unwrap();
  let alerts = fourth.alerts(3);
  assert_eq!(alerts.len(), 1);
  assert_eq!(alerts[0].node, "agx0");
  assert_eq!(alerts[0].consecutive_failures, 3);

  fleet.serve("agx0", 11434, TAGS, 200, MODELS);
  let recovered = health.snapshot(&nodes, Some(&fourth)).await.unwrap();
  assert_eq!(recovered.consecutive_failures("agx0", "inference"), 0);
  assert!(recovered.is_healthy());
}

#[tokio::test]
async fn test_flapping_service_never_reaches_threshold() {
  let nodes = pick(&["orin0"]);
  let fleet = SimulatedFleet::new(&nodes);
  let health = aggregator(&fleet, vec![inference()], HealthPolicy::default());

  let mut previous: Option<HealthSnapshot> = None;
  for round in 0..6 {
    if round % 2 == 0 {
      take_down(&fleet, "orin0");
    } else {
      fleet.serve("orin0", 11434, TAGS, 200, MODELS);
    }
    let snapshot = health.snapshot(&nodes, previous.as_ref()).await.unwrap();
    assert!(snapshot.alerts(2).is_empty());
    previous = Some(snapshot);
  }
}

#[tokio::test]
async fn test_zero_models_is_degraded_not_down() {
  let nodes = pick(&["agx0"]);
  let fleet = SimulatedFleet::new(&nodes);
  fleet.serve("agx0", 11434, TAGS, 200, r#"{"models":[]}"#);
  let health = aggregator(&fleet, vec![inference()], HealthPolicy::default());

  let snapshot = health.snapshot(&nodes, None).await.unwrap();
  let service = snapshot.get("agx0", "inference").unwrap();
  assert_eq!(service.status, ServiceStatus::Degraded);
  assert_eq!(service.detail, "no models available");
  assert_eq!(service.consecutive_failures, 1);
}

#[tokio::test]
async fn test_remediation_runs_once_per_sweep_then_reports() {
  let nodes = pick(&["agx0"]);
  let fleet = SimulatedFleet::new(&nodes);
  fleet.respond("agx0", RESTART, ok(""));
  let health = aggregator(&fleet, vec![inference().remediate_with(RESTART)], HealthPolicy::default());

  let first = health.snapshot(&nodes, None).await.unwrap();
  let service = first.get("agx0", "inference").unwrap();
  assert_eq!(service.status, ServiceStatus::Down);
  assert_eq!(
    service.remediation.as_ref().unwrap().outcome,
    RemediationOutcome::StillFailing
  );
  assert_eq!(restarts(&fleet, "agx0"), 1);

  let second = health.snapshot(&nodes, Some(&first)).await.unwrap();
  assert_eq!(restarts(&fleet, "agx0"), 2);
  assert_eq!(second.consecutive_failures("agx0", "inference"), 2);
}

#[tokio::test]
async fn test_successful_remediation_recovers_service() {
  let nodes = pick(&["agx0"]);
  let fleet = SimulatedFleet::new(&nodes);
  fleet.on_command("agx0", RESTART, |node, _| {
    node
      .http
      .insert((11434, TAGS.to_string()), (200, Bytes::from_static(MODELS.as_bytes())));
    ok("ollama\n")
  });
  let health = aggregator(&fleet, vec![inference().remediate_with(RESTART)], HealthPolicy::default());

  let snapshot = health.snapshot(&nodes, None).await.unwrap();
  let service = snapshot.get("agx0", "inference").unwrap();
  assert_eq!(service.status, ServiceStatus::Up);
  assert_eq!(service.consecutive_failures, 0);
  assert_eq!(service.remediation.as_ref().unwrap().outcome, RemediationOutcome::Recovered);
  assert!(snapshot.render(3).contains("remediated: recovered"));
}

#[tokio::test]
async fn test_failed_remediation_command_is_reported() {
  let nodes = pick(&["agx0"]);
  let fleet = SimulatedFleet::new(&nodes);
  fleet.respond("agx0", RESTART, fail(1, "Error: No such container: ollama"));
  let health = aggregator(&fleet, vec![inference().remediate_with(RESTART)], HealthPolicy::default());

  let snapshot = health.snapshot(&nodes, None).await.unwrap();
  let service = snapshot.get("agx0", "inference").unwrap();
  assert_eq!(service.status, ServiceStatus::Down);
  assert!(matches!(
    service.remediation.as_ref().unwrap().outcome,
    RemediationOutcome::CommandFailed { .. }
  ));
}

#[tokio::test]
async fn test_remediation_disabled_by_policy() {
  let nodes = pick(&["agx0"]);
  let fleet = SimulatedFleet::new(&nodes);
  fleet.respond("agx0", RESTART, ok(""));
  let policy = HealthPolicy {
    failure_threshold: 3,
    remediate: false,
  };
  let health = aggregator(&fleet, vec![inference().remediate_with(RESTART)], policy);

  let snapshot = health.snapshot(&nodes, None).await.unwrap();
  assert!(snapshot.get("agx0", "inference").unwrap().remediation.is_none());
  assert_eq!(restarts(&fleet, "agx0"), 0);
}

#[tokio::test]
async fn test_services_scoped_to_matching_nodes() {
  let mut nodes = reference_nodes();
  for node in &mut nodes {
    if node.name == "orin0" {
      node.inference_port = 11435;
    }
  }
  let fleet = SimulatedFleet::new(&nodes);
  fleet.serve("agx0", 11434, TAGS, 200, MODELS);
  fleet.serve("orin0", 11435, TAGS, 200, MODELS);
  let disk = "df --output=pcent /srv/nfs | tail -1";
  fleet.respond("pi52", disk, ok(" 42%\n"));

  let services = vec![
    ServiceSpec::new("ssh", Probe::Reachability),
    inference(),
    ServiceSpec::new(
      "nfs-disk",
      Probe::Resource {
        command: disk.to_string(),
        warn: 80.0,
        critical: 95.0,
      },
    )
    .requiring("nfs-server"),
  ];
  let health = aggregator(&fleet, services, HealthPolicy::default());
  let snapshot = health.snapshot(&nodes, None).await.unwrap();

  assert_eq!(snapshot.nodes.len(), 7);
  assert!(snapshot.is_healthy());
  let names = |node: &str| -> Vec<String> { snapshot.nodes[node].services.keys().cloned().collect() };
  assert_eq!(names("pi51"), vec!["ssh"]);
  assert_eq!(names("agx0"), vec!["inference", "ssh"]);
  assert_eq!(names("orin0"), vec!["inference", "ssh"]);
  assert_eq!(names("pi52"), vec!["nfs-disk", "ssh"]);
  assert!(fleet.commands("pi41").iter().all(|c| c != disk));
}

#[tokio::test]
async fn test_resource_warning_and_critical() {
  let nodes = pick(&["pi41", "pi31"]);
  let fleet = SimulatedFleet::new(&nodes);
  let disk = "df --output=pcent / | tail -1";
  fleet.respond("pi41", disk, ok("85%\n"));
  fleet.respond("pi31", disk, ok("99%\n"));
  let service = ServiceSpec::new(
    "disk",
    Probe::Resource {
      command: disk.to_string(),
      warn: 80.0,
      critical: 95.0,
    },
  );
  let health = aggregator(&fleet, vec![service], HealthPolicy::default());

  let snapshot = health.snapshot(&nodes, None).await.unwrap();
  assert_eq!(snapshot.get("pi41", "disk").unwrap().status, ServiceStatus::Degraded);
  assert_eq!(snapshot.get("pi31", "disk").unwrap().status, ServiceStatus::Down);
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_node_is_down_without_blocking_others() {
  let nodes = pick(&["pi51", "nano"]);
  let fleet = SimulatedFleet::new(&nodes);
  fleet.set_link("nano", Link::Hang);
  let health = aggregator(&fleet, vec![ServiceSpec::new("ssh", Probe::Reachability)], HealthPolicy::default());

  let snapshot = health.snapshot(&nodes, None).await.unwrap();
  assert_eq!(snapshot.get("pi51", "ssh").unwrap().status, ServiceStatus::Up);
  let nano = snapshot.get("nano", "ssh").unwrap();
  assert_eq!(nano.status, ServiceStatus::Down);
  assert!(nano.detail.contains("no answer"));
}

#[tokio::test]
async fn test_streak_survives_restart_through_state_file() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("health.json");
  let nodes = pick(&["pi31"]);
  let fleet = SimulatedFleet::new(&nodes);
  fleet.set_link("pi31", Link::Refused);
  let health = aggregator(&fleet, vec![ServiceSpec::new("ssh", Probe::Reachability)], HealthPolicy::default());

  for expected in 1..=3 {
    let previous = HealthSnapshot::load(&path).await.unwrap();
    let snapshot = health.snapshot(&nodes, previous.as_ref()).await.unwrap();
    assert_eq!(snapshot.consecutive_failures("pi31", "ssh"), expected);
    snapshot.save(&path).await.unwrap();
  }
  let last = HealthSnapshot::load(&path).await.unwrap().unwrap();
  assert_eq!(last.alerts(3).len(), 1);
}

#[tokio::test]
async fn test_scoped_sweep_keeps_other_nodes_streaks() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("health.json");
  let nodes = pick(&["agx0", "pi31"]);
  let fleet = SimulatedFleet::new(&nodes);
  fleet.set_link("pi31", Link::Refused);
  let health = aggregator(&fleet, vec![ServiceSpec::new("ssh", Probe::Reachability)], HealthPolicy::default());

  let sweep = |scope: Vec<Node>| {
    let health = health.clone();
    let path = path.clone();
    async move {
      let previous = HealthSnapshot::load(&path).await.unwrap();
      let snapshot = health.snapshot(&scope, previous.as_ref()).await.unwrap();
      snapshot.merged_over(previous.as_ref()).save(&path).await.unwrap();
      snapshot
    }
  };

  sweep(nodes.clone()).await;
  sweep(nodes.clone()).await;
  let scoped = sweep(pick(&["agx0"])).await;
  assert!(scoped.nodes.get("pi31").is_none());
  assert_eq!(
    HealthSnapshot::load(&path).await.unwrap().unwrap().consecutive_failures("pi31", "ssh"),
    2
  );

  let third = sweep(nodes.clone()).await;
  assert_eq!(third.consecutive_failures("pi31", "ssh"), 3);
  assert_eq!(third.alerts(3).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_keeps_unselected_nodes_in_state_file() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("health.json");
  let fleet = SimulatedFleet::new(&pick(&["pi41", "pi31"]));
  fleet.set_link("pi31", Link::Refused);
  let health = aggregator(&fleet, vec![ServiceSpec::new("ssh", Probe::Reachability)], HealthPolicy::default());

  let earlier = health.snapshot(&pick(&["pi41", "pi31"]), None).await.unwrap();
  let (monitor, mut snapshots) = HealthMonitor::new(health, pick(&["pi41"]));
  let monitor = monitor.resume_from(Some(earlier)).persist_to(&path);
  let cancel = CancellationToken::new();
  let handle = tokio::spawn(monitor.run(Duration::from_secs(30), cancel.clone()));

  let published = snapshots.recv().await.unwrap();
  assert!(published.nodes.get("pi31").is_none());
  cancel.cancel();
  handle.await.unwrap().unwrap();

  let saved = HealthSnapshot::load(&path).await.unwrap().unwrap();
  assert_eq!(saved.consecutive_failures("pi31", "ssh"), 1);
  assert_eq!(saved.get("pi41", "ssh").unwrap().status, ServiceStatus::Up);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_publishes_until_cancelled() {
  let nodes: Vec<Node> = pick(&["pi41"]);
  let fleet = SimulatedFleet::new(&nodes);
  fleet.set_link("pi41", Link::Refused);
  let health = aggregator(&fleet, vec![ServiceSpec::new("ssh", Probe::Reachability)], HealthPolicy::default());

  let (monitor, mut snapshots) = HealthMonitor::new(health, nodes);
  let cancel = CancellationToken::new();
  let handle = tokio::spawn(monitor.run(Duration::from_secs(30), cancel.clone()));

  let first = snapshots.recv().await.unwrap();
  let second = snapshots.recv().await.unwrap();
  assert_eq!(first.consecutive_failures("pi41", "ssh"), 1);
  assert_eq!(second.consecutive_failures("pi41", "ssh"), 2);

  cancel.cancel();
  handle.await.unwrap().unwrap();
}
