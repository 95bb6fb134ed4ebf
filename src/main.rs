use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use edgefleet_artifact::{InventoryReport, inventory_request};
use edgefleet_executor::ExecutionRequest;
use edgefleet_fanout::{FanOutReport, Table};
use edgefleet_health::{HealthMonitor, HealthSnapshot};
use edgefleet_registry::{Node, NodeFilter, RegistryError, Role};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod context;

use context::{Context, default_data_dir};

/// Edgefleet - orchestration and health for a small fleet of edge inference hosts
#[derive(Parser)]
#[command(name = "edgefleet")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the fleet file (default: <data-dir>/fleet.json)
  #[arg(long, global = true)]
  fleet: Option<PathBuf>,

  /// Path to the data directory (default: ~/.edgefleet)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Per-node deadline in milliseconds (default: from the fleet file)
  #[arg(long, global = true)]
  deadline_ms: Option<u64>,

  /// Print JSON instead of tables
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// List fleet members
  Nodes {
    #[command(flatten)]
    select: Selection,
  },

  /// Check that every selected node answers, and that inference hosts
  /// agree on the models they share
  Status {
    #[command(flatten)]
    select: Selection,
  },

  /// Run a shell command on every selected node
  Exec {
    command: String,
    #[command(flatten)]
    select: Selection,
  },

  /// Manage the fleet SSH key
  Keys {
    #[command(subcommand)]
    action: KeysAction,
  },

  /// Distribute model artifacts between nodes
  Sync {
    #[command(subcommand)]
    action: SyncAction,
  },

  /// Probe fleet services
  Health {
    /// Re-probe every SECS seconds until interrupted
    #[arg(long, value_name = "SECS")]
    watch: Option<u64>,
    #[command(flatten)]
    select: Selection,
  },
}

#[derive(Subcommand)]
enum KeysAction {
  /// Register an existing private key as the active fleet key
  Adopt { path: PathBuf },
  /// Replace the fleet key on every node
  Rotate,
  /// Report which nodes accept the active key
  Verify,
}

#[derive(Subcommand)]
enum SyncAction {
  /// Show what would be transferred
  Plan {
    /// Source node, or `local`
    #[arg(long)]
    from: String,
    /// Target node, or `local`
    #[arg(long)]
    to: String,
  },

  /// Transfer missing and mismatched artifacts
  Run {
    #[arg(long)]
    from: String,
    #[arg(long)]
    to: String,
    /// Only this artifact
    #[arg(long)]
    model: Option<String>,
  },
}

#[derive(Args, Default)]
struct Selection {
  /// Only nodes with this role
  #[arg(long)]
  role: Vec<String>,

  /// Only nodes with this capability
  #[arg(long)]
  capability: Vec<String>,

  /// Skip nodes with this role
  #[arg(long)]
  exclude_role: Vec<String>,

  /// Only these nodes, by name
  #[arg(long = "node")]
  nodes: Vec<String>,
}

impl Selection {
  fn resolve(&self, ctx: &Context) -> Result<Vec<Node>> {
    for name in &self.nodes {
      ctx.registry.lookup(name)?;
    }
    let mut filter = NodeFilter::names(self.nodes.iter().cloned());
    for role in &self.role {
      filter = filter.role(role.as_str());
    }
    for role in &self.exclude_role {
      filter = filter.exclude_role(role.as_str());
    }
    for capability in &self.capability {
      filter = filter.capability(capability.as_str());
    }
    Ok(ctx.registry.filter(&filter))
  }
}

fn main() -> ExitCode {
  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
    )
    .init();

  let cli = Cli::parse();

  let runtime = match tokio::runtime::Runtime::new() {
    Ok(runtime) => runtime,
    Err(e) => {
      eprintln!("error: failed to start runtime: {e}");
      return ExitCode::FAILURE;
    }
  };

  let fleet_path = cli.fleet.clone();
  let data_dir = cli.data_dir.clone();
  let ctx = runtime.block_on(async move {
    let data_dir = match data_dir {
      Some(dir) => dir,
      None => default_data_dir()?,
    };
    Context::load(fleet_path, data_dir, cli.deadline_ms).await
  });
  let ctx = match ctx {
    Ok(ctx) => ctx,
    Err(e) => {
      eprintln!("error: {e:#}");
      return ExitCode::from(2);
    }
  };

  match runtime.block_on(run(cli.command, &ctx, cli.json)) {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => ExitCode::from(1),
    Err(e) => {
      eprintln!("error: {e:#}");
      if e.downcast_ref::<RegistryError>().is_some() {
        ExitCode::from(2)
      } else {
        ExitCode::from(1)
      }
    }
  }
}

/// Run one command. `Ok(false)` means it ran but not every node succeeded.
async fn run(command: Commands, ctx: &Context, json: bool) -> Result<bool> {
  match command {
    Commands::Nodes { select } => {
      let nodes = select.resolve(ctx)?;
      emit(json, &nodes, || render_nodes(&nodes))?;
      Ok(true)
    }
    Commands::Status { select } => {
      let nodes = select.resolve(ctx)?;
      let report = sweep(ctx, &nodes, |deadline| ExecutionRequest::command("uptime", deadline)).await?;
      let inventory = inventories(ctx, &nodes).await?;
      let status = FleetStatus {
        reachability: &report,
        models: inventory.as_ref(),
      };
      emit(json, &status, || {
        let mut out = report.render();
        if let Some(inventory) = &inventory {
          out.push_str("\nmodels\n");
          out.push_str(&inventory.render());
        }
        out
      })?;
      Ok(report.is_success() && inventory.as_ref().is_none_or(InventoryReport::is_consistent))
    }
    Commands::Exec { command, select } => {
      let nodes = select.resolve(ctx)?;
      let report = sweep(ctx, &nodes, |deadline| {
        ExecutionRequest::command(command.clone(), deadline).not_idempotent()
      })
      .await?;
      emit(json, &report, || report.render())?;
      Ok(report.is_success())
    }
    Commands::Keys { action } => keys(action, ctx, json).await,
    Commands::Sync { action } => sync(action, ctx, json).await,
    Commands::Health { watch, select } => health(watch, select, ctx, json).await,
  }
}

async fn sweep(
  ctx: &Context,
  nodes: &[Node],
  request: impl Fn(Duration) -> ExecutionRequest,
) -> Result<FanOutReport> {
  let coordinator = ctx.coordinator().await?;
  let deadline = ctx.deadline;
  Ok(coordinator.sweep(nodes, |_| request(deadline), deadline).await?)
}

#[derive(Serialize)]
struct FleetStatus<'a> {
  reachability: &'a FanOutReport,
  #[serde(skip_serializing_if = "Option::is_none")]
  models: Option<&'a InventoryReport>,
}

/// Model inventories of the selected inference hosts, checked for replicas
/// that disagree. `None` when no inference host is selected.
async fn inventories(ctx: &Context, nodes: &[Node]) -> Result<Option<InventoryReport>> {
  let hosts: Vec<Node> = nodes
    .iter()
    .filter(|n| matches!(n.role, Role::PrimaryAi | Role::SecondaryAi))
    .cloned()
    .collect();
  if hosts.is_empty() {
    return Ok(None);
  }
  let coordinator = ctx.coordinator().await?;
  let report = coordinator
    .sweep(&hosts, |node| inventory_request(node, ctx.deadline), ctx.deadline)
    .await?;
  Ok(Some(InventoryReport::from_results(
    hosts.iter().filter_map(|n| report.get(&n.name)),
  )))
}

async fn keys(action: KeysAction, ctx: &Context, json: bool) -> Result<bool> {
  let credentials = ctx.credentials().await?;
  match action {
    KeysAction::Adopt { path } => {
      let key = credentials.adopt(&path).await?;
      emit(json, &key, || format!("active key {} ({})\n", key.fingerprint, key.private_key.display()))?;
      Ok(true)
    }
    KeysAction::Rotate => {
      let report = credentials.rotate().await?;
      emit(json, &report, || report.render())?;
      Ok(report.is_success())
    }
    KeysAction::Verify => {
      let verification = credentials.verify().await?;
      emit(json, &verification, || verification.render())?;
      Ok(verification.is_success())
    }
  }
}

async fn sync(action: SyncAction, ctx: &Context, json: bool) -> Result<bool> {
  let engine = ctx.sync_engine();
  match action {
    SyncAction::Plan { from, to } => {
      let source = ctx.artifact_store(&from).await?;
      let target = ctx.artifact_store(&to).await?;
      let plan = engine
        .plan(source.as_ref(), target.as_ref())
        .await
        .with_context(|| format!("failed to plan {from} -> {to}"))?;
      emit(json, &plan, || {
        if plan.is_empty() {
          return format!("{to} is in sync with {from}\n");
        }
        let mut table = Table::new(["ARTIFACT", "SIZE", "REASON"]);
        for op in &plan {
          let reason = match &op.reason {
            edgefleet_artifact::TransferReason::Missing => "missing".to_string(),
            edgefleet_artifact::TransferReason::HashMismatch { found } => {
              format!("hash mismatch (target has {})", short(&found.hash))
            }
          };
          table.row([op.id.clone(), op.digest.size.to_string(), reason]);
        }
        table.render()
      })?;
      Ok(true)
    }
    SyncAction::Run { from, to, model } => {
      let source = ctx.artifact_store(&from).await?;
      let target = ctx.artifact_store(&to).await?;
      let report = match &model {
        Some(id) => engine.sync_artifact(source.as_ref(), target.as_ref(), id).await,
        None => engine.sync(source.as_ref(), target.as_ref()).await,
      }
      .with_context(|| format!("failed to sync {from} -> {to}"))?;
      emit(json, &report, || report.render())?;
      Ok(report.is_success())
    }
  }
}

async fn health(watch: Option<u64>, select: Selection, ctx: &Context, json: bool) -> Result<bool> {
  let nodes = select.resolve(ctx)?;
  let aggregator = ctx.health().await?;
  let threshold = aggregator.policy().failure_threshold;
  let path = ctx.health_path();
  let previous = HealthSnapshot::load(&path).await?;

  let Some(secs) = watch else {
    let snapshot = aggregator.snapshot(&nodes, previous.as_ref()).await?;
    snapshot.merged_over(previous.as_ref()).save(&path).await?;
    emit(json, &snapshot, || snapshot.render(threshold))?;
    return Ok(snapshot.is_healthy());
  };

  let (monitor, mut snapshots) = HealthMonitor::new(aggregator, nodes);
  let monitor = monitor.resume_from(previous).persist_to(&path);
  let cancel = CancellationToken::new();
  let task = tokio::spawn(monitor.run(Duration::from_secs(secs), cancel.clone()));

  let mut healthy = true;
  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        cancel.cancel();
        break;
      }
      snapshot = snapshots.recv() => match snapshot {
        Some(snapshot) => {
          healthy = snapshot.is_healthy();
          emit(json, &snapshot, || snapshot.render(threshold))?;
        }
        None => break,
      }
    }
  }
  task.await.context("health monitor task failed")??;
  Ok(healthy)
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<()> {
  if json {
    println!("{}", serde_json::to_string_pretty(value)?);
  } else {
    print!("{}", text());
  }
  Ok(())
}

fn render_nodes(nodes: &[Node]) -> String {
  let mut table = Table::new(["NAME", "ADDRESS", "ROLE", "CAPABILITIES", "INFERENCE"]);
  for node in nodes {
    let capabilities: Vec<&str> = node.capabilities.iter().map(String::as_str).collect();
    table.row([
      node.name.clone(),
      node.address.clone(),
      node.role.to_string(),
      capabilities.join(","),
      node.inference_port.to_string(),
    ]);
  }
  table.render()
}

fn short(hash: &str) -> &str {
  &hash[..hash.len().min(12)]
}
