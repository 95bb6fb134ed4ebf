use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use edgefleet_executor::{ErrorDetail, ExecutionRequest, ExecutionResult, RemoteExecutor};
use edgefleet_registry::Node;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::error::FanOutError;
use crate::report::FanOutReport;

/// Slack allowed past the sweep deadline for task scheduling and collection.
/// A sweep returns within `deadline + SWEEP_OVERHEAD` no matter how many
/// nodes hang.
pub const SWEEP_OVERHEAD: Duration = Duration::from_millis(250);

/// Runs one request per node concurrently and collects every outcome.
#[derive(Clone)]
pub struct Coordinator {
  executor: RemoteExecutor,
}

impl Coordinator {
  pub fn new(executor: RemoteExecutor) -> Self {
    Self { executor }
  }

  pub fn executor(&self) -> &RemoteExecutor {
    &self.executor
  }

  /// Build a request per node with `builder` and run them all at once.
  ///
  /// Every request is bounded by `deadline`, which replaces whatever deadline
  /// the builder set. The report holds exactly one entry per node in
  /// `nodes`; a node whose task was still running at the cutoff is recorded
  /// as timed out and its task aborted.
  #[instrument(
    name = "fanout_sweep",
    skip(self, nodes, builder),
    fields(nodes = nodes.len(), deadline_ms = deadline.as_millis() as u64, sweep_id)
  )]
  pub async fn sweep<F>(
    &self,
    nodes: &[Node],
    builder: F,
    deadline: Duration,
  ) -> Result<FanOutReport, FanOutError>
  where
    F: Fn(&Node) -> ExecutionRequest,
  {
    if nodes.is_empty() {
      return Err(FanOutError::EmptyNodeSet);
    }
    let mut seen = HashSet::new();
    for node in nodes {
      if !seen.insert(node.name.as_str()) {
        return Err(FanOutError::DuplicateNode {
          name: node.name.clone(),
        });
      }
    }

    let sweep_id = uuid::Uuid::new_v4().to_string();
    tracing::Span::current().record("sweep_id", sweep_id.as_str());

    let started = Instant::now();
    let cutoff = started + deadline + SWEEP_OVERHEAD;

    let mut aborts = Vec::with_capacity(nodes.len());
    let mut pending = FuturesUnordered::new();
    for node in nodes {
      let request = builder(node).with_deadline(deadline);
      let executor = self.executor.clone();
      let task_node = node.clone();
      let handle = tokio::spawn(async move { executor.execute(&task_node, &request).await });
      aborts.push(handle.abort_handle());

      let name = node.name.clone();
      pending.push(async move { (name, handle.await) });
    }

    let mut results = BTreeMap::new();
    let sleep = tokio::time::sleep_until(cutoff);
    tokio::pin!(sleep);
    loop {
      tokio::select! {
        next = pending.next() => match next {
          Some((name, Ok(result))) => {
            results.insert(name, result);
          }
          Some((name, Err(join_err))) => {
            warn!(node = %name, error = %join_err, "sweep_task_aborted");
            let detail = ErrorDetail::Aborted {
              message: join_err.to_string(),
            };
            results.insert(name.clone(), ExecutionResult::failure(name, detail, started.elapsed()));
          }
          None => break,
        },
        _ = &mut sleep => {
          warn!(outstanding = pending.len(), "sweep_cutoff_reached");
          break;
        }
      }
    }

    for abort in aborts {
      abort.abort();
    }
    for node in nodes {
      results
        .entry(node.name.clone())
        .or_insert_with(|| ExecutionResult::timeout(&node.name, deadline, started.elapsed()));
    }

    let report = FanOutReport::new(sweep_id, results, started.elapsed());
    info!(
      succeeded = report.succeeded,
      failed = report.failed,
      timed_out = report.timed_out,
      elapsed_ms = report.elapsed.as_millis() as u64,
      "sweep_completed"
    );
    Ok(report)
  }
}
