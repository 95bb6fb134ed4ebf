//! Periodic health sweeps.

use std::path::PathBuf;
use std::time::Duration;

use edgefleet_registry::Node;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::aggregator::HealthAggregator;
use crate::error::HealthError;
use crate::snapshot::HealthSnapshot;

/// Takes a snapshot every interval and publishes it on a channel.
///
/// # Usage
///
/// ```ignore
/// let (monitor, mut snapshots) = HealthMonitor::new(aggregator, nodes);
/// let cancel = CancellationToken::new();
/// tokio::spawn(monitor.run(Duration::from_secs(30), cancel.clone()));
/// while let Some(snapshot) = snapshots.recv().await {
///   print!("{}", snapshot.render(3));
/// }
/// ```
pub struct HealthMonitor {
  aggregator: HealthAggregator,
  nodes: Vec<Node>,
  previous: Option<HealthSnapshot>,
  state_file: Option<PathBuf>,
  sender: mpsc::Sender<HealthSnapshot>,
}

impl HealthMonitor {
  pub fn new(aggregator: HealthAggregator, nodes: Vec<Node>) -> (Self, mpsc::Receiver<HealthSnapshot>) {
    Self::with_buffer_size(aggregator, nodes, 16)
  }

  pub fn with_buffer_size(
    aggregator: HealthAggregator,
    nodes: Vec<Node>,
    buffer_size: usize,
  ) -> (Self, mpsc::Receiver<HealthSnapshot>) {
    let (sender, receiver) = mpsc::channel(buffer_size.max(1));
    let monitor = Self {
      aggregator,
      nodes,
      previous: None,
      state_file: None,
      sender,
    };
    (monitor, receiver)
  }

  /// Continue failure streaks from an earlier snapshot.
  pub fn resume_from(mut self, previous: Option<HealthSnapshot>) -> Self {
    self.previous = previous;
    self
  }

  /// Save the fleet-wide state to `path` after every sweep. Nodes outside
  /// this monitor's selection keep the records they had.
  pub fn persist_to(mut self, path: impl Into<PathBuf>) -> Self {
    self.state_file = Some(path.into());
    self
  }

  /// Run until cancelled or until the receiver is dropped. The first
  /// snapshot is taken immediately.
  pub async fn run(mut self, interval: Duration, cancel: CancellationToken) -> Result<(), HealthError> {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(nodes = self.nodes.len(), interval_ms = interval.as_millis() as u64, "health_monitor_started");

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("health_monitor_cancelled");
          break;
        }
        _ = ticker.tick() => {
          let result = tokio::select! {
            _ = cancel.cancelled() => {
              info!("health_monitor_cancelled");
              break;
            }
            result = self.aggregator.snapshot(&self.nodes, self.previous.as_ref()) => result,
          };
          let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
              error!(error = %e, "health_sweep_failed");
              continue;
            }
          };
          let state = snapshot.merged_over(self.previous.as_ref());
          if let Some(path) = &self.state_file
            && let Err(e) = state.save(path).await
          {
            warn!(error = %e, path = %path.display(), "health_state_not_saved");
          }
          self.previous = Some(state);
          if self.sender.send(snapshot).await.is_err() {
            info!("health_monitor_channel_closed");
            break;
          }
        }
      }
    }

    Ok(())
  }
}
