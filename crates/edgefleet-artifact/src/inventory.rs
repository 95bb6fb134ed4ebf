//! Fleet-wide model inventories read from the inference servers.

use std::collections::BTreeMap;
use std::time::Duration;

use edgefleet_executor::{ExecutionRequest, ExecutionResult, HttpProbe};
use edgefleet_registry::Node;
use serde::Serialize;
use tracing::warn;

use crate::manifest::{ArtifactManifestEntry, DivergenceFault, ModelInventory, check_replicas};

/// Path of the inference server's model listing.
pub const INVENTORY_PATH: &str = "/api/tags";

/// The request that reads one node's model inventory.
pub fn inventory_request(node: &Node, deadline: Duration) -> ExecutionRequest {
  ExecutionRequest::http(HttpProbe::get(node.inference_port, INVENTORY_PATH), deadline)
}

/// Model inventories gathered across nodes, checked for replicas that
/// disagree on size or digest.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InventoryReport {
  pub inventories: BTreeMap<String, ModelInventory>,
  /// Nodes whose inventory could not be read, with the reason.
  pub unavailable: BTreeMap<String, String>,
  pub faults: Vec<DivergenceFault>,
}

impl InventoryReport {
  /// Build from the results of [`inventory_request`], one per node.
  pub fn from_results<'a>(results: impl IntoIterator<Item = &'a ExecutionResult>) -> Self {
    let mut report = InventoryReport::default();
    for result in results {
      if let Some(error) = &result.error {
        report.unavailable.insert(result.node.clone(), error.to_string());
        continue;
      }
      match result.json::<ModelInventory>() {
        Ok(inventory) => {
          report.inventories.insert(result.node.clone(), inventory);
        }
        Err(e) => {
          report
            .unavailable
            .insert(result.node.clone(), format!("unreadable model inventory: {e}"));
        }
      }
    }

    let entries: Vec<ArtifactManifestEntry> = report
      .inventories
      .iter()
      .flat_map(|(node, inventory)| inventory.entries(node))
      .collect();
    report.faults = check_replicas(&entries);
    for fault in &report.faults {
      warn!(artifact = %fault.id, variants = fault.variants.len(), "replica_divergence");
    }
    report
  }

  /// No replica disagrees. Unreadable nodes do not count against this.
  pub fn is_consistent(&self) -> bool {
    self.faults.is_empty()
  }

  pub fn render(&self) -> String {
    let mut out = String::new();
    for (node, inventory) in &self.inventories {
      out.push_str(&format!("  {:<10} {} models: {}\n", node, inventory.models.len(), inventory.names().join(", ")));
    }
    for (node, reason) in &self.unavailable {
      out.push_str(&format!("  {node:<10} inventory unavailable: {reason}\n"));
    }
    if self.faults.is_empty() {
      out.push_str("model replicas consistent\n");
    }
    for fault in &self.faults {
      out.push_str(&format!("DIVERGENCE {fault}\n"));
    }
    out
  }
}
