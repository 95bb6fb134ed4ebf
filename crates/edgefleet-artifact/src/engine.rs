use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::error::SyncError;
use crate::manifest::{ArtifactDigest, Manifest, sha256_hex};
use crate::report::{ArtifactOutcome, SyncReport, TransferStatus};
use crate::store::ArtifactStore;

pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Why an artifact is in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TransferReason {
  Missing,
  /// The target holds the id with a different digest.
  HashMismatch { found: ArtifactDigest },
}

/// Copy one artifact from `source` to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOp {
  pub id: String,
  pub digest: ArtifactDigest,
  pub source: String,
  pub target: String,
  #[serde(flatten)]
  pub reason: TransferReason,
}

/// A completed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transferred {
  pub bytes: u64,
  /// Offset the copy resumed from; 0 for a fresh transfer.
  pub resumed_from: u64,
}

/// Entries present at `source` and absent or different at `target`.
pub fn diff(source: &Manifest, target: &Manifest, source_name: &str, target_name: &str) -> Vec<TransferOp> {
  source
    .artifacts
    .iter()
    .filter_map(|(id, digest)| {
      let reason = match target.get(id) {
        None => TransferReason::Missing,
        Some(found) if found == digest => return None,
        Some(found) => TransferReason::HashMismatch { found: found.clone() },
      };
      Some(TransferOp {
        id: id.clone(),
        digest: digest.clone(),
        source: source_name.to_string(),
        target: target_name.to_string(),
        reason,
      })
    })
    .collect()
}

/// Plans and runs manifest-driven, chunked, resumable transfers.
#[derive(Debug, Clone)]
pub struct SyncEngine {
  chunk_size: u64,
}

impl Default for SyncEngine {
  fn default() -> Self {
    Self::new(DEFAULT_CHUNK_SIZE)
  }
}

impl SyncEngine {
  pub fn new(chunk_size: u64) -> Self {
    Self {
      chunk_size: chunk_size.max(1),
    }
  }

  pub fn chunk_size(&self) -> u64 {
    self.chunk_size
  }

  /// Diff the two manifests. Satisfied entries are left out, so a plan made
  /// right after a successful sync is empty.
  #[instrument(name = "sync_plan", skip_all, fields(source = source.location(), target = target.location()))]
  pub async fn plan(
    &self,
    source: &dyn ArtifactStore,
    target: &dyn ArtifactStore,
  ) -> Result<Vec<TransferOp>, SyncError> {
    let source_manifest = source.manifest().await?;
    let target_manifest = target.manifest().await?;
    let ops = diff(&source_manifest, &target_manifest, source.location(), target.location());

    for op in &ops {
      if let TransferReason::HashMismatch { found } = &op.reason {
        warn!(
          id = %op.id,
          source_hash = %op.digest.hash,
          target_hash = %found.hash,
          "artifact_divergence"
        );
      }
    }
    info!(planned = ops.len(), source_entries = source_manifest.len(), "sync_planned");
    Ok(ops)
  }

  /// Copy one artifact, resuming a partial copy at the target if one exists.
  ///
  /// The artifact only enters the target manifest after its full hash
  /// matched. A mismatch returns [`SyncError::Integrity`] and leaves nothing
  /// behind at the target.
  #[instrument(name = "sync_execute", skip_all, fields(id = %op.id, size = op.digest.size, target = target.location()))]
  pub async fn execute(
    &self,
    source: &dyn ArtifactStore,
    target: &dyn ArtifactStore,
    op: &TransferOp,
  ) -> Result<Transferred, SyncError> {
    let size = op.digest.size;
    let hash = op.digest.hash.as_str();

    let partial = target.partial_len(hash).await?;
    let resumed_from = (partial.min(size) / self.chunk_size) * self.chunk_size;
    if resumed_from > 0 {
      info!(resumed_from, partial, "transfer_resumed");
    }

    if size == 0 {
      target
        .write_chunk(hash, 0, Bytes::new(), &sha256_hex(b""))
        .await?;
    }
    let mut offset = resumed_from;
    while offset < size {
      let len = self.chunk_size.min(size - offset);
      let chunk = source.read_chunk(hash, offset, len).await?;
      if chunk.len() as u64 != len {
        return Err(SyncError::ShortRead {
          location: source.location().to_string(),
          hash: hash.to_string(),
          offset,
          expected: len,
          actual: chunk.len() as u64,
        });
      }
      let chunk_hash = sha256_hex(&chunk);
      target.write_chunk(hash, offset, chunk, &chunk_hash).await?;
      offset += len;
    }

    if let Err(e) = target.commit(&op.id, &op.digest).await {
      if e.is_integrity() {
        error!(error = %e, "artifact_integrity_failure");
      }
      return Err(e);
    }
    info!(bytes = size - resumed_from, "artifact_transferred");
    Ok(Transferred {
      bytes: size - resumed_from,
      resumed_from,
    })
  }

  /// Plan, then execute every op. One artifact failing does not stop the rest.
  pub async fn sync(
    &self,
    source: &dyn ArtifactStore,
    target: &dyn ArtifactStore,
  ) -> Result<SyncReport, SyncError> {
    let plan = self.plan(source, target).await?;
    Ok(self.run_plan(source, target, plan).await)
  }

  /// Like [`sync`](Self::sync) restricted to one artifact id.
  pub async fn sync_artifact(
    &self,
    source: &dyn ArtifactStore,
    target: &dyn ArtifactStore,
    id: &str,
  ) -> Result<SyncReport, SyncError> {
    let plan = self
      .plan(source, target)
      .await?
      .into_iter()
      .filter(|op| op.id == id)
      .collect();
    Ok(self.run_plan(source, target, plan).await)
  }

  async fn run_plan(
    &self,
    source: &dyn ArtifactStore,
    target: &dyn ArtifactStore,
    plan: Vec<TransferOp>,
  ) -> SyncReport {
    let started = Instant::now();
    let mut outcomes = Vec::with_capacity(plan.len());
    for op in plan {
      let status = match self.execute(source, target, &op).await {
        Ok(done) => TransferStatus::Transferred(done),
        Err(e) => TransferStatus::Failed {
          integrity: e.is_integrity(),
          error: e.to_string(),
        },
      };
      outcomes.push(ArtifactOutcome { op, status });
    }
    SyncReport {
      source: source.location().to_string(),
      target: target.location().to_string(),
      outcomes,
      elapsed: started.elapsed(),
    }
  }
}
