use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use edgefleet_artifact::{
  ArtifactDigest, ArtifactStore, FsStore, Manifest, SyncEngine, SyncError, TransferReason, TransferStatus,
  check_replicas, sha256_hex,
};
use tempfile::TempDir;

/// Delegating store that can flip a byte in reads of one blob and records
/// the offsets it served.
struct Tamper {
  inner: FsStore,
  corrupt: Option<String>,
  reads: Mutex<Vec<u64>>,
}

impl Tamper {
  fn new(inner: FsStore) -> Self {
    Self {
      inner,
      corrupt: None,
      reads: Mutex::new(Vec::new()),
    }
  }

  fn corrupting(mut self, hash: &str) -> Self {
    self.corrupt = Some(hash.to_string());
    self
  }
}

#[async_trait]
impl ArtifactStore for Tamper {
  fn location(&self) -> &str {
    self.inner.location()
  }

  async fn manifest(&self) -> Result<Manifest, SyncError> {
    self.inner.manifest().await
  }

  async fn read_chunk(&self, hash: &str, offset: u64, len: u64) -> Result<Bytes, SyncError> {
    self.reads.lock().unwrap().push(offset);
    let chunk = self.inner.read_chunk(hash, offset, len).await?;
    if self.corrupt.as_deref() == Some(hash) && offset == 0 {
      let mut bytes = chunk.to_vec();
      bytes[0] ^= 0xff;
      return Ok(Bytes::from(bytes));
    }
    Ok(chunk)
  }

  async fn partial_len(&self, hash: &str) -> Result<u64, SyncError> {
    self.inner.partial_len(hash).await
  }

  async fn write_chunk(&self, hash: &str, offset: u64, data: Bytes, chunk_hash: &str) -> Result<(), SyncError> {
    self.inner.write_chunk(hash, offset, data, chunk_hash).await
  }

  async fn commit(&self, id: &str, digest: &ArtifactDigest) -> Result<(), SyncError> {
    self.inner.commit(id, digest).await
  }

  async fn discard_partial(&self, hash: &str) -> Result<(), SyncError> {
    self.inner.discard_partial(hash).await
  }
}

/// Target that damages chunks in flight, after the sender hashed them.
struct LossyLink(FsStore);

#[async_trait]
impl ArtifactStore for LossyLink {
  fn location(&self) -> &str {
    self.0.location()
  }

  async fn manifest(&self) -> Result<Manifest, SyncError> {
    self.0.manifest().await
  }

  async fn read_chunk(&self, hash: &str, offset: u64, len: u64) -> Result<Bytes, SyncError> {
    self.0.read_chunk(hash, offset, len).await
  }

  async fn partial_len(&self, hash: &str) -> Result<u64, SyncError> {
    self.0.partial_len(hash).await
  }

  async fn write_chunk(&self, hash: &str, offset: u64, data: Bytes, chunk_hash: &str) -> Result<(), SyncError> {
    let mut damaged = data.to_vec();
    damaged.push(0);
    self.0.write_chunk(hash, offset, Bytes::from(damaged), chunk_hash).await
  }

  async fn commit(&self, id: &str, digest: &ArtifactDigest) -> Result<(), SyncError> {
    self.0.commit(id, digest).await
  }

  async fn discard_partial(&self, hash: &str) -> Result<(), SyncError> {
    self.0.discard_partial(hash).await
  }
}

fn stores() -> (TempDir, FsStore, FsStore) {
  let dir = tempfile::tempdir().unwrap();
  let source = FsStore::new("agx0", dir.path().join("agx0"));
  let target = FsStore::new("orin0", dir.path().join("orin0"));
  (dir, source, target)
}

fn weights(seed: u8, len: usize) -> Vec<u8> {
  (0..len).map(|i| seed.wrapping_add((i % 251) as u8)).collect()
}

#[tokio::test]
async fn test_three_entry_manifest_missing_and_mismatched() {
  let (_dir, source, target) = stores();
  source.put("llama3.2:3b", &weights(1, 300)).await.unwrap();
  source.put("phi3:mini", &weights(2, 200)).await.unwrap();
  source.put("nomic-embed-text", &weights(3, 100)).await.unwrap();
  target.put("llama3.2:3b", &weights(1, 300)).await.unwrap();
  target.put("phi3:mini", &weights(9, 200)).await.unwrap();

  let engine = SyncEngine::new(64);
  let plan = engine.plan(&source, &target).await.unwrap();

  let ids: Vec<&str> = plan.iter().map(|op| op.id.as_str()).collect();
  assert_eq!(ids, vec!["nomic-embed-text", "phi3:mini"]);
  assert_eq!(plan[0].reason, TransferReason::Missing);
  assert!(matches!(plan[1].reason, TransferReason::HashMismatch { .. }));

  for op in &plan {
    engine.execute(&source, &target, op).await.unwrap();
  }
  assert_eq!(target.manifest().await.unwrap(), source.manifest().await.unwrap());

  assert!(engine.plan(&source, &target).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sync_is_idempotent() {
  let (_dir, source, target) = stores();
  source.put("phi3:mini", &weights(2, 1000)).await.unwrap();
  let engine = SyncEngine::new(128);

  let first = engine.sync(&source, &target).await.unwrap();
  assert!(first.is_success());
  assert_eq!(first.bytes_transferred(), 1000);

  let second = engine.sync(&source, &target).await.unwrap();
  assert!(second.outcomes.is_empty());
  assert!(second.render().contains("in sync"));
}

#[tokio::test]
async fn test_corrupted_transfer_is_integrity_error_and_never_committed() {
  let (_dir, source, target) = stores();
  let digest = source.put("llama3.2:3b", &weights(5, 500)).await.unwrap();
  let tampered = Tamper::new(source).corrupting(&digest.hash);
  let engine = SyncEngine::new(64);

  let plan = engine.plan(&tampered, &target).await.unwrap();
  let err = engine.execute(&tampered, &target, &plan[0]).await.unwrap_err();

  assert!(matches!(err, SyncError::Integrity { .. }));
  assert!(target.manifest().await.unwrap().is_empty());
  assert_eq!(target.partial_len(&digest.hash).await.unwrap(), 0);
  assert_eq!(engine.plan(&tampered, &target).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_one_failed_artifact_does_not_stop_the_rest() {
  let (_dir, source, target) = stores();
  let bad = source.put("bad-model", &weights(7, 256)).await.unwrap();
  source.put("good-model", &weights(8, 256)).await.unwrap();
  let tampered = Tamper::new(source).corrupting(&bad.hash);

  let report = SyncEngine::new(64).sync(&tampered, &target).await.unwrap();

  assert!(!report.is_success());
  let failed = report.failed();
  assert_eq!(failed.len(), 1);
  assert_eq!(failed[0].op.id, "bad-model");
  assert!(matches!(failed[0].status, TransferStatus::Failed { integrity: true, .. }));

  let manifest = target.manifest().await.unwrap();
  assert!(manifest.get("good-model").is_some());
  assert!(manifest.get("bad-model").is_none());
  assert!(report.render().contains("FAILED"));
}

#[tokio::test]
async fn test_chunk_damaged_in_flight_is_rejected() {
  let (_dir, source, target) = stores();
  source.put("phi3:mini", &weights(2, 100)).await.unwrap();
  let lossy = LossyLink(target);

  let report = SyncEngine::new(32).sync(&source, &lossy).await.unwrap();

  assert!(matches!(
    report.outcomes[0].status,
    TransferStatus::Failed { integrity: true, .. }
  ));
  assert!(lossy.manifest().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transfer_resumes_from_chunk_aligned_partial() {
  let (_dir, source, target) = stores();
  let data = weights(4, 10);
  let digest = source.put("tiny", &data).await.unwrap();

  target
    .write_chunk(&digest.hash, 0, Bytes::from(data[..4].to_vec()), &sha256_hex(&data[..4]))
    .await
    .unwrap();
  target
    .write_chunk(&digest.hash, 4, Bytes::from(data[4..6].to_vec()), &sha256_hex(&data[4..6]))
    .await
    .unwrap();
  assert_eq!(target.partial_len(&digest.hash).await.unwrap(), 6);

  let counting = Tamper::new(source);
  let engine = SyncEngine::new(4);
  let plan = engine.plan(&counting, &target).await.unwrap();
  let done = engine.execute(&counting, &target, &plan[0]).await.unwrap();

  assert_eq!(done.resumed_from, 4);
  assert_eq!(done.bytes, 6);
  assert_eq!(*counting.reads.lock().unwrap(), vec![4, 8]);
  assert_eq!(target.manifest().await.unwrap().get("tiny"), Some(&digest));
}

#[tokio::test]
async fn test_empty_artifact_transfers() {
  let (_dir, source, target) = stores();
  source.put("empty", b"").await.unwrap();
  let report = SyncEngine::default().sync(&source, &target).await.unwrap();
  assert!(report.is_success());
  assert_eq!(target.manifest().await.unwrap().get("empty").unwrap().size, 0);
}

#[tokio::test]
async fn test_sync_single_artifact() {
  let (_dir, source, target) = stores();
  source.put("a", &weights(1, 10)).await.unwrap();
  source.put("b", &weights(2, 10)).await.unwrap();

  let report = SyncEngine::new(4).sync_artifact(&source, &target, "b").await.unwrap();

  assert_eq!(report.outcomes.len(), 1);
  let manifest = target.manifest().await.unwrap();
  assert!(manifest.get("a").is_none());
  assert!(manifest.get("b").is_some());
}

#[tokio::test]
async fn test_replica_divergence_across_stores() {
  let dir = tempfile::tempdir().unwrap();
  let agx0 = FsStore::new("agx0", dir.path().join("agx0"));
  let orin0 = FsStore::new("orin0", dir.path().join("orin0"));
  let nano = FsStore::new("nano", dir.path().join("nano"));
  agx0.put("llama3.2:3b", &weights(1, 64)).await.unwrap();
  orin0.put("llama3.2:3b", &weights(1, 64)).await.unwrap();
  nano.put("llama3.2:3b", &weights(6, 64)).await.unwrap();

  let mut entries = Vec::new();
  for store in [&agx0, &orin0, &nano] {
    entries.extend(store.manifest().await.unwrap().entries(store.location()));
  }
  let faults = check_replicas(&entries);

  assert_eq!(faults.len(), 1);
  assert_eq!(faults[0].variants.len(), 2);
  assert!(faults[0].to_string().contains("nano"));
}
