use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SyncError;
use crate::manifest::{ArtifactDigest, Manifest};

/// A location holding content-addressed artifacts.
///
/// Blobs are keyed by content hash. An incoming artifact is assembled in a
/// partial file from digest-checked chunks and only enters the manifest once
/// [`commit`](ArtifactStore::commit) has verified the whole-file hash.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
  /// Name used in reports, usually the node name.
  fn location(&self) -> &str;

  async fn manifest(&self) -> Result<Manifest, SyncError>;

  /// Read `len` bytes of committed blob `hash` starting at `offset`.
  async fn read_chunk(&self, hash: &str, offset: u64, len: u64) -> Result<Bytes, SyncError>;

  /// Bytes already assembled for an incoming blob; 0 if none.
  async fn partial_len(&self, hash: &str) -> Result<u64, SyncError>;

  /// Write a chunk at `offset` of the partial blob, dropping anything after
  /// it. Rejects the chunk if its sha256 is not `chunk_hash`.
  async fn write_chunk(
    &self,
    hash: &str,
    offset: u64,
    data: Bytes,
    chunk_hash: &str,
  ) -> Result<(), SyncError>;

  /// Verify the partial blob against `digest` and publish it as `id`. On a
  /// mismatch the partial is discarded and [`SyncError::Integrity`] returned.
  async fn commit(&self, id: &str, digest: &ArtifactDigest) -> Result<(), SyncError>;

  async fn discard_partial(&self, hash: &str) -> Result<(), SyncError>;
}
