use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::manifest::{ArtifactDigest, Manifest, is_sha256_hex, sha256_hex};
use crate::store::ArtifactStore;

/// Filesystem artifact store.
///
/// ```text
/// {root}/manifest.json
/// {root}/blobs/{sha256}
/// {root}/partial/{sha256}
/// ```
pub struct FsStore {
  location: String,
  root: PathBuf,
  manifest_lock: Mutex<()>,
}

impl FsStore {
  pub fn new(location: impl Into<String>, root: impl Into<PathBuf>) -> Self {
    Self {
      location: location.into(),
      root: root.into(),
      manifest_lock: Mutex::new(()),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn manifest_path(&self) -> PathBuf {
    self.root.join("manifest.json")
  }

  fn blob_path(&self, hash: &str) -> Result<PathBuf, SyncError> {
    checked(hash)?;
    Ok(self.root.join("blobs").join(hash))
  }

  fn partial_path(&self, hash: &str) -> Result<PathBuf, SyncError> {
    checked(hash)?;
    Ok(self.root.join("partial").join(hash))
  }

  /// Store `data` as artifact `id` directly, bypassing transfer.
  pub async fn put(&self, id: &str, data: &[u8]) -> Result<ArtifactDigest, SyncError> {
    let digest = ArtifactDigest {
      size: data.len() as u64,
      hash: sha256_hex(data),
    };
    let blob = self.blob_path(&digest.hash)?;
    write_file(&blob, data).await?;
    self.record(id, digest.clone()).await?;
    Ok(digest)
  }

  /// Path of the committed blob for `hash`.
  pub fn blob(&self, hash: &str) -> Result<PathBuf, SyncError> {
    self.blob_path(hash)
  }

  async fn write_manifest(&self, manifest: &Manifest) -> Result<(), SyncError> {
    let path = self.manifest_path();
    let json = serde_json::to_vec_pretty(manifest).map_err(|source| SyncError::Manifest {
      location: self.location.clone(),
      source,
    })?;
    let tmp = path.with_extension("json.tmp");
    write_file(&tmp, &json).await?;
    fs::rename(&tmp, &path).await.map_err(SyncError::io(&path))
  }

  async fn record(&self, id: &str, digest: ArtifactDigest) -> Result<(), SyncError> {
    let _guard = self.manifest_lock.lock().await;
    let mut manifest = self.manifest().await?;
    manifest.insert(id, digest);
    self.write_manifest(&manifest).await
  }
}

#[async_trait]
impl ArtifactStore for FsStore {
  fn location(&self) -> &str {
    &self.location
  }

  async fn manifest(&self) -> Result<Manifest, SyncError> {
    let path = self.manifest_path();
    match fs::read(&path).await {
      Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| SyncError::Manifest {
        location: self.location.clone(),
        source,
      }),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::default()),
      Err(e) => Err(SyncError::Io { path, source: e }),
    }
  }

  async fn read_chunk(&self, hash: &str, offset: u64, len: u64) -> Result<Bytes, SyncError> {
    let path = self.blob_path(hash)?;
    let mut file = File::open(&path).await.map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        SyncError::NotFound {
          location: self.location.clone(),
          hash: hash.to_string(),
        }
      } else {
        SyncError::Io { path: path.clone(), source: e }
      }
    })?;
    file
      .seek(SeekFrom::Start(offset))
      .await
      .map_err(SyncError::io(&path))?;
    let mut buf = Vec::with_capacity(len as usize);
    file
      .take(len)
      .read_to_end(&mut buf)
      .await
      .map_err(SyncError::io(&path))?;
    Ok(Bytes::from(buf))
  }

  async fn partial_len(&self, hash: &str) -> Result<u64, SyncError> {
    let path = self.partial_path(hash)?;
    match fs::metadata(&path).await {
      Ok(meta) => Ok(meta.len()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
      Err(e) => Err(SyncError::Io { path, source: e }),
    }
  }

  async fn write_chunk(
    &self,
    hash: &str,
    offset: u64,
    data: Bytes,
    chunk_hash: &str,
  ) -> Result<(), SyncError> {
    if sha256_hex(&data) != chunk_hash {
      return Err(SyncError::ChunkRejected {
        hash: hash.to_string(),
        offset,
        location: self.location.clone(),
      });
    }

    let path = self.partial_path(hash)?;
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).await.map_err(SyncError::io(parent))?;
    }
    let mut file = OpenOptions::new()
      .create(true)
      .truncate(false)
      .write(true)
      .open(&path)
      .await
      .map_err(SyncError::io(&path))?;
    file.set_len(offset).await.map_err(SyncError::io(&path))?;
    file
      .seek(SeekFrom::Start(offset))
      .await
      .map_err(SyncError::io(&path))?;
    file.write_all(&data).await.map_err(SyncError::io(&path))?;
    file.flush().await.map_err(SyncError::io(&path))?;
    debug!(location = %self.location, hash, offset, len = data.len(), "chunk_written");
    Ok(())
  }

  async fn commit(&self, id: &str, digest: &ArtifactDigest) -> Result<(), SyncError> {
    let partial = self.partial_path(&digest.hash)?;
    let actual = hash_file(&partial).await?;
    if actual != digest.hash {
      warn!(location = %self.location, id, expected = %digest.hash, actual = %actual, "partial_discarded");
      self.discard_partial(&digest.hash).await?;
      return Err(SyncError::Integrity {
        id: id.to_string(),
        location: self.location.clone(),
        expected: digest.hash.clone(),
        actual,
      });
    }

    let blob = self.blob_path(&digest.hash)?;
    if let Some(parent) = blob.parent() {
      fs::create_dir_all(parent).await.map_err(SyncError::io(parent))?;
    }
    fs::rename(&partial, &blob).await.map_err(SyncError::io(&blob))?;
    self.record(id, digest.clone()).await
  }

  async fn discard_partial(&self, hash: &str) -> Result<(), SyncError> {
    let path = self.partial_path(hash)?;
    match fs::remove_file(&path).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(SyncError::Io { path, source: e }),
    }
  }
}

fn checked(hash: &str) -> Result<(), SyncError> {
  if is_sha256_hex(hash) {
    Ok(())
  } else {
    Err(SyncError::InvalidHash(hash.to_string()))
  }
}

async fn write_file(path: &Path, data: &[u8]) -> Result<(), SyncError> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).await.map_err(SyncError::io(parent))?;
  }
  let mut file = File::create(path).await.map_err(SyncError::io(path))?;
  file.write_all(data).await.map_err(SyncError::io(path))?;
  file.flush().await.map_err(SyncError::io(path))
}

async fn hash_file(path: &Path) -> Result<String, SyncError> {
  let file = File::open(path).await.map_err(SyncError::io(path))?;
  let mut stream = ReaderStream::new(file);
  let mut hasher = Sha256::new();
  while let Some(chunk) = stream.next().await {
    hasher.update(chunk.map_err(SyncError::io(path))?);
  }
  Ok(hex::encode(hasher.finalize()))
}
