use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use edgefleet_executor::{ErrorDetail, ExecutionRequest, ExecutionResult, RemoteCommand, RemoteExecutor};
use edgefleet_registry::Node;
use tokio::sync::Mutex;

use crate::error::SyncError;
use crate::manifest::{ArtifactDigest, Manifest, is_sha256_hex};
use crate::store::ArtifactStore;

/// Exit code the commit script uses for a whole-file hash mismatch.
const EXIT_INTEGRITY: i32 = 3;
/// Exit code the chunk writer uses for a chunk digest mismatch.
const EXIT_CHUNK: i32 = 4;

/// The [`FsStore`](crate::FsStore) layout on a node, driven over the remote
/// executor with coreutils (`cat`, `dd`, `stat`, `sha256sum`, `mv`).
pub struct RemoteStore {
  executor: RemoteExecutor,
  node: Node,
  root: String,
  deadline: Duration,
  manifest_lock: Mutex<()>,
}

impl RemoteStore {
  pub fn new(executor: RemoteExecutor, node: Node, root: impl Into<String>, deadline: Duration) -> Self {
    Self {
      executor,
      node,
      root: root.into(),
      deadline,
      manifest_lock: Mutex::new(()),
    }
  }

  fn dir(&self) -> String {
    quote(&self.root)
  }

  fn manifest_script(&self) -> String {
    format!("cat {}/manifest.json 2>/dev/null || echo '{{}}'", self.dir())
  }

  fn read_script(&self, hash: &str, offset: u64, len: u64) -> String {
    format!(
      "dd if={}/blobs/{hash} iflag=skip_bytes,count_bytes skip={offset} count={len} status=none",
      self.dir()
    )
  }

  fn partial_len_script(&self, hash: &str) -> String {
    format!("stat -c %s {}/partial/{hash} 2>/dev/null || echo 0", self.dir())
  }

  fn write_script(&self, hash: &str, offset: u64, len: u64, chunk_hash: &str) -> String {
    let dir = self.dir();
    format!(
      "mkdir -p {dir}/partial && f={dir}/partial/{hash} && \
       dd of=\"$f\" oflag=seek_bytes seek={offset} conv=notrunc status=none && \
       truncate -s {end} \"$f\" && \
       got=$(dd if=\"$f\" iflag=skip_bytes,count_bytes skip={offset} count={len} status=none | sha256sum | cut -d' ' -f1) && \
       if [ \"$got\" != {chunk_hash} ]; then truncate -s {offset} \"$f\"; exit {EXIT_CHUNK}; fi",
      end = offset + len,
    )
  }

  fn commit_script(&self, hash: &str) -> String {
    let dir = self.dir();
    format!(
      "f={dir}/partial/{hash}; got=$(sha256sum \"$f\" | cut -d' ' -f1) || exit 1; \
       if [ \"$got\" != {hash} ]; then rm -f \"$f\"; echo \"$got\" >&2; exit {EXIT_INTEGRITY}; fi; \
       mkdir -p {dir}/blobs && mv \"$f\" {dir}/blobs/{hash}"
    )
  }

  fn store_manifest_script(&self) -> String {
    let dir = self.dir();
    format!("mkdir -p {dir} && cat > {dir}/manifest.json.tmp && mv {dir}/manifest.json.tmp {dir}/manifest.json")
  }

  async fn run(&self, command: RemoteCommand) -> ExecutionResult {
    let request = ExecutionRequest::remote(command, self.deadline);
    self.executor.execute(&self.node, &request).await
  }

  async fn run_ok(&self, command: RemoteCommand) -> Result<Bytes, SyncError> {
    let result = self.run(command).await;
    if result.is_success() {
      Ok(result.output)
    } else {
      Err(self.remote_error(result))
    }
  }

  fn remote_error(&self, result: ExecutionResult) -> SyncError {
    let detail = result.error.unwrap_or(ErrorDetail::Timeout {
      deadline_ms: self.deadline.as_millis() as u64,
    });
    SyncError::Remote {
      location: self.node.name.clone(),
      detail,
    }
  }

  fn parse_manifest(&self, output: &[u8]) -> Result<Manifest, SyncError> {
    serde_json::from_slice(output).map_err(|source| SyncError::Manifest {
      location: self.node.name.clone(),
      source,
    })
  }
}

#[async_trait]
impl ArtifactStore for RemoteStore {
  fn location(&self) -> &str {
    &self.node.name
  }

  async fn manifest(&self) -> Result<Manifest, SyncError> {
    let output = self.run_ok(RemoteCommand::new(self.manifest_script())).await?;
    self.parse_manifest(&output)
  }

  async fn read_chunk(&self, hash: &str, offset: u64, len: u64) -> Result<Bytes, SyncError> {
    checked(hash)?;
    self.run_ok(RemoteCommand::new(self.read_script(hash, offset, len))).await
  }

  async fn partial_len(&self, hash: &str) -> Result<u64, SyncError> {
    checked(hash)?;
    let output = self.run_ok(RemoteCommand::new(self.partial_len_script(hash))).await?;
    Ok(parse_len(&output))
  }

  async fn write_chunk(
    &self,
    hash: &str,
    offset: u64,
    data: Bytes,
    chunk_hash: &str,
  ) -> Result<(), SyncError> {
    checked(hash)?;
    checked(chunk_hash)?;
    let script = self.write_script(hash, offset, data.len() as u64, chunk_hash);
    let result = self.run(RemoteCommand::new(script).with_stdin(data)).await;
    match &result.error {
      None => Ok(()),
      Some(ErrorDetail::Exit { code, .. }) if *code == EXIT_CHUNK => Err(SyncError::ChunkRejected {
        hash: hash.to_string(),
        offset,
        location: self.node.name.clone(),
      }),
      Some(_) => Err(self.remote_error(result)),
    }
  }

  async fn commit(&self, id: &str, digest: &ArtifactDigest) -> Result<(), SyncError> {
    checked(&digest.hash)?;
    let result = self.run(RemoteCommand::new(self.commit_script(&digest.hash))).await;
    match &result.error {
      None => {}
      Some(ErrorDetail::Exit { code, stderr }) if *code == EXIT_INTEGRITY => {
        return Err(SyncError::Integrity {
          id: id.to_string(),
          location: self.node.name.clone(),
          expected: digest.hash.clone(),
          actual: stderr.trim().to_string(),
        });
      }
      Some(_) => return Err(self.remote_error(result)),
    }

    let _guard = self.manifest_lock.lock().await;
    let mut manifest = self.manifest().await?;
    manifest.insert(id, digest.clone());
    let json = serde_json::to_vec_pretty(&manifest).map_err(|source| SyncError::Manifest {
      location: self.node.name.clone(),
      source,
    })?;
    self
      .run_ok(RemoteCommand::new(self.store_manifest_script()).with_stdin(json))
      .await
      .map(|_| ())
  }

  async fn discard_partial(&self, hash: &str) -> Result<(), SyncError> {
    checked(hash)?;
    self
      .run_ok(RemoteCommand::new(format!("rm -f {}/partial/{hash}", self.dir())))
      .await
      .map(|_| ())
  }
}

fn checked(hash: &str) -> Result<(), SyncError> {
  if is_sha256_hex(hash) {
    Ok(())
  } else {
    Err(SyncError::InvalidHash(hash.to_string()))
  }
}

fn parse_len(output: &[u8]) -> u64 {
  String::from_utf8_lossy(output).trim().parse().unwrap_or(0)
}

fn quote(s: &str) -> String {
  format!("'{}'", s.replace('\'', r"'\''"))
}
