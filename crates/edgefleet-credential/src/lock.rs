use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::CredentialError;

/// Cross-process rotation lock: a file created exclusively, removed on drop.
///
/// The file holds the owner's pid. A lock whose owner no longer runs (the
/// process was killed before it could release) is taken over.
#[derive(Debug)]
pub struct RotationLock {
  path: PathBuf,
}

impl RotationLock {
  pub async fn acquire(path: &Path) -> Result<Self, CredentialError> {
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(CredentialError::io(parent))?;
    }
    match Self::create(path).await {
      Err(CredentialError::RotationLocked { pid, .. }) if is_stale(&pid) => {
        warn!(path = %path.display(), pid = %pid, "rotation_lock_stale");
        match tokio::fs::remove_file(path).await {
          Ok(()) => {}
          Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
          Err(e) => return Err(CredentialError::Io { path: path.to_path_buf(), source: e }),
        }
        Self::create(path).await
      }
      other => other,
    }
  }

  async fn create(path: &Path) -> Result<Self, CredentialError> {
    let mut file = match tokio::fs::OpenOptions::new()
      .write(true)
      .create_new(true)
      .open(path)
      .await
    {
      Ok(file) => file,
      Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
        let pid = tokio::fs::read_to_string(path).await.unwrap_or_default();
        return Err(CredentialError::RotationLocked {
          path: path.to_path_buf(),
          pid: pid.trim().to_string(),
        });
      }
      Err(e) => return Err(CredentialError::Io { path: path.to_path_buf(), source: e }),
    };
    file
      .write_all(format!("{}\n", std::process::id()).as_bytes())
      .await
      .map_err(CredentialError::io(path))?;
    Ok(Self {
      path: path.to_path_buf(),
    })
  }
}

/// True only when the recorded owner is known to be gone. An unreadable pid
/// may belong to a process that has not written it yet, so it is not stale.
fn is_stale(pid: &str) -> bool {
  let Ok(pid) = pid.parse::<u32>() else {
    return false;
  };
  let procfs = Path::new("/proc");
  procfs.is_dir() && !procfs.join(pid.to_string()).exists()
}

impl Drop for RotationLock {
  fn drop(&mut self) {
    if let Err(e) = std::fs::remove_file(&self.path) {
      warn!(path = %self.path.display(), error = %e, "rotation_lock_release_failed");
    }
  }
}
