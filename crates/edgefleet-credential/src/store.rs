//! Local key files and the credential ledger.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::Utc;
use edgefleet_executor::Identity;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CredentialError;
use crate::key::{self, KeyMaterial, KeyState};

/// Every key the orchestrator has known, and which of them each node is
/// believed to accept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
  pub keys: Vec<KeyMaterial>,
  /// Node name to fingerprints the node has been seen to accept. A node
  /// without an entry is assumed to accept the active key.
  #[serde(default)]
  pub accepted: BTreeMap<String, BTreeSet<String>>,
}

impl Ledger {
  pub fn active(&self) -> Option<&KeyMaterial> {
    self.with_state(KeyState::Active).next()
  }

  pub fn pending(&self) -> Option<&KeyMaterial> {
    self.with_state(KeyState::Pending).next()
  }

  pub fn with_state(&self, state: KeyState) -> impl Iterator<Item = &KeyMaterial> {
    self.keys.iter().filter(move |k| k.state == state)
  }

  pub fn key(&self, fingerprint: &str) -> Option<&KeyMaterial> {
    self.keys.iter().find(|k| k.fingerprint == fingerprint)
  }

  pub fn accepted_by(&self, node: &str) -> BTreeSet<String> {
    match self.accepted.get(node) {
      Some(set) => set.clone(),
      None => self.active().map(|k| k.fingerprint.clone()).into_iter().collect(),
    }
  }

  pub fn record_accepted(&mut self, node: &str, fingerprint: &str) {
    let mut set = self.accepted_by(node);
    set.insert(fingerprint.to_string());
    self.accepted.insert(node.to_string(), set);
  }

  pub fn record_removed(&mut self, node: &str, fingerprint: &str) {
    let mut set = self.accepted_by(node);
    set.remove(fingerprint);
    self.accepted.insert(node.to_string(), set);
  }

  /// Key to authenticate with on `node`: the active key if the node accepts
  /// it, else a pending one, else a retiring one.
  pub fn auth_key(&self, node: &str) -> Option<&KeyMaterial> {
    let accepted = self.accepted_by(node);
    [KeyState::Active, KeyState::Pending, KeyState::Retiring]
      .into_iter()
      .flat_map(|state| self.with_state(state))
      .find(|k| accepted.contains(&k.fingerprint))
  }

  /// Session credential for each of `nodes`, per [`Ledger::auth_key`].
  /// Nodes the ledger has no usable key for are left out.
  pub fn identities<'a>(&self, nodes: impl IntoIterator<Item = &'a str>) -> HashMap<String, Identity> {
    nodes
      .into_iter()
      .filter_map(|node| self.auth_key(node).map(|key| (node.to_string(), key.identity())))
      .collect()
  }

  /// Make `fingerprint` the active key and move the previous one to retiring.
  pub fn promote(&mut self, fingerprint: &str) {
    for key in &mut self.keys {
      if key.fingerprint == fingerprint {
        key.state = KeyState::Active;
      } else if key.state == KeyState::Active {
        key.state = KeyState::Retiring;
      }
    }
  }

  /// Revoke retiring keys that none of `nodes` still holds.
  pub fn revoke_unheld<'a>(&mut self, nodes: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let held: BTreeSet<String> = nodes
      .into_iter()
      .flat_map(|node| self.accepted_by(node))
      .collect();
    let mut revoked = Vec::new();
    for key in &mut self.keys {
      if key.state == KeyState::Retiring && !held.contains(&key.fingerprint) {
        key.state = KeyState::Revoked;
        revoked.push(key.fingerprint.clone());
      }
    }
    revoked
  }
}

/// The orchestrator's credential directory.
///
/// ```text
/// <data>/credentials.json
/// <data>/rotation.lock
/// <data>/keys/<name>, <data>/keys/<name>.pub
/// ```
#[derive(Debug, Clone)]
pub struct KeyStore {
  root: PathBuf,
}

impl KeyStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn keys_dir(&self) -> PathBuf {
    self.root.join("keys")
  }

  pub fn ledger_path(&self) -> PathBuf {
    self.root.join("credentials.json")
  }

  pub fn lock_path(&self) -> PathBuf {
    self.root.join("rotation.lock")
  }

  /// Load the ledger; a missing file is an empty ledger.
  pub async fn load_ledger(&self) -> Result<Ledger, CredentialError> {
    let path = self.ledger_path();
    match tokio::fs::read(&path).await {
      Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| CredentialError::Ledger { path, source }),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Ledger::default()),
      Err(e) => Err(CredentialError::Io { path, source: e }),
    }
  }

  /// Write the ledger through a temporary file and rename.
  pub async fn save_ledger(&self, ledger: &Ledger) -> Result<(), CredentialError> {
    tokio::fs::create_dir_all(&self.root)
      .await
      .map_err(CredentialError::io(&self.root))?;
    let path = self.ledger_path();
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(ledger).map_err(|source| CredentialError::Ledger {
      path: path.clone(),
      source,
    })?;
    tokio::fs::write(&tmp, json).await.map_err(CredentialError::io(&tmp))?;
    tokio::fs::rename(&tmp, &path).await.map_err(CredentialError::io(&path))
  }

  /// Generate a keypair, write it under `keys/`, and return it as pending.
  pub async fn create_key(&self) -> Result<KeyMaterial, CredentialError> {
    let created_at = Utc::now();
    let name = format!("edgefleet_{}", created_at.format("%Y%m%dT%H%M%S%.3fZ"));
    let generated = key::generate_key(&format!("edgefleet@{}", created_at.format("%Y-%m-%d")));

    let dir = self.keys_dir();
    tokio::fs::create_dir_all(&dir).await.map_err(CredentialError::io(&dir))?;
    let private = dir.join(&name);
    write_private(&private, generated.private_pem.as_bytes()).await?;
    let public = dir.join(format!("{name}.pub"));
    tokio::fs::write(&public, format!("{}\n", generated.public_line))
      .await
      .map_err(CredentialError::io(&public))?;

    info!(fingerprint = %generated.fingerprint, path = %private.display(), "key_generated");
    Ok(KeyMaterial {
      fingerprint: generated.fingerprint,
      public_key: generated.public_line,
      private_key: private,
      created_at,
      state: KeyState::Pending,
    })
  }

  /// Describe an existing private key by reading its `.pub` companion.
  pub async fn read_existing(&self, private_key: &Path) -> Result<KeyMaterial, CredentialError> {
    let mut public_path = private_key.as_os_str().to_owned();
    public_path.push(".pub");
    let public_path = PathBuf::from(public_path);

    let line = tokio::fs::read_to_string(&public_path)
      .await
      .map_err(CredentialError::io(&public_path))?;
    let line = line.trim().to_string();
    let fingerprint = key::fingerprint(&line).map_err(|message| CredentialError::InvalidPublicKey {
      path: public_path.clone(),
      message,
    })?;
    Ok(KeyMaterial {
      fingerprint,
      public_key: line,
      private_key: private_key.to_path_buf(),
      created_at: Utc::now(),
      state: KeyState::Active,
    })
  }
}

#[cfg(unix)]
async fn write_private(path: &Path, contents: &[u8]) -> Result<(), CredentialError> {
  use tokio::io::AsyncWriteExt;

  let mut file = tokio::fs::OpenOptions::new()
    .write(true)
    .create_new(true)
    .mode(0o600)
    .open(path)
    .await
    .map_err(CredentialError::io(path))?;
  file.write_all(contents).await.map_err(CredentialError::io(path))?;
  file.flush().await.map_err(CredentialError::io(path))
}

#[cfg(not(unix))]
async fn write_private(path: &Path, contents: &[u8]) -> Result<(), CredentialError> {
  tokio::fs::write(path, contents).await.map_err(CredentialError::io(path))
}
