use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use edgefleet_artifact::{ArtifactStore, FsStore, RemoteStore, SyncEngine};
use edgefleet_config::FleetDef;
use edgefleet_credential::{AuthorizedKeysFile, CredentialManager, KeyStore};
use edgefleet_executor::{NetworkTransport, RemoteExecutor, SshOptions};
use edgefleet_fanout::Coordinator;
use edgefleet_health::{HealthAggregator, HealthPolicy, ServiceSpec, default_services};
use edgefleet_registry::{Registry, read_fleet};
use tracing::debug;

/// Store name that refers to the local artifact directory instead of a node.
pub const LOCAL: &str = "local";

/// Everything a command needs, resolved from the fleet file and flags.
pub struct Context {
  pub fleet: FleetDef,
  pub registry: Registry,
  pub data_dir: PathBuf,
  pub deadline: Duration,
}

impl Context {
  /// Read and validate the fleet file. Every failure here is a
  /// configuration error.
  pub async fn load(fleet_path: Option<PathBuf>, data_dir: PathBuf, deadline_ms: Option<u64>) -> Result<Self> {
    let fleet_path = fleet_path.unwrap_or_else(|| data_dir.join("fleet.json"));
    let fleet = read_fleet(&fleet_path)
      .await
      .with_context(|| format!("failed to load fleet file: {}", fleet_path.display()))?;
    let registry = Registry::from_def(&fleet)
      .with_context(|| format!("invalid fleet file: {}", fleet_path.display()))?;
    let deadline = Duration::from_millis(deadline_ms.unwrap_or(fleet.defaults.deadline_ms));
    debug!(nodes = registry.len(), path = %fleet_path.display(), "fleet_loaded");
    Ok(Self {
      fleet,
      registry,
      data_dir,
      deadline,
    })
  }

  pub fn key_store(&self) -> KeyStore {
    KeyStore::new(&self.data_dir)
  }

  pub fn health_path(&self) -> PathBuf {
    self.data_dir.join("health.json")
  }

  /// The executor over ssh and HTTP. Commands without an explicit identity
  /// use the key the ledger says their node accepts, so nodes already moved
  /// to a pending key stay reachable mid-rotation. Nodes the ledger knows
  /// nothing about get the active key, then the fleet file's key.
  pub async fn executor(&self) -> Result<RemoteExecutor> {
    let ledger = self.key_store().load_ledger().await?;
    let nodes = self.registry.nodes();
    let identities = ledger.identities(nodes.iter().map(|n| n.name.as_str()));
    let default_identity = match ledger.active() {
      Some(key) => Some(key.private_key.clone()),
      None => self.fleet.ssh.identity_file.as_deref().map(expand_home),
    };
    let options = SshOptions {
      connect_timeout: Duration::from_secs(self.fleet.ssh.connect_timeout_secs),
      default_identity,
      ..SshOptions::default()
    };
    let transport = NetworkTransport::new(options).context("failed to set up transport")?;
    Ok(RemoteExecutor::new(Arc::new(transport)).with_identities(identities))
  }

  pub async fn coordinator(&self) -> Result<Coordinator> {
    Ok(Coordinator::new(self.executor().await?))
  }

  pub async fn credentials(&self) -> Result<CredentialManager> {
    Ok(CredentialManager::new(
      self.coordinator().await?,
      self.registry.nodes(),
      self.key_store(),
      Arc::new(AuthorizedKeysFile::default()),
      self.deadline,
    ))
  }

  pub async fn health(&self) -> Result<HealthAggregator> {
    let services: Vec<ServiceSpec> = if self.fleet.services.is_empty() {
      default_services()
    } else {
      self.fleet.services.iter().map(ServiceSpec::from).collect()
    };
    Ok(HealthAggregator::new(
      self.coordinator().await?,
      services,
      HealthPolicy::from(&self.fleet.health),
      self.deadline,
    ))
  }

  pub fn sync_engine(&self) -> SyncEngine {
    SyncEngine::new(self.fleet.artifacts.chunk_size)
  }

  /// `local` or a node name.
  pub async fn artifact_store(&self, name: &str) -> Result<Box<dyn ArtifactStore>> {
    if name == LOCAL {
      return Ok(Box::new(FsStore::new(LOCAL, self.data_dir.join("artifacts"))));
    }
    let node = self.registry.lookup(name)?.clone();
    Ok(Box::new(RemoteStore::new(
      self.executor().await?,
      node,
      self.fleet.artifacts.root.clone(),
      self.deadline,
    )))
  }
}

pub fn default_data_dir() -> Result<PathBuf> {
  dirs::home_dir()
    .map(|home| home.join(".edgefleet"))
    .context("could not determine home directory; pass --data-dir")
}

fn expand_home(path: &str) -> PathBuf {
  match path.strip_prefix("~/") {
    Some(rest) => dirs::home_dir().map_or_else(|| PathBuf::from(path), |home| home.join(rest)),
    None => Path::new(path).to_path_buf(),
  }
}
