use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use edgefleet_executor::{ExecutionRequest, Identity};
use edgefleet_fanout::{AggregateStatus, Coordinator, FanOutReport};
use edgefleet_registry::Node;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::commands::KeyStoreCommands;
use crate::error::CredentialError;
use crate::key::{KeyMaterial, KeyState};
use crate::lock::RotationLock;
use crate::report::{KeyVerification, PhaseRecord, RotationPhase, RotationReport};
use crate::store::{KeyStore, Ledger};

/// Owns the fleet key and rotates it across `nodes`.
pub struct CredentialManager {
  coordinator: Coordinator,
  nodes: Vec<Node>,
  store: KeyStore,
  commands: Arc<dyn KeyStoreCommands>,
  deadline: Duration,
  rotation: Mutex<()>,
}

impl CredentialManager {
  pub fn new(
    coordinator: Coordinator,
    nodes: Vec<Node>,
    store: KeyStore,
    commands: Arc<dyn KeyStoreCommands>,
    deadline: Duration,
  ) -> Self {
    Self {
      coordinator,
      nodes,
      store,
      commands,
      deadline,
      rotation: Mutex::new(()),
    }
  }

  pub fn store(&self) -> &KeyStore {
    &self.store
  }

  pub async fn ledger(&self) -> Result<Ledger, CredentialError> {
    self.store.load_ledger().await
  }

  /// Register an existing private key (with its `.pub` beside it) as the
  /// active fleet key. Adopting the already-active key again is a no-op.
  #[instrument(name = "credential_adopt", skip(self), fields(path = %private_key.display()))]
  pub async fn adopt(&self, private_key: &Path) -> Result<KeyMaterial, CredentialError> {
    let _serial = self
      .rotation
      .try_lock()
      .map_err(|_| CredentialError::RotationInProgress)?;
    let mut ledger = self.store.load_ledger().await?;
    let key = self.store.read_existing(private_key).await?;

    if let Some(active) = ledger.active() {
      if active.fingerprint == key.fingerprint {
        return Ok(active.clone());
      }
      return Err(CredentialError::ActiveKeyExists {
        fingerprint: active.fingerprint.clone(),
      });
    }

    ledger.keys.retain(|k| k.fingerprint != key.fingerprint);
    ledger.keys.push(key.clone());
    self.store.save_ledger(&ledger).await?;
    info!(fingerprint = %key.fingerprint, "key_adopted");
    Ok(key)
  }

  /// Run one two-phase rotation.
  ///
  /// The new key only becomes active when every node verified it. Otherwise
  /// it stays pending, the report lists the nodes that did not migrate, and
  /// the next call resumes with the same key. A node's old key is removed
  /// only after the node accepted the new one.
  #[instrument(name = "credential_rotate", skip(self), fields(nodes = self.nodes.len(), rotation_id))]
  pub async fn rotate(&self) -> Result<RotationReport, CredentialError> {
    let _serial = self
      .rotation
      .try_lock()
      .map_err(|_| CredentialError::RotationInProgress)?;
    let _lock = RotationLock::acquire(&self.store.lock_path()).await?;

    let rotation_id = uuid::Uuid::new_v4().to_string();
    tracing::Span::current().record("rotation_id", rotation_id.as_str());

    let mut ledger = self.store.load_ledger().await?;
    let active = ledger.active().cloned().ok_or(CredentialError::NoActiveKey)?;

    phase(RotationPhase::Generating);
    let (new, resumed) = match ledger.pending().cloned() {
      Some(pending) => {
        info!(fingerprint = %pending.fingerprint, "rotation_resumed");
        (pending, true)
      }
      None => {
        let key = self.store.create_key().await?;
        ledger.keys.push(key.clone());
        self.store.save_ledger(&ledger).await?;
        (key, false)
      }
    };
    let new_identity = new.identity();
    let mut phases = Vec::new();

    phase(RotationPhase::Distributing);
    let auth: BTreeMap<String, Identity> = self
      .nodes
      .iter()
      .map(|node| {
        let key = ledger.auth_key(&node.name).unwrap_or(&active);
        (node.name.clone(), key.identity())
      })
      .collect();
    let append = self.commands.append(&new.public_key);
    let distributed = self
      .coordinator
      .sweep(
        &self.nodes,
        |node| {
          let request = ExecutionRequest::command(append.clone(), self.deadline).not_idempotent();
          match auth.get(&node.name) {
            Some(identity) => request.with_identity(identity.clone()),
            None => request,
          }
        },
        self.deadline,
      )
      .await?;
    let delivered = self.select(&distributed.succeeded_nodes());
    phases.push(PhaseRecord {
      phase: RotationPhase::Distributing,
      fingerprint: new.fingerprint.clone(),
      sweep: distributed,
    });

    phase(RotationPhase::Verifying);
    let mut migrated = Vec::new();
    if !delivered.is_empty() {
      let verified = self
        .sweep_as(&delivered, self.commands.list(), &new_identity)
        .await?;
      for name in verified.succeeded_nodes() {
        ledger.record_accepted(&name, &new.fingerprint);
        migrated.push(name);
      }
      self.store.save_ledger(&ledger).await?;
      phases.push(PhaseRecord {
        phase: RotationPhase::Verifying,
        fingerprint: new.fingerprint.clone(),
        sweep: verified,
      });
    }
    let not_migrated: Vec<String> = self
      .nodes
      .iter()
      .map(|n| n.name.clone())
      .filter(|name| !migrated.contains(name))
      .collect();
    for name in &not_migrated {
      warn!(node = %name, fingerprint = %new.fingerprint, "node_not_migrated");
    }

    phase(RotationPhase::RetiringOld);
    let mut retire_failures = Vec::new();
    let superseded: Vec<KeyMaterial> = ledger
      .keys
      .iter()
      .filter(|k| k.fingerprint != new.fingerprint)
      .filter(|k| matches!(k.state, KeyState::Active | KeyState::Retiring))
      .cloned()
      .collect();
    for old in &superseded {
      let holders: Vec<Node> = self
        .select(&migrated)
        .into_iter()
        .filter(|node| {
          let accepted = ledger.accepted_by(&node.name);
          accepted.contains(&old.fingerprint) && accepted.contains(&new.fingerprint) && accepted.len() > 1
        })
        .collect();
      if holders.is_empty() {
        continue;
      }

      let removed = self
        .sweep_as(&holders, self.commands.remove(&old.public_key), &new_identity)
        .await?;
      for name in removed.succeeded_nodes() {
        ledger.record_removed(&name, &old.fingerprint);
      }
      for name in removed.failed_nodes() {
        warn!(node = %name, fingerprint = %old.fingerprint, "old_key_not_removed");
        if !retire_failures.contains(&name) {
          retire_failures.push(name);
        }
      }
      phases.push(PhaseRecord {
        phase: RotationPhase::RetiringOld,
        fingerprint: old.fingerprint.clone(),
        sweep: removed,
      });
    }

    let outcome = AggregateStatus::from_failed(not_migrated.clone(), self.nodes.len());
    if outcome.is_success() {
      ledger.promote(&new.fingerprint);
    }
    let revoked = ledger.revoke_unheld(self.nodes.iter().map(|n| n.name.as_str()));
    self.store.save_ledger(&ledger).await?;

    let new_state = ledger.key(&new.fingerprint).map_or(KeyState::Pending, |k| k.state);
    phase(RotationPhase::Idle);
    info!(
      fingerprint = %new.fingerprint,
      state = ?new_state,
      migrated = migrated.len(),
      not_migrated = not_migrated.len(),
      revoked = revoked.len(),
      "rotation_finished"
    );

    Ok(RotationReport {
      rotation_id,
      new_fingerprint: new.fingerprint,
      resumed,
      new_state,
      outcome,
      phases,
      migrated,
      not_migrated,
      retire_failures,
      revoked,
    })
  }

  /// Check which nodes accept the active key.
  #[instrument(name = "credential_verify", skip(self))]
  pub async fn verify(&self) -> Result<KeyVerification, CredentialError> {
    let ledger = self.store.load_ledger().await?;
    let active = ledger.active().ok_or(CredentialError::NoActiveKey)?;
    let sweep = self
      .sweep_as(&self.nodes, self.commands.list(), &active.identity())
      .await?;
    Ok(KeyVerification {
      fingerprint: active.fingerprint.clone(),
      sweep,
    })
  }

  async fn sweep_as(
    &self,
    nodes: &[Node],
    script: String,
    identity: &Identity,
  ) -> Result<FanOutReport, CredentialError> {
    let report = self
      .coordinator
      .sweep(
        nodes,
        |_| ExecutionRequest::command(script.clone(), self.deadline).with_identity(identity.clone()),
        self.deadline,
      )
      .await?;
    Ok(report)
  }

  fn select(&self, names: &[String]) -> Vec<Node> {
    self
      .nodes
      .iter()
      .filter(|n| names.contains(&n.name))
      .cloned()
      .collect()
  }
}

fn phase(phase: RotationPhase) {
  info!(phase = phase.as_str(), "rotation_phase");
}
