//! Manifests, replica checks and the inference server's model inventory.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Size and content hash of one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactDigest {
  pub size: u64,
  /// Lowercase hex sha256.
  pub hash: String,
}

/// What one location holds, keyed by artifact id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
  #[serde(default)]
  pub artifacts: BTreeMap<String, ArtifactDigest>,
}

impl Manifest {
  pub fn get(&self, id: &str) -> Option<&ArtifactDigest> {
    self.artifacts.get(id)
  }

  pub fn insert(&mut self, id: impl Into<String>, digest: ArtifactDigest) {
    self.artifacts.insert(id.into(), digest);
  }

  pub fn len(&self) -> usize {
    self.artifacts.len()
  }

  pub fn is_empty(&self) -> bool {
    self.artifacts.is_empty()
  }

  /// Location records for every artifact held here.
  pub fn entries(&self, location: &str) -> Vec<ArtifactManifestEntry> {
    self
      .artifacts
      .iter()
      .map(|(id, digest)| ArtifactManifestEntry {
        id: id.clone(),
        size: digest.size,
        hash: digest.hash.clone(),
        location: location.to_string(),
      })
      .collect()
  }
}

/// One copy of an artifact at one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifestEntry {
  pub id: String,
  pub size: u64,
  pub hash: String,
  pub location: String,
}

/// Copies of one artifact id that disagree on size or hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DivergenceFault {
  pub id: String,
  pub variants: Vec<ReplicaVariant>,
}

/// One distinct digest of a divergent artifact and where it lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaVariant {
  pub size: u64,
  pub hash: String,
  pub locations: Vec<String>,
}

impl std::fmt::Display for DivergenceFault {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} diverges:", self.id)?;
    for variant in &self.variants {
      let short: String = variant.hash.chars().take(12).collect();
      write!(f, " [{short} {}B on {}]", variant.size, variant.locations.join(","))?;
    }
    Ok(())
  }
}

/// Report every artifact id whose copies disagree. Never picks a winner.
pub fn check_replicas(entries: &[ArtifactManifestEntry]) -> Vec<DivergenceFault> {
  let mut by_id: BTreeMap<&str, BTreeMap<ArtifactDigest, Vec<String>>> = BTreeMap::new();
  for entry in entries {
    let digest = ArtifactDigest {
      size: entry.size,
      hash: entry.hash.clone(),
    };
    by_id
      .entry(entry.id.as_str())
      .or_default()
      .entry(digest)
      .or_default()
      .push(entry.location.clone());
  }

  by_id
    .into_iter()
    .filter(|(_, variants)| variants.len() > 1)
    .map(|(id, variants)| DivergenceFault {
      id: id.to_string(),
      variants: variants
        .into_iter()
        .map(|(digest, locations)| ReplicaVariant {
          size: digest.size,
          hash: digest.hash,
          locations,
        })
        .collect(),
    })
    .collect()
}

/// Body of the inference server's `GET /api/tags`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInventory {
  #[serde(default)]
  pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
  pub name: String,
  #[serde(default)]
  pub size: u64,
  #[serde(default)]
  pub digest: String,
}

impl ModelInventory {
  pub fn names(&self) -> Vec<&str> {
    self.models.iter().map(|m| m.name.as_str()).collect()
  }

  pub fn entries(&self, location: &str) -> Vec<ArtifactManifestEntry> {
    self
      .models
      .iter()
      .map(|m| ArtifactManifestEntry {
        id: m.name.clone(),
        size: m.size,
        hash: m.digest.trim_start_matches("sha256:").to_ascii_lowercase(),
        location: location.to_string(),
      })
      .collect()
  }
}

pub fn sha256_hex(data: &[u8]) -> String {
  hex::encode(Sha256::digest(data))
}

pub(crate) fn is_sha256_hex(s: &str) -> bool {
  s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(id: &str, hash: &str, location: &str) -> ArtifactManifestEntry {
    ArtifactManifestEntry {
      id: id.to_string(),
      size: 100,
      hash: hash.to_string(),
      location: location.to_string(),
    }
  }

  #[test]
  fn test_agreeing_replicas_are_not_faults() {
    let entries = vec![
      entry("llama3:8b", "aa", "agx0"),
      entry("llama3:8b", "aa", "orin0"),
      entry("phi3:mini", "bb", "agx0"),
    ];
    assert!(check_replicas(&entries).is_empty());
  }

  #[test]
  fn test_divergent_replicas_name_every_location() {
    let entries = vec![
      entry("llama3:8b", "aa", "agx0"),
      entry("llama3:8b", "cc", "orin0"),
      entry("llama3:8b", "aa", "nano"),
    ];
    let faults = check_replicas(&entries);
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].id, "llama3:8b");
    let locations: Vec<Vec<String>> = faults[0].variants.iter().map(|v| v.locations.clone()).collect();
    assert!(locations.contains(&vec!["agx0".to_string(), "nano".to_string()]));
    assert!(locations.contains(&vec!["orin0".to_string()]));
  }

  #[test]
  fn test_size_difference_alone_diverges() {
    let mut short = entry("phi3:mini", "aa", "pi52");
    short.size = 99;
    let faults = check_replicas(&[entry("phi3:mini", "aa", "agx0"), short]);
    assert_eq!(faults.len(), 1);
  }

  #[test]
  fn test_model_inventory_from_api_tags() {
    let body = r#"{"models":[
      {"name":"llama3.2:3b","model":"llama3.2:3b","size":2019393189,
       "digest":"a80c4f17acd55265feec403c7aef86be0c25983ab279d83f3bcd3abbcb5b8b72",
       "details":{"family":"llama"}},
      {"name":"nomic-embed-text:latest","size":274302450,"digest":"sha256:0A109F422B47"}
    ]}"#;
    let inventory: ModelInventory = serde_json::from_str(body).unwrap();
    assert_eq!(inventory.names(), vec!["llama3.2:3b", "nomic-embed-text:latest"]);

    let entries = inventory.entries("agx0");
    assert_eq!(entries[0].size, 2019393189);
    assert_eq!(entries[0].location, "agx0");
    assert_eq!(entries[1].hash, "0a109f422b47");
  }

  #[test]
  fn test_empty_inventory() {
    let inventory: ModelInventory = serde_json::from_str(r#"{"models":[]}"#).unwrap();
    assert!(inventory.models.is_empty());
    let missing: ModelInventory = serde_json::from_str("{}").unwrap();
    assert!(missing.models.is_empty());
  }

  #[test]
  fn test_sha256_hex() {
    assert_eq!(
      sha256_hex(b""),
      "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
    assert!(is_sha256_hex(&sha256_hex(b"abc")));
    assert!(!is_sha256_hex("../../etc/passwd"));
  }
}
