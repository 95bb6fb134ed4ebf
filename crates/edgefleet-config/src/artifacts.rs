use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactsDef {
  /// Directory on each node holding `manifest.json`, `blobs/` and `partial/`.
  #[serde(default = "default_root")]
  pub root: String,
  #[serde(default = "default_chunk_size")]
  pub chunk_size: u64,
}

impl Default for ArtifactsDef {
  fn default() -> Self {
    Self {
      root: default_root(),
      chunk_size: default_chunk_size(),
    }
  }
}

fn default_root() -> String {
  "/var/lib/edgefleet/models".to_string()
}

fn default_chunk_size() -> u64 {
  8 * 1024 * 1024
}
