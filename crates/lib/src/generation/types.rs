use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DeclarativeConfig;
use crate::state_lock::StateLockError;
use crate::util::hash::{ContentHash, short_hash};

/// Immutable snapshot of desired and achieved state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
  pub id: u64,
  pub timestamp: u64,
  pub config: DeclarativeConfig,
  pub state_hash: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub installations: BTreeMap<String, InstallationState>,
  /// Set once apply realized every planned change. Only complete
  /// generations are promoted or picked as default rollback targets.
  #[serde(default)]
  pub complete: bool,
}

impl Generation {
  /// Short hash over the config and realized installations.
  pub fn compute_state_hash(
    config: &DeclarativeConfig,
    installations: &BTreeMap<String, InstallationState>,
  ) -> Result<String, serde_json::Error> {
    short_hash(&(config, installations))
  }

  pub fn addon_count(&self) -> usize {
    self.installations.values().map(|i| i.addons.len()).sum()
  }

  /// Every content hash this generation references.
  pub fn content_hashes(&self) -> HashSet<ContentHash> {
    self
      .installations
      .values()
      .flat_map(|i| i.addons.values())
      .map(|a| a.hash.clone())
      .collect()
  }

  /// Recorded addon `addon` in installation `installation`, if any.
  pub fn addon(&self, installation: &str, addon: &str) -> Option<&InstalledAddon> {
    self.installations.get(installation)?.addons.get(addon)
  }
}

/// What was realized in one installation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationState {
  pub path: PathBuf,
  #[serde(default)]
  pub addons: BTreeMap<String, InstalledAddon>,
}

/// One addon activated in an installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledAddon {
  pub id: String,
  #[serde(default)]
  pub version: String,
  pub hash: ContentHash,
  /// Descriptor hash the content was realized from.
  pub descriptor: String,
  pub store_path: PathBuf,
  pub install_path: PathBuf,
  pub installed_at: u64,
}

#[derive(Debug, Error)]
pub enum GenerationError {
  #[error("generation {0} not found")]
  NotFound(u64),

  #[error("no current generation")]
  NoCurrent,

  #[error("corrupt generation state at '{path}': {message}")]
  Corrupt { path: PathBuf, message: String },

  #[error("{0}")]
  InvariantViolation(String),

  #[error("generation storage error at '{path}': {source}")]
  Storage {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to serialize generation: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error(transparent)]
  Lock(#[from] StateLockError),
}

impl GenerationError {
  pub(crate) fn storage(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> GenerationError {
    let path = path.into();
    move |source| GenerationError::Storage { path, source }
  }
}
