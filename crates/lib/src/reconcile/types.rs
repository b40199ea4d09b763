use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{AddonSource, DeclarativeConfig};
use crate::generation::GenerationError;
use crate::store::StoreError;
use crate::util::hash::ContentHash;

/// Kind of change the plan makes to one addon in one installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
  Install,
  Update,
  Uninstall,
  Symlink,
}

impl std::fmt::Display for OperationKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      OperationKind::Install => write!(f, "install"),
      OperationKind::Update => write!(f, "update"),
      OperationKind::Uninstall => write!(f, "uninstall"),
      OperationKind::Symlink => write!(f, "symlink"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
  pub kind: OperationKind,
  pub installation: String,
  pub addon: String,
  /// Previously recorded content hash.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub from: Option<String>,
  /// Content hash when known, otherwise the descriptor hash.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub to: Option<String>,
}

/// One artifact to fetch during apply, shared by every addon using the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOperation {
  pub addon_id: String,
  pub source: AddonSource,
  /// Descriptor hash.
  pub hash: String,
  /// Configured content hash, verified after fetching.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub expected: Option<String>,
  #[serde(default)]
  pub ignore: Vec<String>,
  /// Store location, known only when `expected` is set.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub store_path: Option<PathBuf>,
}

/// Where an activation link will point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum LinkTarget {
  /// Content already in the store.
  Stored { hash: ContentHash, path: PathBuf },
  /// Resolved once the download for `descriptor` completes.
  Pending { descriptor: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedLink {
  pub link_name: String,
  pub version: String,
  pub descriptor: String,
  pub target: LinkTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallPlan {
  pub path: PathBuf,
  pub operations: Vec<Operation>,
  pub links: BTreeMap<String, PlannedLink>,
  /// Addons to remove, with their recorded install path.
  pub removals: BTreeMap<String, PathBuf>,
}

impl InstallPlan {
  pub fn new(path: PathBuf) -> Self {
    Self {
      path,
      operations: Vec::new(),
      links: BTreeMap::new(),
      removals: BTreeMap::new(),
    }
  }
}

/// Everything `apply` needs; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildPlan {
  pub current_generation: Option<u64>,
  pub config: DeclarativeConfig,
  pub operations: Vec<Operation>,
  pub downloads: Vec<DownloadOperation>,
  pub installations: BTreeMap<String, InstallPlan>,
}

impl BuildPlan {
  /// Number of operations of `kind`.
  pub fn count(&self, kind: OperationKind) -> usize {
    self.operations.iter().filter(|op| op.kind == kind).count()
  }

  /// True when applying would only re-assert existing links.
  pub fn is_noop(&self) -> bool {
    self.downloads.is_empty() && self.operations.iter().all(|op| op.kind == OperationKind::Symlink)
  }
}

/// Phase of apply that produced an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyStage {
  Download,
  Link,
  Uninstall,
  Commit,
  Cancelled,
}

impl std::fmt::Display for ApplyStage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ApplyStage::Download => write!(f, "download"),
      ApplyStage::Link => write!(f, "link"),
      ApplyStage::Uninstall => write!(f, "uninstall"),
      ApplyStage::Commit => write!(f, "commit"),
      ApplyStage::Cancelled => write!(f, "cancelled"),
    }
  }
}

/// A non-fatal failure recorded during apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyIssue {
  pub stage: ApplyStage,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub installation: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub addon: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub hash: Option<String>,
  pub message: String,
}

impl ApplyIssue {
  pub fn new(stage: ApplyStage, message: impl Into<String>) -> Self {
    Self {
      stage,
      installation: None,
      addon: None,
      hash: None,
      message: message.into(),
    }
  }

  pub fn installation(mut self, installation: &str) -> Self {
    self.installation = Some(installation.to_string());
    self
  }

  pub fn addon(mut self, addon: &str) -> Self {
    self.addon = Some(addon.to_string());
    self
  }

  pub fn hash(mut self, hash: impl Into<String>) -> Self {
    self.hash = Some(hash.into());
    self
  }
}

impl std::fmt::Display for ApplyIssue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "[{}]", self.stage)?;
    if let Some(installation) = &self.installation {
      write!(f, " {}", installation)?;
    }
    if let Some(addon) = &self.addon {
      write!(f, "/{}", addon)?;
    }
    write!(f, ": {}", self.message)
  }
}

/// Outcome of `apply` or `rollback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResult {
  pub success: bool,
  /// Generation created (apply) or targeted (rollback).
  pub generation: u64,
  pub operations: usize,
  pub downloaded: usize,
  /// Activation links realized.
  pub installed: usize,
  pub errors: Vec<ApplyIssue>,
  #[serde(with = "duration_millis")]
  pub duration: Duration,
}

mod duration_millis {
  use serde::{Deserialize, Deserializer, Serializer};
  use std::time::Duration;

  pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
  }
}

/// Shared flag checked by apply between work items.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

#[derive(Debug, Clone)]
pub struct ApplyOptions {
  /// Maximum concurrent downloads.
  pub parallelism: usize,
  pub cancel: CancelFlag,
}

impl Default for ApplyOptions {
  fn default() -> Self {
    Self {
      parallelism: 3,
      cancel: CancelFlag::new(),
    }
  }
}

#[derive(Debug, Error)]
pub enum PlanError {
  #[error("addon '{addon}' is not compatible with installation '{installation}' ({kind})")]
  IncompatibleAddon {
    addon: String,
    installation: String,
    kind: String,
  },

  #[error("installation '{installation}' references unknown addon '{addon}'")]
  UnknownAddon { addon: String, installation: String },

  #[error("addon '{addon}' has invalid folder '{folder}': must be a single directory name")]
  InvalidFolder { addon: String, folder: String },

  #[error("failed to hash descriptor of '{addon}': {source}")]
  Descriptor {
    addon: String,
    #[source]
    source: serde_json::Error,
  },

  #[error(transparent)]
  Generation(#[from] GenerationError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Failures that abort apply or rollback outright.
#[derive(Debug, Error)]
pub enum ApplyError {
  #[error("failed to create generation: {0}")]
  CreateGeneration(#[source] GenerationError),

  #[error("failed to record generation {id}: {source}")]
  RecordGeneration {
    id: u64,
    #[source]
    source: GenerationError,
  },

  #[error("no generation to roll back to")]
  NoRollbackTarget,

  #[error("generation {0} did not finish applying; force the rollback to activate it anyway")]
  IncompleteTarget(u64),

  #[error(transparent)]
  Generation(#[from] GenerationError),
}
