use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::consts::CONFIG_SCHEMA;
use crate::platform::paths::{expand_tilde, generations_root, store_root};
use crate::util::hash::short_hash;

/// The complete desired state.
///
/// All maps are ordered so the JSON form is canonical; generation state hashes
/// are computed over it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclarativeConfig {
  #[serde(default = "default_schema")]
  pub schema: String,
  #[serde(default)]
  pub metadata: ConfigMetadata,
  #[serde(default)]
  pub installations: BTreeMap<String, InstallationDescriptor>,
  #[serde(default)]
  pub addons: BTreeMap<String, AddonDescriptor>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub profiles: BTreeMap<String, Profile>,
  #[serde(default)]
  pub settings: Settings,
}

impl Default for DeclarativeConfig {
  fn default() -> Self {
    Self {
      schema: default_schema(),
      metadata: ConfigMetadata::default(),
      installations: BTreeMap::new(),
      addons: BTreeMap::new(),
      profiles: BTreeMap::new(),
      settings: Settings::default(),
    }
  }
}

fn default_schema() -> String {
  CONFIG_SCHEMA.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMetadata {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub version: String,
  #[serde(default)]
  pub description: String,
}

/// A game `AddOns` directory of one flavour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationDescriptor {
  /// Flavour tag such as `retail` or `classic`, matched against addon compatibility.
  #[serde(rename = "type")]
  pub kind: String,
  pub path: String,
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default)]
  pub addons: Vec<String>,
}

impl InstallationDescriptor {
  /// The `AddOns` directory with `~` expanded.
  pub fn addons_dir(&self) -> PathBuf {
    expand_tilde(&self.path)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
  #[serde(alias = "repository")]
  Github,
  Url,
  Local,
}

impl std::fmt::Display for SourceType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      SourceType::Github => write!(f, "github"),
      SourceType::Url => write!(f, "url"),
      SourceType::Local => write!(f, "local"),
    }
  }
}

/// Where an addon's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonSource {
  #[serde(rename = "type")]
  pub kind: SourceType,
  pub url: String,
  /// Tag, branch, commit or `latest`. Empty means the default branch.
  #[serde(rename = "ref", default)]
  pub reference: String,
  /// Case-insensitive substring selecting a release asset.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub asset: Option<String>,
}

/// Desired addon as written in the config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonDescriptor {
  pub source: AddonSource,
  #[serde(default)]
  pub version: String,
  /// Expected SHA-256 of the fetched bytes.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub hash: Option<String>,
  #[serde(default)]
  pub ignore: Vec<String>,
  #[serde(default)]
  pub compatible: Vec<String>,
  /// Name of the activation link; defaults to the addon id.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub folder: Option<String>,
}

#[derive(Serialize)]
struct NormalizedDescriptor<'a> {
  kind: SourceType,
  url: &'a str,
  reference: &'a str,
  asset: Option<String>,
  ignore: Vec<&'a str>,
}

impl AddonDescriptor {
  /// Short hash of the normalized source descriptor.
  ///
  /// Used for change detection only. Equal descriptors may still yield
  /// different bytes over time (moving refs).
  pub fn descriptor_hash(&self) -> Result<String, serde_json::Error> {
    let mut ignore: Vec<&str> = self.ignore.iter().map(String::as_str).collect();
    ignore.sort_unstable();
    ignore.dedup();

    short_hash(&NormalizedDescriptor {
      kind: self.source.kind,
      url: self.source.url.trim().trim_end_matches('/'),
      reference: self.source.reference.trim(),
      asset: self.source.asset.as_deref().map(|a| a.trim().to_ascii_lowercase()),
      ignore,
    })
  }

  pub fn is_compatible(&self, kind: &str) -> bool {
    self.compatible.iter().any(|c| c == kind)
  }

  pub fn link_name<'a>(&'a self, id: &'a str) -> &'a str {
    match self.folder.as_deref() {
      Some(folder) if !folder.is_empty() => folder,
      _ => id,
    }
  }

  /// Resolved link name, or `None` when it would not be a single entry
  /// directly inside the AddOns directory.
  pub fn checked_link_name<'a>(&'a self, id: &'a str) -> Option<&'a str> {
    let name = self.link_name(id);
    is_plain_component(name).then_some(name)
  }

  /// Expected content hash, normalized to lowercase.
  pub fn expected_hash(&self) -> Option<String> {
    self
      .hash
      .as_deref()
      .map(str::trim)
      .filter(|h| !h.is_empty())
      .map(str::to_ascii_lowercase)
  }
}

fn is_plain_component(name: &str) -> bool {
  if name.contains(['/', '\\']) {
    return false;
  }
  let mut components = Path::new(name).components();
  matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none()
}

/// A named variant restricting installations and overriding addons.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
  #[serde(default)]
  pub installations: Vec<String>,
  #[serde(default)]
  pub addons: BTreeMap<String, AddonOverride>,
  #[serde(default)]
  pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonOverride {
  #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
  pub reference: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
  /// Re-fetch addons without a pinned hash on every switch.
  #[serde(default)]
  pub auto_update: bool,
  /// Generations kept (besides the current one) by garbage collection.
  #[serde(default = "default_backup_generations")]
  pub backup_generations: usize,
  #[serde(default = "default_parallel_downloads")]
  pub parallel_downloads: usize,
  #[serde(default = "default_true")]
  pub verify_hashes: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub store_path: Option<PathBuf>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub generations_path: Option<PathBuf>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      auto_update: false,
      backup_generations: default_backup_generations(),
      parallel_downloads: default_parallel_downloads(),
      verify_hashes: true,
      store_path: None,
      generations_path: None,
    }
  }
}

impl Settings {
  /// Store base directory; relative paths resolve against `config_dir`.
  pub fn store_dir(&self, config_dir: &Path) -> PathBuf {
    resolve_setting_path(self.store_path.as_deref(), config_dir).unwrap_or_else(store_root)
  }

  /// Generations base directory; relative paths resolve against `config_dir`.
  pub fn generations_dir(&self, config_dir: &Path) -> PathBuf {
    resolve_setting_path(self.generations_path.as_deref(), config_dir).unwrap_or_else(generations_root)
  }
}

fn resolve_setting_path(path: Option<&Path>, config_dir: &Path) -> Option<PathBuf> {
  let path = expand_tilde(&path?.to_string_lossy());
  if path.as_os_str().is_empty() {
    None
  } else if path.is_relative() {
    Some(config_dir.join(path))
  } else {
    Some(path)
  }
}

fn default_true() -> bool {
  true
}

fn default_backup_generations() -> usize {
  10
}

fn default_parallel_downloads() -> usize {
  3
}
