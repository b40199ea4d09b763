//! Declarative configuration: loading, saving and profile resolution.

mod types;

pub use types::{
  AddonDescriptor, AddonOverride, AddonSource, ConfigMetadata, DeclarativeConfig, InstallationDescriptor, Profile,
  Settings, SourceType,
};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::util::fs::write_json_atomic;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse config '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to write config '{path}': {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("config already exists: {0}")]
  Exists(PathBuf),

  #[error("unknown profile: {0}")]
  UnknownProfile(String),

  #[error("profile '{profile}' references unknown installation '{installation}'")]
  UnknownInstallation { profile: String, installation: String },

  #[error("profile '{profile}' overrides unknown addon '{addon}'")]
  UnknownAddon { profile: String, addon: String },
}

impl DeclarativeConfig {
  /// Load a config file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let config: DeclarativeConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(
      path = %path.display(),
      installations = config.installations.len(),
      addons = config.addons.len(),
      "loaded config"
    );
    Ok(config)
  }

  /// Write the config as pretty JSON, replacing any existing file atomically.
  pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
    write_json_atomic(path, self).map_err(|source| ConfigError::Write {
      path: path.to_path_buf(),
      source,
    })
  }

  /// The starting config written by `init`.
  pub fn starter() -> Self {
    let mut config = DeclarativeConfig::default();
    config.metadata = ConfigMetadata {
      name: "my-wow-setup".to_string(),
      version: "1.0.0".to_string(),
      description: "Declarative WoW addon configuration".to_string(),
    };
    config
  }

  /// Resolve a profile into a plain config.
  ///
  /// A non-empty installation list disables every other installation. Overrides
  /// replace an addon's ref or version; `enabled: false` drops the addon from
  /// every installation.
  pub fn with_profile(&self, name: &str) -> Result<DeclarativeConfig, ConfigError> {
    let profile = self
      .profiles
      .get(name)
      .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))?;

    let mut resolved = self.clone();

    if !profile.installations.is_empty() {
      for id in &profile.installations {
        if !resolved.installations.contains_key(id) {
          return Err(ConfigError::UnknownInstallation {
            profile: name.to_string(),
            installation: id.clone(),
          });
        }
      }
      for (id, installation) in resolved.installations.iter_mut() {
        installation.enabled = installation.enabled && profile.installations.contains(id);
      }
    }

    for (addon_id, over) in &profile.addons {
      let addon = resolved
        .addons
        .get_mut(addon_id)
        .ok_or_else(|| ConfigError::UnknownAddon {
          profile: name.to_string(),
          addon: addon_id.clone(),
        })?;

      if let Some(reference) = &over.reference {
        addon.source.reference = reference.clone();
      }
      if let Some(version) = &over.version {
        addon.version = version.clone();
      }
      if over.enabled == Some(false) {
        for installation in resolved.installations.values_mut() {
          installation.addons.retain(|a| a != addon_id);
        }
      }
    }

    debug!(profile = name, "resolved profile");
    Ok(resolved)
  }
}

/// Write the starter config to `path`, refusing to overwrite.
pub fn write_default_config(path: &Path) -> Result<DeclarativeConfig, ConfigError> {
  if path.exists() {
    return Err(ConfigError::Exists(path.to_path_buf()));
  }
  let config = DeclarativeConfig::starter();
  config.save(path)?;
  Ok(config)
}
