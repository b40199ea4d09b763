//! Initialize on-disk state and write a starter configuration.
//!
//! This backs the `aggon init` command: it writes `aggon-declarative.json`
//! (refusing to overwrite) and creates the store and generation layouts the
//! settings point at.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, DeclarativeConfig};
use crate::generation::{GenerationError, GenerationManager};
use crate::store::{Store, StoreError};

pub use crate::config::write_default_config;

#[derive(Debug, Error)]
pub enum InitError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Generation(#[from] GenerationError),
}

/// Result of a successful `init_config`.
#[derive(Debug)]
pub struct InitResult {
  pub config_path: PathBuf,
  pub store_dir: PathBuf,
  pub generations_dir: PathBuf,
}

/// Create the store and generation layouts. Idempotent.
pub fn initialize(store: &Store, generations: &GenerationManager) -> Result<(), InitError> {
  store.initialize()?;
  generations.initialize()?;
  info!(
    store = %store.base_path().display(),
    generations = %generations.dir().display(),
    "initialized state directories"
  );
  Ok(())
}

/// Write the starter config at `config_path` and initialize the directories
/// its settings resolve to.
pub fn init_config(config_path: &Path) -> Result<InitResult, InitError> {
  let config = write_default_config(config_path)?;
  let (store, generations) = state_for(&config, config_path);
  initialize(&store, &generations)?;

  Ok(InitResult {
    config_path: config_path.to_path_buf(),
    store_dir: store.base_path().to_path_buf(),
    generations_dir: generations.dir(),
  })
}

/// Store and generation manager for `config` loaded from `config_path`.
pub fn state_for(config: &DeclarativeConfig, config_path: &Path) -> (Store, GenerationManager) {
  let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
  (
    Store::new(config.settings.store_dir(config_dir)),
    GenerationManager::new(config.settings.generations_dir(config_dir)),
  )
}
