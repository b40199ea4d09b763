mod gc;
mod generations;
mod init;
mod plan;
mod rollback;
mod status;
mod store;
mod switch;

pub use gc::cmd_gc;
pub use generations::{GenerationsCommand, cmd_generations};
pub use init::cmd_init;
pub use plan::cmd_plan;
pub use rollback::cmd_rollback;
pub use status::cmd_status;
pub use store::{StoreCommand, cmd_store};
pub use switch::cmd_switch;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use aggon_lib::config::DeclarativeConfig;
use aggon_lib::fetch::HttpFetcher;
use aggon_lib::generation::GenerationManager;
use aggon_lib::init::state_for;
use aggon_lib::reconcile::{ApplyOptions, CancelFlag, Reconciler};
use aggon_lib::state_lock::{LockMode, StateLock};
use aggon_lib::store::Store;

/// Global arguments shared by every command.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
  pub config: PathBuf,
  pub profile: Option<String>,
  pub verbose: bool,
}

/// The loaded config and the state it points at.
pub struct Workspace {
  pub config: DeclarativeConfig,
  pub store: Store,
  pub generations: GenerationManager,
}

impl Workspace {
  /// Load the config (with the selected profile applied).
  pub fn load(args: &GlobalArgs) -> Result<Self> {
    let path = resolve_config_path(&args.config);
    let config = DeclarativeConfig::load(&path).with_context(|| format!("Failed to load config {}", path.display()))?;
    let config = match &args.profile {
      Some(profile) => config
        .with_profile(profile)
        .with_context(|| format!("Failed to apply profile '{}'", profile))?,
      None => config,
    };
    Ok(Self::from_config(config, &path))
  }

  /// Like [`Workspace::load`], but falls back to default settings when the
  /// config file does not exist. For read-only and maintenance commands.
  pub fn load_or_default(args: &GlobalArgs) -> Result<Self> {
    let path = resolve_config_path(&args.config);
    if path.exists() {
      return Self::load(args);
    }
    debug!(path = %path.display(), "config not found, using default locations");
    Ok(Self::from_config(DeclarativeConfig::default(), &path))
  }

  fn from_config(config: DeclarativeConfig, path: &Path) -> Self {
    let (store, generations) = state_for(&config, path);
    Self {
      config,
      store,
      generations,
    }
  }

  /// Take the exclusive state lock for a mutating command.
  pub fn lock(&self, command: &str) -> Result<StateLock> {
    StateLock::acquire(self.generations.base_path(), LockMode::Exclusive, command)
      .context("Failed to acquire state lock")
  }

  pub fn reconciler(&self, cancel: CancelFlag) -> Reconciler<HttpFetcher> {
    let options = ApplyOptions {
      parallelism: self.config.settings.parallel_downloads.max(1),
      cancel,
    };
    Reconciler::new(self.store.clone(), self.generations.clone(), HttpFetcher::new()).with_options(options)
  }
}

fn resolve_config_path(path: &Path) -> PathBuf {
  dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Build a runtime and cancel `cancel` on Ctrl-C while `future` runs.
pub fn block_on_cancellable<T>(cancel: &CancelFlag, future: impl Future<Output = T>) -> Result<T> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let flag = cancel.clone();
  Ok(rt.block_on(async move {
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        flag.cancel();
      }
    });
    future.await
  }))
}
