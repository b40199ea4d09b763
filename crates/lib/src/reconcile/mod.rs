//! Reconciling a declarative config with the realized state.
//!
//! [`Reconciler::plan`] is pure: it diffs the desired config against the
//! current generation and reports what would change. [`Reconciler::apply`]
//! fetches missing content, re-links every addon, removes dropped ones and
//! records the outcome as a new generation. The generation only becomes
//! current when every step succeeded.

mod apply;
mod plan;
mod types;

pub use types::{
  ApplyError, ApplyIssue, ApplyOptions, ApplyStage, BuildPlan, CancelFlag, DownloadOperation, InstallPlan,
  LinkTarget, Operation, OperationKind, PlanError, PlannedLink, ReconcileResult,
};

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::DeclarativeConfig;
use crate::fetch::Fetcher;
use crate::generation::GenerationManager;
use crate::store::Store;

use apply::{FinishCounts, occupied_paths, remove_activation};

pub struct Reconciler<F: Fetcher> {
  store: Store,
  generations: GenerationManager,
  fetcher: Arc<F>,
  options: ApplyOptions,
}

impl<F: Fetcher> Reconciler<F> {
  pub fn new(store: Store, generations: GenerationManager, fetcher: F) -> Self {
    Self {
      store,
      generations,
      fetcher: Arc::new(fetcher),
      options: ApplyOptions::default(),
    }
  }

  pub fn with_options(mut self, options: ApplyOptions) -> Self {
    self.options = options;
    self
  }

  pub fn store(&self) -> &Store {
    &self.store
  }

  pub fn generations(&self) -> &GenerationManager {
    &self.generations
  }

  pub fn options(&self) -> &ApplyOptions {
    &self.options
  }

  /// Compute the changes needed to realize `config`. Touches nothing.
  pub fn plan(&self, config: &DeclarativeConfig) -> Result<BuildPlan, PlanError> {
    plan::build_plan(&self.store, &self.generations, config)
  }

  /// Realize `plan` as a new generation.
  ///
  /// Per-addon failures are collected in the result rather than returned;
  /// only failing to create or record the generation is an error.
  pub async fn apply(&self, plan: &BuildPlan) -> Result<ReconcileResult, ApplyError> {
    self.apply_plan(plan).await
  }

  /// Re-activate the links of an earlier generation and make it current.
  ///
  /// `target` defaults to the newest complete generation older than the
  /// current one. An explicit target whose apply failed is refused.
  pub async fn rollback(&self, target: Option<u64>) -> Result<ReconcileResult, ApplyError> {
    self.rollback_to(target, false).await
  }

  /// Like [`Reconciler::rollback`], but activates `target` even if its apply
  /// never completed.
  pub async fn force_rollback(&self, target: u64) -> Result<ReconcileResult, ApplyError> {
    self.rollback_to(Some(target), true).await
  }

  async fn rollback_to(&self, target: Option<u64>, force: bool) -> Result<ReconcileResult, ApplyError> {
    let start = Instant::now();
    let current = self.generations.current()?;

    let target = match target {
      Some(id) => self.generations.get(id)?,
      None => {
        let current_id = current.as_ref().map(|g| g.id).ok_or(ApplyError::NoRollbackTarget)?;
        self
          .generations
          .list()?
          .into_iter()
          .filter(|g| g.id < current_id && g.complete)
          .max_by_key(|g| g.id)
          .ok_or(ApplyError::NoRollbackTarget)?
      }
    };
    let target_id = target.id;
    if !target.complete {
      if !force {
        return Err(ApplyError::IncompleteTarget(target_id));
      }
      warn!(id = target_id, "activating a generation whose apply did not complete");
    }
    info!(from = ?current.as_ref().map(|g| g.id), to = target_id, "rolling back");

    let mut issues = Vec::new();
    let mut installed = 0;
    let mut operations = 0;

    for (installation, state) in &target.installations {
      for (addon_id, addon) in &state.addons {
        if self.options.cancel.is_cancelled() {
          break;
        }
        operations += 1;
        match self.store.link(&addon.hash, &addon.install_path) {
          Ok(()) => installed += 1,
          Err(e) => issues.push(
            ApplyIssue::new(ApplyStage::Link, e.to_string())
              .installation(installation)
              .addon(addon_id)
              .hash(addon.hash.to_string()),
          ),
        }
      }
    }

    if let Some(current) = &current {
      let keep = occupied_paths(target.installations.values());
      for (installation, state) in &current.installations {
        for (addon_id, addon) in &state.addons {
          if target.addon(installation, addon_id).is_some() || keep.contains(&addon.install_path) {
            continue;
          }
          operations += 1;
          if let Err(message) = remove_activation(&addon.install_path) {
            issues.push(
              ApplyIssue::new(ApplyStage::Uninstall, message)
                .installation(installation)
                .addon(addon_id),
            );
          }
        }
      }
    }

    if current.as_ref().is_some_and(|g| g.id == target_id) {
      warn!(id = target_id, "target is already current");
    }

    self.finish_rollback(target_id, issues, start, FinishCounts {
      operations,
      downloaded: 0,
      installed,
    })
  }

  fn finish_rollback(
    &self,
    target_id: u64,
    mut issues: Vec<ApplyIssue>,
    start: Instant,
    counts: FinishCounts,
  ) -> Result<ReconcileResult, ApplyError> {
    if self.options.cancel.is_cancelled() {
      issues.push(ApplyIssue::new(ApplyStage::Cancelled, "rollback was cancelled"));
    }
    if issues.is_empty()
      && let Err(e) = self.generations.set_current(target_id)
    {
      issues.push(ApplyIssue::new(ApplyStage::Commit, e.to_string()));
    }

    let result = ReconcileResult {
      success: issues.is_empty(),
      generation: target_id,
      operations: counts.operations,
      downloaded: counts.downloaded,
      installed: counts.installed,
      errors: issues,
      duration: start.elapsed(),
    };
    info!(generation = target_id, success = result.success, "rollback complete");
    Ok(result)
  }
}
