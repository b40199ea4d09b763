//! Realizing a plan: downloads, links, uninstalls, then promotion.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::Reconciler;
use super::types::{
  ApplyError, ApplyIssue, ApplyStage, BuildPlan, CancelFlag, DownloadOperation, LinkTarget, OperationKind,
  ReconcileResult,
};
use crate::fetch::Fetcher;
use crate::generation::{InstallationState, InstalledAddon};
use crate::store::{AddHint, Store};
use crate::util::fs::{is_link, remove_link, unix_now};
use crate::util::hash::ContentHash;

type DownloadOutcome = (String, Result<ContentHash, ApplyIssue>);

impl<F: Fetcher> Reconciler<F> {
  pub(super) async fn apply_plan(&self, plan: &BuildPlan) -> Result<ReconcileResult, ApplyError> {
    let start = Instant::now();
    let description = format!(
      "install {}, update {}, uninstall {}",
      plan.count(OperationKind::Install),
      plan.count(OperationKind::Update),
      plan.count(OperationKind::Uninstall)
    );
    let mut generation = self
      .generations
      .create(&plan.config, &description)
      .map_err(ApplyError::CreateGeneration)?;
    info!(generation = generation.id, operations = plan.operations.len(), "applying plan");

    let mut issues = Vec::new();
    let verify = plan.config.settings.verify_hashes;

    let mut resolved = HashMap::new();
    for (descriptor, outcome) in self.run_downloads(&plan.downloads, verify).await {
      match outcome {
        Ok(hash) => {
          resolved.insert(descriptor, hash);
        }
        Err(issue) => {
          warn!(descriptor = %descriptor, error = %issue.message, "download failed");
          issues.push(issue);
        }
      }
    }
    let downloaded = resolved.len();

    let mut installed = 0;
    let mut installations = BTreeMap::new();
    for (id, install) in &plan.installations {
      let enabled = plan.config.installations.get(id).is_some_and(|i| i.enabled);
      let mut state = InstallationState {
        path: install.path.clone(),
        addons: BTreeMap::new(),
      };
      let mut linked_paths = HashSet::new();

      for (addon_id, link) in &install.links {
        if self.options.cancel.is_cancelled() {
          break;
        }
        let hash = match &link.target {
          LinkTarget::Stored { hash, .. } => hash.clone(),
          LinkTarget::Pending { descriptor } => match resolved.get(descriptor) {
            Some(hash) => hash.clone(),
            None => {
              issues.push(
                ApplyIssue::new(ApplyStage::Link, "content was not downloaded")
                  .installation(id)
                  .addon(addon_id)
                  .hash(descriptor.clone()),
              );
              continue;
            }
          },
        };

        let install_path = install.path.join(&link.link_name);
        if let Err(e) = self.store.link(&hash, &install_path) {
          error!(installation = %id, addon = %addon_id, error = %e, "link failed");
          issues.push(
            ApplyIssue::new(ApplyStage::Link, e.to_string())
              .installation(id)
              .addon(addon_id)
              .hash(hash.to_string()),
          );
          continue;
        }

        installed += 1;
        linked_paths.insert(install_path.clone());
        state.addons.insert(
          addon_id.clone(),
          InstalledAddon {
            id: addon_id.clone(),
            version: link.version.clone(),
            store_path: self.store.content_path(&hash),
            hash,
            descriptor: link.descriptor.clone(),
            install_path,
            installed_at: unix_now(),
          },
        );
      }

      for (addon_id, path) in &install.removals {
        if self.options.cancel.is_cancelled() {
          break;
        }
        if linked_paths.contains(path) {
          debug!(installation = %id, addon = %addon_id, "removal path reused by another addon");
          continue;
        }
        if let Err(message) = remove_activation(path) {
          issues.push(
            ApplyIssue::new(ApplyStage::Uninstall, message)
              .installation(id)
              .addon(addon_id),
          );
        }
      }

      if enabled {
        installations.insert(id.clone(), state);
      }
    }

    self.finish(&mut generation, installations, issues, start, FinishCounts {
      operations: plan.operations.len(),
      downloaded,
      installed,
    })
  }

  /// Fetch and ingest every download, at most `parallelism` at a time.
  async fn run_downloads(&self, downloads: &[DownloadOperation], verify: bool) -> Vec<DownloadOutcome> {
    if downloads.is_empty() {
      return Vec::new();
    }
    let semaphore = Arc::new(Semaphore::new(self.options.parallelism.max(1)));
    let mut join_set = JoinSet::new();

    for download in downloads {
      let download = download.clone();
      let semaphore = semaphore.clone();
      let fetcher = self.fetcher.clone();
      let store = self.store.clone();
      let cancel = self.options.cancel.clone();

      join_set.spawn(async move {
        let descriptor = download.hash.clone();
        let outcome = fetch_into_store(fetcher, store, download, semaphore, cancel, verify).await;
        (descriptor, outcome)
      });
    }

    let mut outcomes = Vec::with_capacity(downloads.len());
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok(outcome) => outcomes.push(outcome),
        Err(e) => error!(error = %e, "download task panicked"),
      }
    }
    outcomes
  }
}

async fn fetch_into_store<F: Fetcher>(
  fetcher: Arc<F>,
  store: Store,
  download: DownloadOperation,
  semaphore: Arc<Semaphore>,
  cancel: CancelFlag,
  verify: bool,
) -> Result<ContentHash, ApplyIssue> {
  let issue = |stage: ApplyStage, message: String| {
    ApplyIssue::new(stage, message)
      .addon(&download.addon_id)
      .hash(download.hash.clone())
  };

  let Ok(_permit) = semaphore.acquire().await else {
    return Err(issue(ApplyStage::Download, "download queue closed".to_string()));
  };
  if cancel.is_cancelled() {
    return Err(issue(ApplyStage::Cancelled, "cancelled before download".to_string()));
  }

  debug!(addon = %download.addon_id, descriptor = %download.hash, "fetching");
  let artifact = fetcher
    .fetch(&download.source)
    .await
    .map_err(|e| issue(ApplyStage::Download, e.to_string()))?;

  let addon_id = download.addon_id.clone();
  let descriptor = download.hash.clone();
  tokio::task::spawn_blocking(move || ingest(&store, artifact, &download, verify))
    .await
    .unwrap_or_else(|e| {
      Err(
        ApplyIssue::new(ApplyStage::Download, format!("ingest task failed: {}", e))
          .addon(&addon_id)
          .hash(descriptor),
      )
    })
}

/// Store fetched bytes, verify them, unpack archives and index the descriptor.
fn ingest(
  store: &Store,
  artifact: crate::fetch::FetchedArtifact,
  download: &DownloadOperation,
  verify: bool,
) -> Result<ContentHash, ApplyIssue> {
  let issue = |message: String| {
    ApplyIssue::new(ApplyStage::Download, message)
      .addon(&download.addon_id)
      .hash(download.hash.clone())
  };

  let hint = AddHint::new(artifact.url, download.source.reference.clone());
  let blob = store.add(artifact.reader, &hint).map_err(|e| issue(e.to_string()))?;

  if verify
    && let Some(expected) = &download.expected
    && blob.as_str() != expected
  {
    return Err(issue(format!("hash mismatch: expected {}, got {}", expected, blob)));
  }

  let content = if store.is_archive(&blob).map_err(|e| issue(e.to_string()))? {
    store
      .add_tree(&blob, &download.ignore, &hint)
      .map_err(|e| issue(e.to_string()))?
  } else {
    blob
  };

  store
    .record_descriptor(&download.hash, &content)
    .map_err(|e| issue(e.to_string()))?;
  info!(addon = %download.addon_id, hash = %content, "stored addon");
  Ok(content)
}

/// Remove an activation link. Anything that is not a link is left in place.
pub(super) fn remove_activation(path: &Path) -> Result<(), String> {
  match fs::symlink_metadata(path) {
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      debug!(path = %path.display(), "already removed");
      Ok(())
    }
    Err(e) => Err(format!("cannot inspect {}: {}", path.display(), e)),
    Ok(_) if !is_link(path) => Err(format!("{} is not a symlink; left in place", path.display())),
    Ok(_) => {
      remove_link(path).map_err(|e| format!("failed to remove {}: {}", path.display(), e))?;
      debug!(path = %path.display(), "removed activation link");
      Ok(())
    }
  }
}

pub(super) struct FinishCounts {
  pub operations: usize,
  pub downloaded: usize,
  pub installed: usize,
}

impl<F: Fetcher> Reconciler<F> {
  /// Record what was realized and promote when nothing failed.
  pub(super) fn finish(
    &self,
    generation: &mut crate::generation::Generation,
    installations: BTreeMap<String, InstallationState>,
    mut issues: Vec<ApplyIssue>,
    start: Instant,
    counts: FinishCounts,
  ) -> Result<ReconcileResult, ApplyError> {
    if self.options.cancel.is_cancelled() {
      issues.push(ApplyIssue::new(ApplyStage::Cancelled, "apply was cancelled"));
    }

    generation.complete = issues.is_empty();
    self
      .generations
      .record_installations(generation, installations)
      .map_err(|source| ApplyError::RecordGeneration {
        id: generation.id,
        source,
      })?;

    if issues.is_empty() {
      if let Err(e) = self.generations.set_current(generation.id) {
        issues.push(ApplyIssue::new(ApplyStage::Commit, e.to_string()));
      }
    } else {
      warn!(generation = generation.id, issues = issues.len(), "not promoting generation");
    }

    let result = ReconcileResult {
      success: issues.is_empty(),
      generation: generation.id,
      operations: counts.operations,
      downloaded: counts.downloaded,
      installed: counts.installed,
      errors: issues,
      duration: start.elapsed(),
    };
    info!(
      generation = result.generation,
      success = result.success,
      downloaded = result.downloaded,
      installed = result.installed,
      "apply complete"
    );
    Ok(result)
  }
}

/// Install paths a generation's links occupy.
pub(super) fn occupied_paths<'a>(states: impl Iterator<Item = &'a InstallationState>) -> HashSet<PathBuf> {
  states
    .flat_map(|s| s.addons.values())
    .map(|a| a.install_path.clone())
    .collect()
}
