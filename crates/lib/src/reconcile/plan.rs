//! Diffing a desired config against the current generation.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, info};

use super::types::{
  BuildPlan, DownloadOperation, InstallPlan, LinkTarget, Operation, OperationKind, PlanError, PlannedLink,
};
use crate::config::{AddonDescriptor, DeclarativeConfig};
use crate::generation::{GenerationManager, InstallationState};
use crate::store::Store;
use crate::util::hash::ContentHash;

/// Build the plan turning the current generation into `config`. Read-only.
pub(super) fn build_plan(
  store: &Store,
  generations: &GenerationManager,
  config: &DeclarativeConfig,
) -> Result<BuildPlan, PlanError> {
  let current = generations.current()?;
  let mut planner = Planner {
    store,
    config,
    downloads: Vec::new(),
    queued: HashSet::new(),
  };

  let mut installations = BTreeMap::new();
  for (id, installation) in config.installations.iter().filter(|(_, i)| i.enabled) {
    let prior = current.as_ref().and_then(|g| g.installations.get(id));
    let mut plan = InstallPlan::new(installation.addons_dir());
    let mut desired = BTreeSet::new();

    for addon_id in &installation.addons {
      if !desired.insert(addon_id.as_str()) {
        continue;
      }
      let descriptor = config.addons.get(addon_id).ok_or_else(|| PlanError::UnknownAddon {
        addon: addon_id.clone(),
        installation: id.clone(),
      })?;
      if !descriptor.is_compatible(&installation.kind) {
        return Err(PlanError::IncompatibleAddon {
          addon: addon_id.clone(),
          installation: id.clone(),
          kind: installation.kind.clone(),
        });
      }
      planner.plan_addon(id, addon_id, descriptor, prior, &mut plan)?;
    }

    if let Some(prior) = prior {
      plan_removals(id, prior, |addon| desired.contains(addon), &mut plan);
    }
    installations.insert(id.clone(), plan);
  }

  // Installations recorded as realized but no longer enabled are torn down.
  if let Some(current) = &current {
    for (id, prior) in &current.installations {
      if installations.contains_key(id) {
        continue;
      }
      let mut plan = InstallPlan::new(prior.path.clone());
      plan_removals(id, prior, |_| false, &mut plan);
      installations.insert(id.clone(), plan);
    }
  }

  let downloads = planner.downloads;
  let operations: Vec<Operation> = installations.values().flat_map(|p| p.operations.iter().cloned()).collect();
  let plan = BuildPlan {
    current_generation: current.as_ref().map(|g| g.id),
    config: config.clone(),
    operations,
    downloads,
    installations,
  };

  info!(
    install = plan.count(OperationKind::Install),
    update = plan.count(OperationKind::Update),
    uninstall = plan.count(OperationKind::Uninstall),
    symlink = plan.count(OperationKind::Symlink),
    downloads = plan.downloads.len(),
    "built plan"
  );
  Ok(plan)
}

struct Planner<'a> {
  store: &'a Store,
  config: &'a DeclarativeConfig,
  downloads: Vec<DownloadOperation>,
  queued: HashSet<String>,
}

impl Planner<'_> {
  fn plan_addon(
    &mut self,
    installation: &str,
    addon_id: &str,
    descriptor: &AddonDescriptor,
    prior: Option<&InstallationState>,
    plan: &mut InstallPlan,
  ) -> Result<(), PlanError> {
    let descriptor_hash = descriptor.descriptor_hash().map_err(|source| PlanError::Descriptor {
      addon: addon_id.to_string(),
      source,
    })?;
    let link_name = descriptor
      .checked_link_name(addon_id)
      .ok_or_else(|| PlanError::InvalidFolder {
        addon: addon_id.to_string(),
        folder: descriptor.link_name(addon_id).to_string(),
      })?;
    let refresh = self.config.settings.auto_update && descriptor.expected_hash().is_none();
    let recorded = prior.and_then(|p| p.addons.get(addon_id));

    // A renamed folder or moved installation leaves the old link behind.
    let install_path = plan.path.join(link_name);
    let moved = recorded.is_some_and(|r| r.install_path != install_path);
    if moved && let Some(recorded) = recorded {
      debug!(installation, addon = addon_id, from = %recorded.install_path.display(), "link moved");
      plan.removals.insert(addon_id.to_string(), recorded.install_path.clone());
    }

    let link = |target: LinkTarget| PlannedLink {
      link_name: link_name.to_string(),
      version: descriptor.version.clone(),
      descriptor: descriptor_hash.clone(),
      target,
    };

    if let Some(recorded) = recorded
      && !moved
      && recorded.descriptor == descriptor_hash
      && self.store.exists(&recorded.hash)
      && !refresh
    {
      debug!(installation, addon = addon_id, hash = %recorded.hash, "unchanged");
      plan.operations.push(Operation {
        kind: OperationKind::Symlink,
        installation: installation.to_string(),
        addon: addon_id.to_string(),
        from: Some(recorded.hash.to_string()),
        to: Some(recorded.hash.to_string()),
      });
      plan.links.insert(addon_id.to_string(), link(self.stored(&recorded.hash)));
      return Ok(());
    }

    let known = if refresh {
      None
    } else if let Some(recorded) = recorded.filter(|r| r.descriptor == descriptor_hash && self.store.exists(&r.hash)) {
      Some(recorded.hash.clone())
    } else {
      self.store.resolve_descriptor(&descriptor_hash)
    };
    let (target, to) = match known {
      Some(hash) => (self.stored(&hash), hash.to_string()),
      None => {
        self.queue_download(addon_id, descriptor, &descriptor_hash);
        (
          LinkTarget::Pending {
            descriptor: descriptor_hash.clone(),
          },
          descriptor_hash.clone(),
        )
      }
    };

    let kind = if recorded.is_some() {
      OperationKind::Update
    } else {
      OperationKind::Install
    };
    debug!(installation, addon = addon_id, %kind, to = %to, "planned change");
    plan.operations.push(Operation {
      kind,
      installation: installation.to_string(),
      addon: addon_id.to_string(),
      from: recorded.map(|r| r.hash.to_string()),
      to: Some(to),
    });
    plan.links.insert(addon_id.to_string(), link(target));
    Ok(())
  }

  fn stored(&self, hash: &ContentHash) -> LinkTarget {
    LinkTarget::Stored {
      hash: hash.clone(),
      path: self.store.content_path(hash),
    }
  }

  fn queue_download(&mut self, addon_id: &str, descriptor: &AddonDescriptor, descriptor_hash: &str) {
    if !self.queued.insert(descriptor_hash.to_string()) {
      return;
    }
    let expected = descriptor.expected_hash();
    let store_path = expected
      .as_deref()
      .filter(|h| ContentHash::is_valid(h))
      .map(|h| self.store.content_path(&ContentHash::from(h)));

    self.downloads.push(DownloadOperation {
      addon_id: addon_id.to_string(),
      source: descriptor.source.clone(),
      hash: descriptor_hash.to_string(),
      expected,
      ignore: descriptor.ignore.clone(),
      store_path,
    });
  }
}

fn plan_removals(
  installation: &str,
  prior: &InstallationState,
  keep: impl Fn(&str) -> bool,
  plan: &mut InstallPlan,
) {
  for (addon_id, recorded) in &prior.addons {
    if keep(addon_id.as_str()) {
      continue;
    }
    debug!(installation, addon = %addon_id, "planned removal");
    plan.operations.push(Operation {
      kind: OperationKind::Uninstall,
      installation: installation.to_string(),
      addon: addon_id.clone(),
      from: Some(recorded.hash.to_string()),
      to: None,
    });
    plan.removals.insert(addon_id.clone(), recorded.install_path.clone());
  }
}
