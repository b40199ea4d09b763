//! Planning and applying configs end to end.

use std::fs;

use aggon_lib::reconcile::{ApplyOptions, ApplyStage, CancelFlag, OperationKind};
use aggon_lib::util::fs::{is_link, remove_link};
use aggon_lib::util::hash::hash_bytes;

use super::common::{TestEnv, addon, addon_archive, installation};

#[tokio::test]
async fn fresh_install_links_every_addon() {
  let env = TestEnv::new();
  let details = env.serve_addon("Details", "1.0");
  let bagnon = env.serve_addon("Bagnon", "2.0");
  let config = env.config(&[("details", details.as_str()), ("bagnon", bagnon.as_str())], &["details", "bagnon"]);
  let reconciler = env.reconciler();

  let plan = reconciler.plan(&config).unwrap();
  assert_eq!(plan.count(OperationKind::Install), 2);
  assert_eq!(plan.downloads.len(), 2);

  let result = reconciler.apply(&plan).await.unwrap();

  assert!(result.success, "errors: {:?}", result.errors);
  assert_eq!(result.generation, 1);
  assert_eq!(result.downloaded, 2);
  assert_eq!(result.installed, 2);
  assert_eq!(env.generations.current_id().unwrap(), Some(1));

  let link = env.retail.join("details");
  assert!(is_link(&link));
  assert_eq!(
    fs::read_to_string(link.join("Details.toc")).unwrap(),
    "## Version: 1.0"
  );
  assert!(!link.join(".pkgmeta").exists());

  let current = env.generations.get_current().unwrap();
  let recorded = current.addon("retail", "details").unwrap();
  assert_eq!(recorded.install_path, link);
  assert!(env.store.exists(&recorded.hash));
}

#[tokio::test]
async fn unchanged_config_only_relinks() {
  let env = TestEnv::new();
  let details = env.serve_addon("Details", "1.0");
  let config = env.config(&[("details", details.as_str())], &["details"]);
  let reconciler = env.reconciler();

  let first = reconciler.apply(&reconciler.plan(&config).unwrap()).await.unwrap();
  assert!(first.success);
  let calls = env.fetcher.calls();

  let plan = reconciler.plan(&config).unwrap();
  assert!(plan.is_noop());
  assert_eq!(plan.count(OperationKind::Symlink), 1);

  let second = reconciler.apply(&plan).await.unwrap();

  assert!(second.success);
  assert_eq!(second.downloaded, 0);
  assert_eq!(second.generation, 2);
  assert_eq!(env.fetcher.calls(), calls);
  let before = env.generations.get(1).unwrap();
  let after = env.generations.get(2).unwrap();
  assert_eq!(
    before.addon("retail", "details").unwrap().hash,
    after.addon("retail", "details").unwrap().hash
  );
  assert_eq!(env.generations.current_id().unwrap(), Some(2));
}

#[tokio::test]
async fn removed_addon_is_uninstalled() {
  let env = TestEnv::new();
  let urls: Vec<String> = ["A", "B", "C"].iter().map(|n| env.serve_addon(n, "1")).collect();
  let addons = [("a", urls[0].as_str()), ("b", urls[1].as_str()), ("c", urls[2].as_str())];
  let reconciler = env.reconciler();

  let full = env.config(&addons, &["a", "b", "c"]);
  assert!(reconciler.apply(&reconciler.plan(&full).unwrap()).await.unwrap().success);
  assert!(is_link(&env.retail.join("c")));

  let reduced = env.config(&addons, &["a", "b"]);
  let plan = reconciler.plan(&reduced).unwrap();
  assert_eq!(plan.count(OperationKind::Uninstall), 1);
  assert_eq!(plan.count(OperationKind::Symlink), 2);
  assert!(plan.downloads.is_empty());

  let result = reconciler.apply(&plan).await.unwrap();

  assert!(result.success);
  assert!(fs::symlink_metadata(env.retail.join("c")).is_err());
  assert!(is_link(&env.retail.join("a")));
  let current = env.generations.get_current().unwrap();
  assert_eq!(current.id, 2);
  assert!(current.addon("retail", "c").is_none());
  assert_eq!(current.addon_count(), 2);
}

#[tokio::test]
async fn failed_download_keeps_previous_generation_current() {
  let env = TestEnv::new();
  let details = env.serve_addon("Details", "1.0");
  let reconciler = env.reconciler();

  let good = env.config(&[("details", details.as_str())], &["details"]);
  assert!(reconciler.apply(&reconciler.plan(&good).unwrap()).await.unwrap().success);

  let bagnon = env.serve_addon("Bagnon", "1.0");
  let broken = env.config(
    &[
      ("details", details.as_str()),
      ("bagnon", bagnon.as_str()),
      ("missing", "https://example.invalid/missing.zip"),
    ],
    &["details", "bagnon", "missing"],
  );
  let result = reconciler.apply(&reconciler.plan(&broken).unwrap()).await.unwrap();

  assert!(!result.success);
  assert_eq!(result.generation, 2);
  assert!(
    result
      .errors
      .iter()
      .any(|e| e.stage == ApplyStage::Download && e.addon.as_deref() == Some("missing"))
  );
  assert_eq!(env.generations.current_id().unwrap(), Some(1));
  assert!(env.generations.get(2).is_ok());

  // Completed downloads stay usable.
  let bagnon_blob = hash_bytes(&addon_archive("Bagnon", "1.0"));
  assert!(env.store.exists(&bagnon_blob));
}

#[tokio::test]
async fn expected_hash_mismatch_is_reported() {
  let env = TestEnv::new();
  let details = env.serve_addon("Details", "1.0");
  let mut config = env.config(&[("details", details.as_str())], &["details"]);
  config.addons.get_mut("details").unwrap().hash = Some("0".repeat(64));
  let reconciler = env.reconciler();

  let result = reconciler.apply(&reconciler.plan(&config).unwrap()).await.unwrap();

  assert!(!result.success);
  assert!(result.errors[0].message.contains("hash mismatch"));
  assert_eq!(env.generations.current_id().unwrap(), None);
}

#[tokio::test]
async fn expected_hash_is_skipped_when_verification_is_off() {
  let env = TestEnv::new();
  let details = env.serve_addon("Details", "1.0");
  let mut config = env.config(&[("details", details.as_str())], &["details"]);
  config.addons.get_mut("details").unwrap().hash = Some("0".repeat(64));
  config.settings.verify_hashes = false;
  let reconciler = env.reconciler();

  let result = reconciler.apply(&reconciler.plan(&config).unwrap()).await.unwrap();
  assert!(result.success, "errors: {:?}", result.errors);
}

#[tokio::test]
async fn identical_bytes_from_two_sources_share_content() {
  let env = TestEnv::new();
  let bytes = addon_archive("Shared", "1.0");
  env.fetcher.serve("https://mirror-one.invalid/shared.zip", bytes.clone());
  env.fetcher.serve("https://mirror-two.invalid/shared.zip", bytes);
  let config = env.config(
    &[
      ("one", "https://mirror-one.invalid/shared.zip"),
      ("two", "https://mirror-two.invalid/shared.zip"),
    ],
    &["one", "two"],
  );
  let reconciler = env.reconciler();

  let result = reconciler.apply(&reconciler.plan(&config).unwrap()).await.unwrap();
  assert!(result.success);

  let current = env.generations.get_current().unwrap();
  assert_eq!(
    current.addon("retail", "one").unwrap().hash,
    current.addon("retail", "two").unwrap().hash
  );
  // One blob and one unpacked tree.
  assert_eq!(env.store.list_entries().count(), 2);
}

#[tokio::test]
async fn ignore_patterns_drop_files_when_unpacking() {
  let env = TestEnv::new();
  let details = env.serve_addon("Details", "1.0");
  let mut config = env.config(&[("details", details.as_str())], &["details"]);
  config.addons.get_mut("details").unwrap().ignore = vec!["README.md".to_string()];
  let reconciler = env.reconciler();

  assert!(reconciler.apply(&reconciler.plan(&config).unwrap()).await.unwrap().success);

  let link = env.retail.join("details");
  assert!(link.join("Details.lua").exists());
  assert!(!link.join("README.md").exists());
}

#[tokio::test]
async fn folder_names_the_link() {
  let env = TestEnv::new();
  let details = env.serve_addon("Details", "1.0");
  let mut config = env.config(&[("details", details.as_str())], &["details"]);
  config.addons.get_mut("details").unwrap().folder = Some("Details_Core".to_string());
  let reconciler = env.reconciler();

  assert!(reconciler.apply(&reconciler.plan(&config).unwrap()).await.unwrap().success);
  assert!(is_link(&env.retail.join("Details_Core")));
  assert!(!env.retail.join("details").exists());
}

#[tokio::test]
async fn renaming_folder_moves_the_link() {
  let env = TestEnv::new();
  let details = env.serve_addon("Details", "1.0");
  let mut config = env.config(&[("details", details.as_str())], &["details"]);
  let reconciler = env.reconciler();
  assert!(reconciler.apply(&reconciler.plan(&config).unwrap()).await.unwrap().success);
  let calls = env.fetcher.calls();

  config.addons.get_mut("details").unwrap().folder = Some("Details_Core".to_string());
  let plan = reconciler.plan(&config).unwrap();
  assert_eq!(plan.count(OperationKind::Update), 1);
  assert_eq!(plan.count(OperationKind::Symlink), 0);

  let result = reconciler.apply(&plan).await.unwrap();

  assert!(result.success, "errors: {:?}", result.errors);
  assert_eq!(env.fetcher.calls(), calls);
  assert!(is_link(&env.retail.join("Details_Core")));
  assert!(fs::symlink_metadata(env.retail.join("details")).is_err());
  let current = env.generations.get_current().unwrap();
  assert_eq!(
    current.addon("retail", "details").unwrap().install_path,
    env.retail.join("Details_Core")
  );

  // Renaming back is a move too, not a no-op.
  config.addons.get_mut("details").unwrap().folder = None;
  assert!(reconciler.apply(&reconciler.plan(&config).unwrap()).await.unwrap().success);
  assert!(is_link(&env.retail.join("details")));
  assert!(fs::symlink_metadata(env.retail.join("Details_Core")).is_err());
}

#[tokio::test]
async fn moving_installation_path_removes_old_links() {
  let env = TestEnv::new();
  let details = env.serve_addon("Details", "1.0");
  let mut config = env.config(&[("details", details.as_str())], &["details"]);
  let reconciler = env.reconciler();
  assert!(reconciler.apply(&reconciler.plan(&config).unwrap()).await.unwrap().success);

  let moved = env.retail.parent().unwrap().join("AddOns-moved");
  config
    .installations
    .insert("retail".to_string(), installation("retail", &moved, &["details"]));
  let result = reconciler.apply(&reconciler.plan(&config).unwrap()).await.unwrap();

  assert!(result.success, "errors: {:?}", result.errors);
  assert!(is_link(&moved.join("details")));
  assert!(fs::symlink_metadata(env.retail.join("details")).is_err());
  assert_eq!(env.generations.get_current().unwrap().installations["retail"].path, moved);
}

#[tokio::test]
async fn link_failure_keeps_previous_generation_current() {
  let env = TestEnv::new();
  let details = env.serve_addon("Details", "1.0");
  let bagnon = env.serve_addon("Bagnon", "1.0");
  let addons = [("details", details.as_str()), ("bagnon", bagnon.as_str())];
  let reconciler = env.reconciler();
  assert!(
    reconciler
      .apply(&reconciler.plan(&env.config(&addons, &["details"])).unwrap())
      .await
      .unwrap()
      .success
  );

  // A hand-installed copy occupies the link path.
  let occupied = env.retail.join("bagnon");
  fs::create_dir_all(&occupied).unwrap();
  fs::write(occupied.join("Bagnon.toc"), "## Version: local").unwrap();

  let config = env.config(&addons, &["details", "bagnon"]);
  let result = reconciler.apply(&reconciler.plan(&config).unwrap()).await.unwrap();

  assert!(!result.success);
  assert_eq!(result.generation, 2);
  assert!(
    result
      .errors
      .iter()
      .any(|e| e.stage == ApplyStage::Link && e.addon.as_deref() == Some("bagnon"))
  );
  assert_eq!(env.generations.current_id().unwrap(), Some(1));
  assert!(!env.generations.get(2).unwrap().complete);
  assert_eq!(
    fs::read_to_string(occupied.join("Bagnon.toc")).unwrap(),
    "## Version: local"
  );
}

#[tokio::test]
async fn uninstall_failure_keeps_previous_generation_current() {
  let env = TestEnv::new();
  let details = env.serve_addon("Details", "1.0");
  let bagnon = env.serve_addon("Bagnon", "1.0");
  let addons = [("details", details.as_str()), ("bagnon", bagnon.as_str())];
  let reconciler = env.reconciler();
  assert!(
    reconciler
      .apply(&reconciler.plan(&env.config(&addons, &["details", "bagnon"])).unwrap())
      .await
      .unwrap()
      .success
  );

  // The activation link was replaced by a real directory.
  let replaced = env.retail.join("bagnon");
  remove_link(&replaced).unwrap();
  fs::create_dir(&replaced).unwrap();

  let config = env.config(&addons, &["details"]);
  let result = reconciler.apply(&reconciler.plan(&config).unwrap()).await.unwrap();

  assert!(!result.success);
  assert!(
    result
      .errors
      .iter()
      .any(|e| e.stage == ApplyStage::Uninstall && e.addon.as_deref() == Some("bagnon"))
  );
  assert_eq!(env.generations.current_id().unwrap(), Some(1));
  assert!(replaced.is_dir());
  assert!(!is_link(&replaced));
}

#[tokio::test]
async fn profile_restricts_installations_and_overrides() {
  let env = TestEnv::new();
  let v1 = env.serve_addon("Details", "1.0");
  let mut config = env.config(&[("details", v1.as_str())], &["details"]);
  config
    .installations
    .insert("classic".to_string(), installation("classic", &env.classic, &["details"]));

  let mut profile = aggon_lib::config::Profile::default();
  profile.installations = vec!["retail".to_string()];
  profile.addons.insert(
    "details".to_string(),
    aggon_lib::config::AddonOverride {
      version: Some("1.0".to_string()),
      ..Default::default()
    },
  );
  config.profiles.insert("retail-only".to_string(), profile);

  let resolved = config.with_profile("retail-only").unwrap();
  let reconciler = env.reconciler();
  let result = reconciler.apply(&reconciler.plan(&resolved).unwrap()).await.unwrap();

  assert!(result.success);
  assert!(is_link(&env.retail.join("details")));
  assert!(!env.classic.join("details").exists());
  let current = env.generations.get_current().unwrap();
  assert_eq!(current.addon("retail", "details").unwrap().version, "1.0");
  assert!(!current.installations.contains_key("classic"));
}

#[tokio::test]
async fn incompatible_addon_fails_planning() {
  let env = TestEnv::new();
  let mut config = env.config(&[], &[]);
  config
    .installations
    .insert("classic".to_string(), installation("classic", &env.classic, &["retailonly"]));
  config
    .addons
    .insert("retailonly".to_string(), addon("https://example.invalid/r.zip", &["retail"]));

  let err = env.reconciler().plan(&config).unwrap_err();
  assert!(err.to_string().contains("not compatible"));
  assert!(env.generations.list().unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_apply_is_not_promoted() {
  let env = TestEnv::new();
  let details = env.serve_addon("Details", "1.0");
  let config = env.config(&[("details", details.as_str())], &["details"]);

  let cancel = CancelFlag::new();
  let reconciler = env.reconciler_with(ApplyOptions {
    parallelism: 1,
    cancel: cancel.clone(),
  });
  let plan = reconciler.plan(&config).unwrap();
  cancel.cancel();

  let result = reconciler.apply(&plan).await.unwrap();

  assert!(!result.success);
  assert!(result.errors.iter().any(|e| e.stage == ApplyStage::Cancelled));
  assert_eq!(env.generations.current_id().unwrap(), None);
  assert!(!env.retail.join("details").exists());
}

#[tokio::test]
async fn many_downloads_with_bounded_parallelism() {
  let env = TestEnv::new();
  let names: Vec<String> = (0..8).map(|i| format!("Addon{}", i)).collect();
  let urls: Vec<String> = names.iter().map(|n| env.serve_addon(n, "1")).collect();
  let ids: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
  let addons: Vec<(&str, &str)> = ids.iter().map(String::as_str).zip(urls.iter().map(String::as_str)).collect();
  let wanted: Vec<&str> = ids.iter().map(String::as_str).collect();
  let config = env.config(&addons, &wanted);

  let reconciler = env.reconciler_with(ApplyOptions {
    parallelism: 2,
    cancel: CancelFlag::new(),
  });
  let result = reconciler.apply(&reconciler.plan(&config).unwrap()).await.unwrap();

  assert!(result.success);
  assert_eq!(result.downloaded, 8);
  assert_eq!(result.installed, 8);
}
