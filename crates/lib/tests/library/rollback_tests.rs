//! Rolling back to earlier generations.

use std::fs;

use aggon_lib::reconcile::ApplyError;
use aggon_lib::util::fs::is_link;

use super::common::TestEnv;

#[tokio::test]
async fn rollback_restores_previous_links_and_pointer() {
  let env = TestEnv::new();
  let a = env.serve_addon("A", "1");
  let b = env.serve_addon("B", "1");
  let c = env.serve_addon("C", "1");
  let addons = [("a", a.as_str()), ("b", b.as_str()), ("c", c.as_str())];
  let reconciler = env.reconciler();

  let first = env.config(&addons, &["a", "b"]);
  assert!(reconciler.apply(&reconciler.plan(&first).unwrap()).await.unwrap().success);
  let second = env.config(&addons, &["a", "c"]);
  assert!(reconciler.apply(&reconciler.plan(&second).unwrap()).await.unwrap().success);
  assert!(fs::symlink_metadata(env.retail.join("b")).is_err());

  let result = reconciler.rollback(None).await.unwrap();

  assert!(result.success, "errors: {:?}", result.errors);
  assert_eq!(result.generation, 1);
  assert_eq!(env.generations.current_id().unwrap(), Some(1));
  assert!(is_link(&env.retail.join("a")));
  assert!(is_link(&env.retail.join("b")));
  assert!(fs::symlink_metadata(env.retail.join("c")).is_err());
}

#[tokio::test]
async fn rollback_to_explicit_generation() {
  let env = TestEnv::new();
  let v1 = env.serve_addon("Details", "1.0");
  let v2 = env.serve_addon("Details", "2.0");
  let reconciler = env.reconciler();

  for url in [&v1, &v2] {
    let config = env.config(&[("details", url.as_str())], &["details"]);
    assert!(reconciler.apply(&reconciler.plan(&config).unwrap()).await.unwrap().success);
  }
  assert_eq!(
    fs::read_to_string(env.retail.join("details").join("Details.toc")).unwrap(),
    "## Version: 2.0"
  );

  let result = reconciler.rollback(Some(1)).await.unwrap();

  assert!(result.success);
  assert_eq!(
    fs::read_to_string(env.retail.join("details").join("Details.toc")).unwrap(),
    "## Version: 1.0"
  );

  // Moving forward again re-uses the stored content.
  let calls = env.fetcher.calls();
  assert!(reconciler.rollback(Some(2)).await.unwrap().success);
  assert_eq!(env.fetcher.calls(), calls);
  assert_eq!(env.generations.current_id().unwrap(), Some(2));
}

#[tokio::test]
async fn rollback_without_history_fails() {
  let env = TestEnv::new();
  let reconciler = env.reconciler();
  assert!(matches!(
    reconciler.rollback(None).await,
    Err(ApplyError::NoRollbackTarget)
  ));

  let details = env.serve_addon("Details", "1.0");
  let config = env.config(&[("details", details.as_str())], &["details"]);
  assert!(reconciler.apply(&reconciler.plan(&config).unwrap()).await.unwrap().success);
  assert!(matches!(
    reconciler.rollback(None).await,
    Err(ApplyError::NoRollbackTarget)
  ));
}

#[tokio::test]
async fn rollback_to_unknown_generation_fails() {
  let env = TestEnv::new();
  let result = env.reconciler().rollback(Some(7)).await;
  assert!(matches!(result, Err(ApplyError::Generation(_))));
}

#[tokio::test]
async fn default_rollback_skips_failed_generations() {
  let env = TestEnv::new();
  let a = env.serve_addon("A", "1");
  let d = env.serve_addon("D", "1");
  let addons = [
    ("a", a.as_str()),
    ("c", "https://example.invalid/C-unreachable.zip"),
    ("d", d.as_str()),
  ];
  let reconciler = env.reconciler();

  assert!(
    reconciler
      .apply(&reconciler.plan(&env.config(&addons, &["a"])).unwrap())
      .await
      .unwrap()
      .success
  );
  let failed = reconciler
    .apply(&reconciler.plan(&env.config(&addons, &["a", "c"])).unwrap())
    .await
    .unwrap();
  assert!(!failed.success);
  assert!(
    reconciler
      .apply(&reconciler.plan(&env.config(&addons, &["a", "d"])).unwrap())
      .await
      .unwrap()
      .success
  );
  assert_eq!(env.generations.current_id().unwrap(), Some(3));
  assert!(!env.generations.get(2).unwrap().complete);

  let result = reconciler.rollback(None).await.unwrap();

  assert!(result.success, "errors: {:?}", result.errors);
  assert_eq!(result.generation, 1);
  assert_eq!(env.generations.current_id().unwrap(), Some(1));
  assert!(is_link(&env.retail.join("a")));
  assert!(fs::symlink_metadata(env.retail.join("d")).is_err());
}

#[tokio::test]
async fn explicit_rollback_to_failed_generation_needs_force() {
  let env = TestEnv::new();
  let a = env.serve_addon("A", "1");
  let addons = [("a", a.as_str()), ("c", "https://example.invalid/C-unreachable.zip")];
  let reconciler = env.reconciler();

  assert!(
    reconciler
      .apply(&reconciler.plan(&env.config(&addons, &["a"])).unwrap())
      .await
      .unwrap()
      .success
  );
  let failed = reconciler
    .apply(&reconciler.plan(&env.config(&addons, &["a", "c"])).unwrap())
    .await
    .unwrap();
  assert!(!failed.success);

  assert!(matches!(
    reconciler.rollback(Some(2)).await,
    Err(ApplyError::IncompleteTarget(2))
  ));
  assert_eq!(env.generations.current_id().unwrap(), Some(1));
  assert!(is_link(&env.retail.join("a")));

  let result = reconciler.force_rollback(2).await.unwrap();
  assert!(result.success, "errors: {:?}", result.errors);
  assert_eq!(env.generations.current_id().unwrap(), Some(2));
  assert!(is_link(&env.retail.join("a")));
  assert!(env.generations.get(2).unwrap().addon("retail", "c").is_none());
}
