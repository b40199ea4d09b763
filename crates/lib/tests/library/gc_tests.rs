//! Garbage collection across switches.

use aggon_lib::gc::collect_garbage;

use super::common::TestEnv;

#[tokio::test]
async fn gc_keeps_content_of_retained_generations() {
  let env = TestEnv::new();
  let reconciler = env.reconciler();
  let mut versions = Vec::new();

  for version in ["1", "2", "3"] {
    let url = env.serve_addon("Details", version);
    let config = env.config(&[("details", url.as_str())], &["details"]);
    assert!(reconciler.apply(&reconciler.plan(&config).unwrap()).await.unwrap().success);
    let current = env.generations.get_current().unwrap();
    versions.push(current.addon("retail", "details").unwrap().hash.clone());
  }

  let result = collect_garbage(&env.store, &env.generations, 2, false).unwrap();

  assert_eq!(result.generations_deleted, vec![1]);
  assert!(!env.store.exists(&versions[0]));
  assert!(env.store.exists(&versions[1]));
  assert!(env.store.exists(&versions[2]));
  // The first archive blob and its descriptor mapping are gone too.
  assert!(result.store.entries_deleted >= 2);
  assert!(result.store.index_entries_removed >= 1);
}

#[tokio::test]
async fn replanning_after_gc_downloads_again() {
  let env = TestEnv::new();
  let reconciler = env.reconciler();
  let v1 = env.serve_addon("Details", "1");
  let v2 = env.serve_addon("Details", "2");

  let old = env.config(&[("details", v1.as_str())], &["details"]);
  assert!(reconciler.apply(&reconciler.plan(&old).unwrap()).await.unwrap().success);
  let new = env.config(&[("details", v2.as_str())], &["details"]);
  assert!(reconciler.apply(&reconciler.plan(&new).unwrap()).await.unwrap().success);

  collect_garbage(&env.store, &env.generations, 0, false).unwrap();

  let plan = reconciler.plan(&old).unwrap();
  assert_eq!(plan.downloads.len(), 1);
}
