use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn plan_lists_installs_without_touching_state() {
  let env = TestEnv::new();
  let details = env.write_archive("Details", "1.0");
  env.write_config(&[("details", &details)], &["details"]);

  env
    .aggon_cmd()
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("details"))
    .stdout(predicate::str::contains("1 to install"));

  assert!(!env.addons_dir().join("details").exists());
  assert!(!env.root_path().join("generations").join("current").exists());
}

#[test]
fn plan_json_has_operations() {
  let env = TestEnv::new();
  let details = env.write_archive("Details", "1.0");
  env.write_config(&[("details", &details)], &["details"]);

  let plan = env.json(&["plan"]);

  assert_eq!(plan["current_generation"], serde_json::Value::Null);
  assert_eq!(plan["operations"][0]["kind"], "install");
  assert_eq!(plan["operations"][0]["addon"], "details");
}

#[test]
fn plan_without_config_fails() {
  let env = TestEnv::new();

  env
    .aggon_cmd()
    .arg("plan")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn switch_links_addons_and_activates_generation() {
  let env = TestEnv::new();
  let details = env.write_archive("Details", "1.0");
  let bagnon = env.write_archive("Bagnon", "2.0");
  env.write_config(&[("details", &details), ("bagnon", &bagnon)], &["details", "bagnon"]);

  env
    .aggon_cmd()
    .arg("switch")
    .assert()
    .success()
    .stdout(predicate::str::contains("Switched to generation 1"));

  let link = env.addons_dir().join("details");
  assert!(std::fs::symlink_metadata(&link).is_ok());
  assert_eq!(
    std::fs::read_to_string(link.join("Details.toc")).unwrap(),
    "## Version: 1.0"
  );
  assert!(env.addons_dir().join("bagnon").join("Bagnon.lua").exists());
}

#[test]
fn second_switch_is_a_relink() {
  let env = TestEnv::new();
  let details = env.write_archive("Details", "1.0");
  env.write_config(&[("details", &details)], &["details"]);
  env.switch();

  let plan = env.json(&["plan"]);
  assert_eq!(plan["operations"][0]["kind"], "symlink");

  let result = env.json(&["switch"]);
  assert_eq!(result["success"], true);
  assert_eq!(result["generation"], 2);
  assert_eq!(result["downloaded"], 0);
}

#[test]
fn removed_addon_is_unlinked() {
  let env = TestEnv::new();
  let details = env.write_archive("Details", "1.0");
  let bagnon = env.write_archive("Bagnon", "1.0");
  let addons = [("details", &details), ("bagnon", &bagnon)];
  env.write_config(&addons, &["details", "bagnon"]);
  env.switch();

  env.write_config(&addons, &["details"]);
  env
    .aggon_cmd()
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("1 to uninstall"));
  env.switch();

  assert!(std::fs::symlink_metadata(env.addons_dir().join("bagnon")).is_err());
  assert!(env.addons_dir().join("details").exists());
}

#[test]
fn failed_switch_exits_non_zero_and_keeps_current() {
  let env = TestEnv::new();
  let details = env.write_archive("Details", "1.0");
  env.write_config(&[("details", &details)], &["details"]);
  env.switch();

  let missing = env.temp.path().join("archives").join("missing.zip");
  env.write_config(&[("details", &details), ("missing", &missing)], &["details", "missing"]);

  env
    .aggon_cmd()
    .arg("switch")
    .assert()
    .failure()
    .stderr(predicate::str::contains("not activated"));

  let status = env.json(&["status"]);
  assert_eq!(status["generation"], 1);
}

#[test]
fn profile_limits_installations() {
  let env = TestEnv::new();
  let details = env.write_archive("Details", "1.0");
  let mut config = env.config_value(&[("details", &details)], &["details"]);
  let classic = env.temp.path().join("wow").join("_classic_").join("Interface").join("AddOns");
  config["installations"]["classic"] = serde_json::json!({
    "type": "retail",
    "path": classic.display().to_string(),
    "addons": ["details"],
  });
  config["profiles"] = serde_json::json!({ "main": { "installations": ["retail"] } });
  env.write_config_value(&config);

  env.aggon_cmd().args(["--profile", "main", "switch"]).assert().success();

  assert!(env.addons_dir().join("details").exists());
  assert!(!classic.join("details").exists());
}

#[test]
fn unknown_profile_fails() {
  let env = TestEnv::new();
  let details = env.write_archive("Details", "1.0");
  env.write_config(&[("details", &details)], &["details"]);

  env
    .aggon_cmd()
    .args(["--profile", "nope", "plan"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("nope"));
}
