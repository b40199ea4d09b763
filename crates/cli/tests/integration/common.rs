//! Shared test helpers for CLI integration tests.

use std::io::Write;
use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::{Value, json};
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets its own state root (`AGGON_ROOT`), a retail `AddOns`
/// directory and a folder of local addon archives.
pub struct TestEnv {
  pub temp: TempDir,
  pub config_path: PathBuf,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("aggon-declarative.json");
    Self { temp, config_path }
  }

  /// State root (store and generations).
  pub fn root_path(&self) -> PathBuf {
    let p = self.temp.path().join("state");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn addons_dir(&self) -> PathBuf {
    self.temp.path().join("wow").join("_retail_").join("Interface").join("AddOns")
  }

  /// Write a zip archive for addon `name` and return its path.
  pub fn write_archive(&self, name: &str, version: &str) -> PathBuf {
    let dir = self.temp.path().join("archives");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{}-{}.zip", name, version));
    std::fs::write(&path, addon_archive(name, version)).unwrap();
    path
  }

  /// Write a config with a retail installation wanting `wanted`, where each
  /// addon is served from a local archive.
  pub fn write_config(&self, addons: &[(&str, &PathBuf)], wanted: &[&str]) {
    self.write_config_value(&self.config_value(addons, wanted));
  }

  pub fn config_value(&self, addons: &[(&str, &PathBuf)], wanted: &[&str]) -> Value {
    let addons: serde_json::Map<String, Value> = addons
      .iter()
      .map(|(id, path)| {
        (
          id.to_string(),
          json!({
            "source": { "type": "local", "url": path.display().to_string() },
            "compatible": ["retail"],
          }),
        )
      })
      .collect();

    json!({
      "schema": "aggon/v2",
      "installations": {
        "retail": {
          "type": "retail",
          "path": self.addons_dir().display().to_string(),
          "addons": wanted,
        }
      },
      "addons": addons,
      "settings": { "backup_generations": 2 },
    })
  }

  pub fn write_config_value(&self, value: &Value) {
    std::fs::write(&self.config_path, serde_json::to_string_pretty(value).unwrap()).unwrap();
  }

  /// Get a pre-configured Command for the aggon binary.
  pub fn aggon_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("aggon");
    cmd.env("AGGON_ROOT", self.root_path());
    cmd.env_remove("RUST_LOG");
    cmd.arg("--config").arg(&self.config_path);
    cmd
  }

  /// Run `switch` and assert it succeeded.
  pub fn switch(&self) {
    let output = self.aggon_cmd().arg("switch").output().unwrap();
    assert!(
      output.status.success(),
      "switch failed: {}",
      String::from_utf8_lossy(&output.stderr)
    );
  }

  /// Run a command with `-o json` and parse its stdout.
  pub fn json(&self, args: &[&str]) -> Value {
    let output = self.aggon_cmd().args(args).args(["-o", "json"]).output().unwrap();
    assert!(
      output.status.success(),
      "{:?} failed: {}",
      args,
      String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
  }
}

/// A zip laid out like a GitHub archive: one root folder holding the addon.
pub fn addon_archive(name: &str, version: &str) -> Vec<u8> {
  let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
  let options = zip::write::SimpleFileOptions::default();
  let files = [
    (format!("{}-{}/{}.toc", name, version, name), format!("## Version: {}", version)),
    (format!("{}-{}/{}.lua", name, version, name), "print('loaded')".to_string()),
  ];
  for (path, content) in files {
    writer.start_file(path, options).unwrap();
    writer.write_all(content.as_bytes()).unwrap();
  }
  writer.finish().unwrap().into_inner()
}
