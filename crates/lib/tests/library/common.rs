//! Shared fixtures for library integration tests.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use aggon_lib::config::{AddonDescriptor, AddonSource, DeclarativeConfig, InstallationDescriptor, SourceType};
use aggon_lib::fetch::{FetchError, FetchedArtifact, Fetcher};
use aggon_lib::generation::GenerationManager;
use aggon_lib::reconcile::{ApplyOptions, Reconciler};
use aggon_lib::store::Store;
use tempfile::TempDir;

/// In-memory fetcher serving registered URLs; anything else is a 404.
#[derive(Clone, Default)]
pub struct MockFetcher {
  artifacts: Arc<Mutex<HashMap<String, Vec<u8>>>>,
  calls: Arc<AtomicUsize>,
}

impl MockFetcher {
  pub fn serve(&self, url: &str, bytes: Vec<u8>) {
    self.artifacts.lock().unwrap().insert(url.to_string(), bytes);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Fetcher for MockFetcher {
  async fn fetch(&self, source: &AddonSource) -> Result<FetchedArtifact, FetchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let bytes = self.artifacts.lock().unwrap().get(&source.url).cloned();
    match bytes {
      Some(bytes) => Ok(FetchedArtifact::from_bytes(bytes, source.url.clone())),
      None => Err(FetchError::Status {
        url: source.url.clone(),
        status: 404,
      }),
    }
  }
}

/// A state root, a store, a generation manager and two AddOns directories.
pub struct TestEnv {
  _temp: TempDir,
  pub store: Store,
  pub generations: GenerationManager,
  pub retail: PathBuf,
  pub classic: PathBuf,
  pub fetcher: MockFetcher,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let store = Store::new(temp.path().join("state").join("store-root"));
    let generations = GenerationManager::new(temp.path().join("state"));
    aggon_lib::init::initialize(&store, &generations).unwrap();

    let retail = temp.path().join("wow").join("_retail_").join("Interface").join("AddOns");
    let classic = temp.path().join("wow").join("_classic_").join("Interface").join("AddOns");

    Self {
      _temp: temp,
      store,
      generations,
      retail,
      classic,
      fetcher: MockFetcher::default(),
    }
  }

  pub fn reconciler(&self) -> Reconciler<MockFetcher> {
    self.reconciler_with(ApplyOptions::default())
  }

  pub fn reconciler_with(&self, options: ApplyOptions) -> Reconciler<MockFetcher> {
    Reconciler::new(self.store.clone(), self.generations.clone(), self.fetcher.clone()).with_options(options)
  }

  /// Serve a zip archive for addon `name` and return its URL.
  pub fn serve_addon(&self, name: &str, version: &str) -> String {
    let url = format!("https://example.invalid/{}-{}.zip", name, version);
    self.fetcher.serve(&url, addon_archive(name, version));
    url
  }

  /// Config with a retail installation wanting `wanted`; `addons` pairs ids with URLs.
  pub fn config(&self, addons: &[(&str, &str)], wanted: &[&str]) -> DeclarativeConfig {
    let mut config = DeclarativeConfig::starter();
    config
      .installations
      .insert("retail".to_string(), installation("retail", &self.retail, wanted));
    for (id, url) in addons {
      config.addons.insert(id.to_string(), addon(url, &["retail", "classic"]));
    }
    config
  }
}

pub fn installation(kind: &str, path: &Path, addons: &[&str]) -> InstallationDescriptor {
  InstallationDescriptor {
    kind: kind.to_string(),
    path: path.display().to_string(),
    enabled: true,
    addons: addons.iter().map(|s| s.to_string()).collect(),
  }
}

pub fn addon(url: &str, compatible: &[&str]) -> AddonDescriptor {
  AddonDescriptor {
    source: AddonSource {
      kind: SourceType::Url,
      url: url.to_string(),
      reference: String::new(),
      asset: None,
    },
    version: String::new(),
    hash: None,
    ignore: vec![],
    compatible: compatible.iter().map(|s| s.to_string()).collect(),
    folder: None,
  }
}

/// A zip laid out like a GitHub archive: one root folder holding the addon.
pub fn addon_archive(name: &str, version: &str) -> Vec<u8> {
  zip_archive(&[
    (format!("{}-{}/{}.toc", name, version, name).as_str(), format!("## Version: {}", version).as_str()),
    (format!("{}-{}/{}.lua", name, version, name).as_str(), "print('loaded')"),
    (format!("{}-{}/README.md", name, version).as_str(), "docs"),
    (format!("{}-{}/.pkgmeta", name, version).as_str(), "package-as: addon"),
  ])
}

pub fn zip_archive(files: &[(&str, &str)]) -> Vec<u8> {
  let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
  let options = zip::write::SimpleFileOptions::default();
  for (name, content) in files {
    writer.start_file(*name, options).unwrap();
    writer.write_all(content.as_bytes()).unwrap();
  }
  writer.finish().unwrap().into_inner()
}
