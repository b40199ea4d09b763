//! Default fetcher over HTTP(S) and the local filesystem.

use std::fs::File;

use serde::Deserialize;
use tracing::{debug, info};

use super::{FetchError, FetchedArtifact, Fetcher};
use crate::config::{AddonSource, SourceType};
use crate::platform::paths::expand_tilde;

const GITHUB_API: &str = "https://api.github.com";
const DEFAULT_BRANCH: &str = "main";
const LATEST: &str = "latest";

#[derive(Debug, Deserialize)]
struct Release {
  #[serde(default)]
  assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReleaseAsset {
  name: String,
  browser_download_url: String,
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  api_base: String,
}

impl Default for HttpFetcher {
  fn default() -> Self {
    Self::new()
  }
}

impl HttpFetcher {
  pub fn new() -> Self {
    let client = reqwest::Client::builder()
      .user_agent(concat!("aggon/", env!("CARGO_PKG_VERSION")))
      .build()
      .unwrap_or_default();
    Self {
      client,
      api_base: GITHUB_API.to_string(),
    }
  }

  /// Use a different GitHub API endpoint (enterprise hosts, mirrors).
  pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
    self.api_base = api_base.into().trim_end_matches('/').to_string();
    self
  }

  async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
    let response = self.client.get(url).send().await.map_err(|source| FetchError::Request {
      url: url.to_string(),
      source,
    })?;

    let status = response.status();
    if !status.is_success() {
      return Err(FetchError::Status {
        url: url.to_string(),
        status: status.as_u16(),
      });
    }
    Ok(response)
  }

  async fn download(&self, url: &str) -> Result<FetchedArtifact, FetchError> {
    info!(url, "downloading");
    let bytes = self
      .get(url)
      .await?
      .bytes()
      .await
      .map_err(|source| FetchError::Request {
        url: url.to_string(),
        source,
      })?;
    debug!(url, size = bytes.len(), "download complete");
    Ok(FetchedArtifact::from_bytes(bytes.to_vec(), url))
  }

  async fn release_asset_url(&self, source: &AddonSource) -> Result<String, FetchError> {
    let (owner, repo) = parse_repository(&source.url)?;
    let reference = source.reference.trim();
    let api_url = if reference.is_empty() || reference == LATEST {
      format!("{}/repos/{}/{}/releases/latest", self.api_base, owner, repo)
    } else {
      format!("{}/repos/{}/{}/releases/tags/{}", self.api_base, owner, repo, reference)
    };

    debug!(url = %api_url, "querying release");
    let release: Release = self
      .get(&api_url)
      .await?
      .json()
      .await
      .map_err(|source| FetchError::Request { url: api_url, source })?;

    let asset = select_asset(&release.assets, source.asset.as_deref(), &format!("{}/{}", owner, repo))?;
    Ok(asset.browser_download_url.clone())
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, source: &AddonSource) -> Result<FetchedArtifact, FetchError> {
    match source.kind {
      SourceType::Github => {
        let wants_release = source.asset.as_deref().is_some_and(|a| !a.trim().is_empty())
          || source.reference.trim() == LATEST;
        let url = if wants_release {
          self.release_asset_url(source).await?
        } else {
          archive_url(&source.url, &source.reference)
        };
        self.download(&url).await
      }
      SourceType::Url => self.download(source.url.trim()).await,
      SourceType::Local => {
        let path = expand_tilde(source.url.trim());
        let file = File::open(&path).map_err(|e| FetchError::Local {
          path: path.clone(),
          source: e,
        })?;
        debug!(path = %path.display(), "opened local source");
        Ok(FetchedArtifact {
          reader: Box::new(file),
          url: path.display().to_string(),
        })
      }
    }
  }
}

/// Owner and repository name from `https://github.com/{owner}/{repo}`.
fn parse_repository(url: &str) -> Result<(String, String), FetchError> {
  let trimmed = url.trim().trim_end_matches('/');
  let without_scheme = trimmed.split_once("://").map(|(_, rest)| rest).unwrap_or(trimmed);
  let mut parts = without_scheme.split('/').skip(1);

  match (parts.next(), parts.next()) {
    (Some(owner), Some(repo)) if !owner.is_empty() && !repo.is_empty() => {
      Ok((owner.to_string(), repo.trim_end_matches(".git").to_string()))
    }
    _ => Err(FetchError::InvalidRepository(url.to_string())),
  }
}

/// Source archive of `reference`, defaulting to the main branch.
fn archive_url(url: &str, reference: &str) -> String {
  let base = url.trim().trim_end_matches('/').trim_end_matches(".git");
  let reference = match reference.trim() {
    "" => DEFAULT_BRANCH,
    r => r,
  };
  format!("{}/archive/{}.zip", base, reference)
}

fn select_asset<'a>(
  assets: &'a [ReleaseAsset],
  pattern: Option<&str>,
  repository: &str,
) -> Result<&'a ReleaseAsset, FetchError> {
  match pattern.map(str::trim).filter(|p| !p.is_empty()) {
    Some(pattern) => {
      let needle = pattern.to_ascii_lowercase();
      assets
        .iter()
        .find(|a| a.name.to_ascii_lowercase().contains(&needle))
        .ok_or_else(|| FetchError::NoMatchingAsset {
          repository: repository.to_string(),
          pattern: pattern.to_string(),
        })
    }
    None => match assets {
      [single] => Ok(single),
      [] => Err(FetchError::NoMatchingAsset {
        repository: repository.to_string(),
        pattern: String::new(),
      }),
      many => Err(FetchError::AmbiguousAssets {
        repository: repository.to_string(),
        assets: many.iter().map(|a| a.name.clone()).collect(),
      }),
    },
  }
}
