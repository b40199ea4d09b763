//! Fetching addon artifacts.
//!
//! The reconciler only depends on the [`Fetcher`] trait; [`HttpFetcher`] is the
//! default implementation for GitHub, plain URL and local sources.

mod http;

pub use http::HttpFetcher;

use std::future::Future;
use std::io::{self, Read};
use std::path::PathBuf;

use thiserror::Error;

use crate::config::AddonSource;

/// Bytes of a fetched artifact and the location they came from.
pub struct FetchedArtifact {
  pub reader: Box<dyn Read + Send>,
  /// Resolved location (download URL or local path).
  pub url: String,
}

impl FetchedArtifact {
  pub fn from_bytes(bytes: impl Into<Vec<u8>>, url: impl Into<String>) -> Self {
    Self {
      reader: Box::new(io::Cursor::new(bytes.into())),
      url: url.into(),
    }
  }
}

impl std::fmt::Debug for FetchedArtifact {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FetchedArtifact").field("url", &self.url).finish_non_exhaustive()
  }
}

/// Capability to turn an addon source into bytes.
pub trait Fetcher: Send + Sync + 'static {
  fn fetch(&self, source: &AddonSource) -> impl Future<Output = Result<FetchedArtifact, FetchError>> + Send;
}

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("request to {url} failed: {source}")]
  Request {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("{url} returned HTTP {status}")]
  Status { url: String, status: u16 },

  #[error("no release asset of {repository} matches '{pattern}'")]
  NoMatchingAsset { repository: String, pattern: String },

  #[error("{repository} has several release assets, set an asset pattern: {}", .assets.join(", "))]
  AmbiguousAssets { repository: String, assets: Vec<String> },

  #[error("invalid GitHub repository URL: {0}")]
  InvalidRepository(String),

  #[error("failed to read local source '{path}': {source}")]
  Local {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}
