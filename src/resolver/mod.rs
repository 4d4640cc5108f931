//! Track resolution: query -> candidates, identifier -> stream reference.
//!
//! - `ytdlp.rs` - resolver backed by the yt-dlp executable

mod ytdlp;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Candidate, StreamRef};

pub use ytdlp::{find_ytdlp, YtDlpResolver};

#[derive(Error, Debug)]
pub enum ResolveError {
  #[error("yt-dlp executable not found")]
  ToolNotFound,
  #[error("Failed to run resolver: {0}")]
  Spawn(#[from] std::io::Error),
  #[error("Resolver exited with {status}: {stderr}")]
  Failed { status: String, stderr: String },
  #[error("Resolver output could not be parsed: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("No results for '{0}'")]
  NoResults(String),
  #[error("No stream available for '{0}'")]
  NoStream(String),
  #[error("Resolver timed out after {0} seconds")]
  Timeout(u64),
}

/// Resolution collaborator. No retries happen here.
#[async_trait]
pub trait TrackResolver: Send + Sync {
  /// Up to `limit` candidates in the collaborator's relevance order.
  async fn resolve_search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>, ResolveError>;

  /// A fresh, single-use stream reference for `id`.
  async fn resolve_stream(&self, id: &str) -> Result<StreamRef, ResolveError>;
}

/// Top-ranked candidate for `query`.
pub async fn resolve_first(
  resolver: &dyn TrackResolver,
  query: &str,
) -> Result<Candidate, ResolveError> {
  resolver
    .resolve_search(query, 1)
    .await?
    .into_iter()
    .next()
    .ok_or_else(|| ResolveError::NoResults(query.to_string()))
}

pub(crate) fn is_url(query: &str) -> bool {
  let query = query.trim_start();
  query.starts_with("https://") || query.starts_with("http://")
}
