//! yt-dlp backed resolver.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::{is_url, ResolveError, TrackResolver};
use crate::types::{Candidate, StreamRef};

/// Find yt-dlp in PATH or common install locations.
pub fn find_ytdlp() -> Option<PathBuf> {
  if let Ok(path) = which::which("yt-dlp") {
    return Some(path);
  }

  let common_paths = [
    "/usr/local/bin/yt-dlp",
    "/usr/bin/yt-dlp",
    "/opt/homebrew/bin/yt-dlp",
  ];
  common_paths
    .into_iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

/// One line of `--dump-json` output. Flat search entries omit most fields.
#[derive(Debug, Deserialize)]
struct Entry {
  id: Option<String>,
  url: Option<String>,
  webpage_url: Option<String>,
  title: Option<String>,
  duration: Option<f64>,
  uploader: Option<String>,
  channel: Option<String>,
}

impl Entry {
  fn into_candidate(self) -> Option<Candidate> {
    let id = self
      .webpage_url
      .or(self.url.filter(|u| is_url(u)))
      .or_else(|| {
        self
          .id
          .as_ref()
          .map(|id| format!("https://www.youtube.com/watch?v={}", id))
      })?;
    Some(Candidate {
      title: self.title.unwrap_or_else(|| id.clone()),
      id,
      artist: self.uploader.or(self.channel),
      duration: self.duration,
    })
  }
}

fn parse_candidates(stdout: &str, limit: usize) -> Result<Vec<Candidate>, ResolveError> {
  let mut candidates = Vec::new();
  for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
    let entry: Entry = serde_json::from_str(line)?;
    if let Some(candidate) = entry.into_candidate() {
      candidates.push(candidate);
    }
    if candidates.len() == limit {
      break;
    }
  }
  Ok(candidates)
}

fn parse_stream(stdout: &str) -> Option<StreamRef> {
  stdout
    .lines()
    .map(str::trim)
    .find(|l| is_url(l))
    .map(StreamRef::new)
}

pub struct YtDlpResolver {
  ytdlp_path: Option<PathBuf>,
  timeout: Duration,
}

impl YtDlpResolver {
  pub fn new(ytdlp_path: Option<PathBuf>, timeout: Duration) -> Self {
    Self { ytdlp_path, timeout }
  }

  async fn run(&self, args: &[&str]) -> Result<String, ResolveError> {
    let exe = self
      .ytdlp_path
      .clone()
      .or_else(find_ytdlp)
      .ok_or(ResolveError::ToolNotFound)?;

    log::debug!("Running {:?} {:?}", exe, args);
    let child = Command::new(&exe)
      .args(["--no-warnings", "--ignore-config"])
      .args(args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()?;

    let output = tokio::time::timeout(self.timeout, child.wait_with_output())
      .await
      .map_err(|_| ResolveError::Timeout(self.timeout.as_secs()))??;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(ResolveError::Failed {
        status: output.status.to_string(),
        stderr: stderr.lines().last().unwrap_or_default().to_string(),
      });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
  }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
  async fn resolve_search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>, ResolveError> {
    let query = query.trim();
    let stdout = if is_url(query) {
      self.run(&["--dump-json", "--no-playlist", query]).await?
    } else {
      let search = format!("ytsearch{}:{}", limit.max(1), query);
      self.run(&["--dump-json", "--flat-playlist", search.as_str()]).await?
    };

    let candidates = parse_candidates(&stdout, limit.max(1))?;
    log::info!("Search '{}' returned {} candidates", query, candidates.len());
    if candidates.is_empty() {
      return Err(ResolveError::NoResults(query.to_string()));
    }
    Ok(candidates)
  }

  async fn resolve_stream(&self, id: &str) -> Result<StreamRef, ResolveError> {
    let stdout = self
      .run(&["--format", "bestaudio/best", "--get-url", "--no-playlist", id])
      .await?;
    let stream = parse_stream(&stdout).ok_or_else(|| ResolveError::NoStream(id.to_string()))?;
    log::debug!("Resolved {} -> {}", id, stream.redacted());
    Ok(stream)
  }
}
