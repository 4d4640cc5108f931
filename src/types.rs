//! Domain types shared by the queue, controller and wire protocol.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorReport;

/// A search hit from the resolver, before it is bound to the queue or player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
  /// Resolver-specific identifier (a page URL for yt-dlp).
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub artist: Option<String>,
  /// Duration in seconds.
  #[serde(default)]
  pub duration: Option<f64>,
}

/// A track tracked by the daemon, either queued or current.
///
/// Holds no stream reference; that is resolved at play time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
  /// Unique per entry; two tracks from the same query differ here.
  pub entry_id: Uuid,
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub artist: Option<String>,
  #[serde(default)]
  pub duration: Option<f64>,
  pub enqueued_at: DateTime<Utc>,
}

impl Track {
  pub fn from_candidate(candidate: Candidate) -> Self {
    Self {
      entry_id: Uuid::new_v4(),
      id: candidate.id,
      title: candidate.title,
      artist: candidate.artist,
      duration: candidate.duration,
      enqueued_at: Utc::now(),
    }
  }
}

fn write_title(f: &mut fmt::Formatter<'_>, artist: Option<&str>, title: &str) -> fmt::Result {
  match artist {
    Some(artist) => write!(f, "{} - {}", artist, title),
    None => f.write_str(title),
  }
}

impl fmt::Display for Candidate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write_title(f, self.artist.as_deref(), &self.title)
  }
}

impl fmt::Display for Track {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write_title(f, self.artist.as_deref(), &self.title)
  }
}

/// Single-use playable reference handed to the player.
///
/// Not `Clone`: loading consumes it. `Debug` output is redacted.
#[derive(PartialEq, Eq)]
pub struct StreamRef(String);

impl fmt::Debug for StreamRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("StreamRef").field(&self.redacted()).finish()
  }
}

impl StreamRef {
  pub fn new(url: impl Into<String>) -> Self {
    Self(url.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Scheme and host only; stream URLs carry signed query strings.
  pub fn redacted(&self) -> String {
    redact_url(&self.0)
  }
}

pub(crate) fn redact_url(url: &str) -> String {
  match url.split_once("://") {
    Some((scheme, rest)) => {
      let host = rest.split(['/', '?']).next().unwrap_or_default();
      format!("{}://{}/...", scheme, host)
    }
    None => "<stream>".to_string(),
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
  Idle,
  Playing,
  Paused,
}

impl fmt::Display for PlaybackState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      PlaybackState::Idle => "idle",
      PlaybackState::Playing => "playing",
      PlaybackState::Paused => "paused",
    };
    f.write_str(name)
  }
}

/// Point-in-time view returned by `status` and most mutating verbs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
  pub state: PlaybackState,
  pub current: Option<Track>,
  pub queue_length: usize,
  /// Failure recorded by unsolicited auto-advance, reported once.
  #[serde(default)]
  pub last_error: Option<ErrorReport>,
  #[serde(default)]
  pub history: Vec<Track>,
}
