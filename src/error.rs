//! Daemon error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::player::PlayerError;
use crate::resolver::ResolveError;

/// Wire-visible error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
  ProtocolError,
  NotFound,
  ResolutionFailed,
  ResolverUnavailable,
  DaemonStartFailed,
  ExternalPlayerError,
  Superseded,
  Internal,
}

/// Serialized error: sent in error responses and kept as the last auto-advance failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
  pub kind: ErrorKind,
  pub message: String,
}

impl ErrorReport {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }
}

#[derive(Error, Debug)]
pub enum DaemonError {
  #[error("Malformed request: {0}")]
  Protocol(String),

  #[error("{0}")]
  NotFound(String),

  #[error("Resolution failed: {0}")]
  Resolution(#[from] ResolveError),

  #[error("Resolver unavailable: {0} consecutive tracks failed to resolve")]
  ResolverUnavailable(u32),

  #[error("Daemon failed to start: {0}")]
  StartFailed(String),

  #[error("Player error: {0}")]
  Player(#[from] PlayerError),

  #[error("Request superseded by a later next/stop")]
  Superseded,

  #[error("Daemon session has shut down")]
  SessionClosed,

  #[error("Config error: {0}")]
  Config(#[from] ConfigError),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  /// Error returned by a daemon, as seen by a client.
  #[error("{}", .0.message)]
  Remote(ErrorReport),
}

impl DaemonError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      DaemonError::Protocol(_) => ErrorKind::ProtocolError,
      DaemonError::NotFound(_) | DaemonError::SessionClosed => ErrorKind::NotFound,
      DaemonError::Resolution(_) => ErrorKind::ResolutionFailed,
      DaemonError::ResolverUnavailable(_) => ErrorKind::ResolverUnavailable,
      DaemonError::StartFailed(_) => ErrorKind::DaemonStartFailed,
      DaemonError::Player(_) => ErrorKind::ExternalPlayerError,
      DaemonError::Superseded => ErrorKind::Superseded,
      DaemonError::Config(_) | DaemonError::Io(_) => ErrorKind::Internal,
      DaemonError::Remote(report) => report.kind,
    }
  }

  pub fn report(&self) -> ErrorReport {
    match self {
      DaemonError::Remote(report) => report.clone(),
      other => ErrorReport::new(other.kind(), other.to_string()),
    }
  }
}
