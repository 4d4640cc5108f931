//! Daemon configuration, loaded from a JSON file with per-field defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const APP_DIR: &str = "musicd";
const CONFIG_FILE: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("Failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("Invalid config: {0}")]
  Invalid(String),
}

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
  /// Custom mpv executable path (None = auto-detect).
  #[serde(default)]
  pub mpv_path: Option<String>,

  /// Additional mpv command-line arguments.
  #[serde(default)]
  pub mpv_args: Vec<String>,

  /// Custom yt-dlp executable path (None = auto-detect).
  #[serde(default)]
  pub ytdlp_path: Option<String>,

  /// Number of candidates returned by `search`.
  #[serde(default = "default_search_results")]
  pub search_results: usize,

  /// Seconds of Idle-with-empty-queue before the daemon exits.
  #[serde(default = "default_idle_timeout_secs")]
  pub idle_timeout_secs: u64,

  /// Consecutive auto-advance failures tolerated before giving up.
  #[serde(default = "default_max_auto_skips")]
  pub max_auto_skips: u32,

  /// Upper bound on a single resolver lookup.
  #[serde(default = "default_resolve_timeout_secs")]
  pub resolve_timeout_secs: u64,

  /// Directory holding the socket, lock and log files.
  #[serde(default)]
  pub runtime_dir: Option<String>,

  /// Number of finished tracks kept for `status`.
  #[serde(default = "default_history_limit")]
  pub history_limit: usize,
}

fn default_search_results() -> usize {
  5
}

fn default_idle_timeout_secs() -> u64 {
  600
}

fn default_max_auto_skips() -> u32 {
  3
}

fn default_resolve_timeout_secs() -> u64 {
  30
}

fn default_history_limit() -> usize {
  50
}

impl Default for DaemonConfig {
  fn default() -> Self {
    Self {
      mpv_path: None,
      mpv_args: Vec::new(),
      ytdlp_path: None,
      search_results: default_search_results(),
      idle_timeout_secs: default_idle_timeout_secs(),
      max_auto_skips: default_max_auto_skips(),
      resolve_timeout_secs: default_resolve_timeout_secs(),
      runtime_dir: None,
      history_limit: default_history_limit(),
    }
  }
}

impl DaemonConfig {
  /// Default location: `$XDG_CONFIG_HOME/musicd/config.json`.
  pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
  }

  /// Load configuration from `path`, or from the default location.
  ///
  /// A missing file is not an error and yields the defaults.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
      Some(path) => path,
      None => return Ok(Self::default()),
    };

    let raw = match std::fs::read_to_string(&path) {
      Ok(raw) => raw,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        log::debug!("No config at {}, using defaults", path.display());
        return Ok(Self::default());
      }
      Err(source) => return Err(ConfigError::Read { path, source }),
    };

    let config: Self =
      serde_json::from_str(&raw).map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
    config.validate()?;
    log::debug!("Loaded config from {}", path.display());
    Ok(config)
  }

  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.search_results == 0 || self.search_results > 25 {
      return Err(ConfigError::Invalid(
        "searchResults must be between 1 and 25".to_string(),
      ));
    }
    if self.idle_timeout_secs < 5 {
      return Err(ConfigError::Invalid(
        "idleTimeoutSecs must be at least 5 seconds".to_string(),
      ));
    }
    if self.max_auto_skips == 0 {
      return Err(ConfigError::Invalid("maxAutoSkips must be at least 1".to_string()));
    }
    if self.resolve_timeout_secs == 0 {
      return Err(ConfigError::Invalid(
        "resolveTimeoutSecs must be at least 1 second".to_string(),
      ));
    }
    Ok(())
  }

  pub fn idle_timeout(&self) -> Duration {
    Duration::from_secs(self.idle_timeout_secs)
  }

  pub fn resolve_timeout(&self) -> Duration {
    Duration::from_secs(self.resolve_timeout_secs)
  }

  /// Directory for runtime files. Prefers `$XDG_RUNTIME_DIR/musicd`, then
  /// the per-user cache directory.
  pub fn runtime_dir(&self) -> PathBuf {
    if let Some(dir) = self.runtime_dir.as_ref().filter(|s| !s.is_empty()) {
      return PathBuf::from(dir);
    }
    dirs::runtime_dir()
      .or_else(dirs::cache_dir)
      .unwrap_or_else(std::env::temp_dir)
      .join(APP_DIR)
  }

  pub fn socket_path(&self) -> PathBuf {
    self.runtime_dir().join("musicd.sock")
  }

  pub fn lock_path(&self) -> PathBuf {
    self.runtime_dir().join("musicd.lock")
  }

  pub fn mpv_socket_path(&self) -> PathBuf {
    self.runtime_dir().join("mpv.sock")
  }

  pub fn log_path(&self) -> PathBuf {
    self.runtime_dir().join("musicd.log")
  }
}
