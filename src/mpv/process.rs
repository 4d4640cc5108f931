//! mpv executable detection and process spawning.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("mpv executable not found")]
  NotFound,
  #[error("Failed to spawn mpv: {0}")]
  SpawnFailed(#[from] std::io::Error),
}

/// Find mpv in PATH or common install locations.
pub fn find_mpv() -> Option<PathBuf> {
  if let Ok(path) = which::which("mpv") {
    return Some(path);
  }

  #[cfg(target_os = "macos")]
  let common_paths: &[&str] = &[
    "/usr/local/bin/mpv",
    "/opt/homebrew/bin/mpv",
    "/Applications/mpv.app/Contents/MacOS/mpv",
  ];
  #[cfg(not(target_os = "macos"))]
  let common_paths: &[&str] = &["/usr/bin/mpv", "/usr/local/bin/mpv"];

  common_paths
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

/// Spawn a headless, audio-only mpv that idles on its IPC socket.
pub fn spawn_mpv(
  mpv_path: Option<&PathBuf>,
  extra_args: &[String],
  ipc_path: &Path,
) -> Result<Child, ProcessError> {
  let mpv_exe = mpv_path
    .cloned()
    .or_else(find_mpv)
    .ok_or(ProcessError::NotFound)?;

  log::info!("Spawning mpv: {:?} with IPC: {}", mpv_exe, ipc_path.display());
  if !extra_args.is_empty() {
    log::info!("Extra mpv args: {:?}", extra_args);
  }

  let mut cmd = Command::new(&mpv_exe);
  cmd
    .arg(format!("--input-ipc-server={}", ipc_path.display()))
    .arg("--idle=yes")
    .arg("--no-video")
    .arg("--no-terminal")
    .arg("--keep-open=no")
    .arg("--ytdl=no")
    .args(extra_args);

  let child = cmd
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .spawn()?;

  Ok(child)
}

/// Remove a leftover IPC socket.
pub fn cleanup_ipc(ipc_path: &Path) {
  let _ = std::fs::remove_file(ipc_path);
}
