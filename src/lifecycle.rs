//! Single-instance daemon lifecycle: instance lock, spawn-and-wait for
//! clients, and the daemon's own run loop with signal handling.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::config::DaemonConfig;
use crate::error::DaemonError;
use crate::ipc::IpcServer;
use crate::playback::PlaybackController;
use crate::player::MpvPlayer;
use crate::resolver::{TrackResolver, YtDlpResolver};
use crate::session::{self, Session};

const STARTUP_ATTEMPTS: u32 = 10;

/// Exclusive advisory lock on the lock file, held for the daemon's lifetime.
#[derive(Debug)]
pub struct InstanceLock {
  file: File,
  path: PathBuf,
}

impl InstanceLock {
  /// `Ok(None)` means another daemon holds the lock.
  pub fn acquire(path: &Path) -> std::io::Result<Option<Self>> {
    let mut file = OpenOptions::new()
      .create(true)
      .read(true)
      .write(true)
      .truncate(false)
      .open(path)?;

    match file.try_lock() {
      Ok(()) => {}
      Err(TryLockError::WouldBlock) => return Ok(None),
      Err(TryLockError::Error(e)) => return Err(e),
    }

    file.set_len(0)?;
    write!(file, "{}", std::process::id())?;
    Ok(Some(Self {
      file,
      path: path.to_path_buf(),
    }))
  }
}

impl Drop for InstanceLock {
  fn drop(&mut self) {
    if let Err(e) = self.file.unlock() {
      log::debug!("Failed to unlock {}: {}", self.path.display(), e);
    }
    log::debug!("Released instance lock {}", self.path.display());
  }
}

/// Removes the listening socket file on every exit path.
struct SocketGuard(PathBuf);

impl Drop for SocketGuard {
  fn drop(&mut self) {
    let _ = std::fs::remove_file(&self.0);
  }
}

fn prepare_runtime_dir(dir: &Path) -> std::io::Result<()> {
  std::fs::create_dir_all(dir)?;
  std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
}

/// Whether a daemon answers on `socket`.
pub async fn probe(socket: &Path) -> bool {
  UnixStream::connect(socket).await.is_ok()
}

/// Make sure a daemon is reachable, spawning a detached one if needed.
pub async fn ensure_daemon(
  config: &DaemonConfig,
  config_path: Option<&Path>,
) -> Result<(), DaemonError> {
  let socket = config.socket_path();
  if probe(&socket).await {
    return Ok(());
  }

  log::info!("No daemon on {}, starting one", socket.display());
  spawn_daemon(config, config_path)
    .map_err(|e| DaemonError::StartFailed(format!("could not spawn daemon: {}", e)))?;

  for attempt in 0..STARTUP_ATTEMPTS {
    tokio::time::sleep(startup_backoff(attempt)).await;
    if probe(&socket).await {
      log::info!("Daemon ready after {} attempts", attempt + 1);
      return Ok(());
    }
  }

  Err(DaemonError::StartFailed(format!(
    "no daemon listening on {} after {} attempts (see {})",
    socket.display(),
    STARTUP_ATTEMPTS,
    config.log_path().display()
  )))
}

fn startup_backoff(attempt: u32) -> Duration {
  Duration::from_millis((50u64 << attempt.min(5)).min(1000))
}

fn spawn_daemon(config: &DaemonConfig, config_path: Option<&Path>) -> std::io::Result<()> {
  prepare_runtime_dir(&config.runtime_dir())?;
  let log = OpenOptions::new()
    .create(true)
    .append(true)
    .open(config.log_path())?;

  let exe = std::env::current_exe()?;
  let mut cmd = Command::new(exe);
  if let Some(path) = config_path {
    cmd.arg("--config").arg(path);
  }
  if let Some(dir) = &config.runtime_dir {
    cmd.arg("--runtime-dir").arg(dir);
  }
  cmd
    .arg("daemon")
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::from(log))
    // Own process group: the client's Ctrl+C must not reach the daemon.
    .process_group(0);

  let child = cmd.spawn()?;
  log::debug!("Spawned daemon pid {}", child.id());
  Ok(())
}

/// Run the daemon in the current process until stop, idle timeout or signal.
///
/// Losing the instance lock race is the normal "already running" case and
/// returns `Ok`.
pub async fn run_daemon(config: DaemonConfig) -> Result<(), DaemonError> {
  prepare_runtime_dir(&config.runtime_dir())?;

  let Some(_lock) = InstanceLock::acquire(&config.lock_path())? else {
    log::info!(
      "Another daemon holds {}, nothing to do",
      config.lock_path().display()
    );
    return Ok(());
  };

  // Holding the lock means any socket file left behind is stale.
  let socket_path = config.socket_path();
  let _ = std::fs::remove_file(&socket_path);
  let listener = UnixListener::bind(&socket_path)?;
  let _socket = SocketGuard(socket_path.clone());
  log::info!("Daemon listening on {}", socket_path.display());

  let resolver: Arc<dyn TrackResolver> = Arc::new(YtDlpResolver::new(
    config.ytdlp_path.as_ref().filter(|s| !s.is_empty()).map(PathBuf::from),
    config.resolve_timeout(),
  ));

  let (handle, inbox) = session::channel();
  let player = MpvPlayer::new(&config, handle.clone());
  let controller = PlaybackController::new(
    player,
    resolver.clone(),
    handle.clone(),
    config.max_auto_skips,
    config.history_limit,
  );
  let session = Session::new(inbox, controller, config.idle_timeout());

  let shutdown = CancellationToken::new();
  tokio::spawn(watch_signals(shutdown.clone()));

  let server = IpcServer::new(listener, handle, resolver, config.search_results);
  let server = tokio::spawn(server.run(shutdown.clone()));

  session.run(shutdown.clone()).await;
  if let Err(e) = server.await {
    log::error!("IPC server task failed: {}", e);
  }

  log::info!("Daemon exited");
  Ok(())
}

async fn watch_signals(shutdown: CancellationToken) {
  let mut terminate = match signal(SignalKind::terminate()) {
    Ok(s) => s,
    Err(e) => {
      log::error!("Failed to install SIGTERM handler: {}", e);
      return;
    }
  };

  tokio::select! {
    _ = tokio::signal::ctrl_c() => log::info!("SIGINT received"),
    _ = terminate.recv() => log::info!("SIGTERM received"),
    _ = shutdown.cancelled() => return,
  }
  shutdown.cancel();
}
