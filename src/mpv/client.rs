//! High-level mpv client: owns the process and its IPC connection.

use std::path::PathBuf;
use std::process::Child;
use std::time::Duration;

use async_channel::Receiver;
use thiserror::Error;

use super::ipc::{IpcError, MpvIpc};
use super::process::{cleanup_ipc, spawn_mpv, ProcessError};
use super::protocol::{MpvCommand, MpvEvent, MpvResponse};

#[derive(Error, Debug)]
pub enum MpvError {
  #[error("Process error: {0}")]
  Process(#[from] ProcessError),
  #[error("IPC error: {0}")]
  Ipc(#[from] IpcError),
  #[error("mpv command failed: {0}")]
  CommandFailed(String),
  #[error("Not connected")]
  NotConnected,
}

pub struct MpvClient {
  mpv_path: Option<PathBuf>,
  extra_args: Vec<String>,
  ipc_path: PathBuf,
  process: Option<Child>,
  ipc: Option<MpvIpc>,
}

impl MpvClient {
  pub fn new(mpv_path: Option<PathBuf>, extra_args: Vec<String>, ipc_path: PathBuf) -> Self {
    Self {
      mpv_path,
      extra_args,
      ipc_path,
      process: None,
      ipc: None,
    }
  }

  /// Spawn mpv and connect to it, returning its event stream.
  pub async fn start(&mut self) -> Result<Receiver<MpvEvent>, MpvError> {
    cleanup_ipc(&self.ipc_path);

    let child = spawn_mpv(self.mpv_path.as_ref(), &self.extra_args, &self.ipc_path)?;
    log::info!("mpv started (pid: {})", child.id());
    self.process = Some(child);

    // Give mpv a moment to create the socket before polling for it.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let ipc = match MpvIpc::connect(&self.ipc_path, 10).await {
      Ok(ipc) => ipc,
      Err(e) => {
        self.stop().await;
        return Err(e.into());
      }
    };
    let events = ipc.events();
    self.ipc = Some(ipc);

    log::info!("mpv client connected");
    Ok(events)
  }

  /// Close IPC, kill the process and remove the socket.
  pub async fn stop(&mut self) {
    if let Some(ipc) = self.ipc.take() {
      ipc.close();
    }

    if let Some(mut child) = self.process.take() {
      let pid = child.id();
      log::info!("Killing mpv process (pid: {})", pid);

      // kill/wait block; keep them off the runtime threads.
      let result = tokio::task::spawn_blocking(move || {
        let _ = child.kill();
        child.wait()
      })
      .await;

      match result {
        Ok(Ok(status)) => log::info!("mpv exited with: {}", status),
        Ok(Err(e)) => log::error!("wait() on mpv failed: {}", e),
        Err(e) => log::error!("mpv cleanup task panicked: {}", e),
      }
    }

    cleanup_ipc(&self.ipc_path);
  }

  /// Ask mpv to quit, then make sure the process is gone.
  pub async fn quit(&mut self) {
    if self.ipc.is_some() {
      if let Err(e) = self.send(MpvCommand::quit()).await {
        log::debug!("mpv quit command failed: {}", e);
      }
    }
    self.stop().await;
  }

  pub fn is_connected(&self) -> bool {
    self.ipc.is_some()
  }

  async fn send(&self, cmd: MpvCommand) -> Result<MpvResponse, MpvError> {
    let ipc = self.ipc.as_ref().ok_or(MpvError::NotConnected)?;
    let response = ipc.send_command(cmd).await?;

    if !response.is_success() {
      return Err(MpvError::CommandFailed(response.error));
    }
    Ok(response)
  }

  /// Replace the loaded file, returning mpv's playlist entry id when reported.
  pub async fn loadfile(&self, url: &str) -> Result<Option<i64>, MpvError> {
    let response = self.send(MpvCommand::loadfile(url)).await?;
    Ok(response.playlist_entry_id())
  }

  /// Unload the current file without quitting.
  pub async fn stop_playback(&self) -> Result<(), MpvError> {
    self.send(MpvCommand::stop()).await?;
    Ok(())
  }

  pub async fn set_pause(&self, paused: bool) -> Result<(), MpvError> {
    self.send(MpvCommand::set_pause(paused)).await?;
    Ok(())
  }
}
