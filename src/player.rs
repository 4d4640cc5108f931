//! External player seam and its mpv implementation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_channel::Receiver;
use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::config::DaemonConfig;
use crate::mpv::{EndReason, MpvClient, MpvError, MpvEvent};
use crate::session::{Event, SessionHandle};
use crate::types::StreamRef;

#[derive(Error, Debug)]
pub enum PlayerError {
  #[error(transparent)]
  Mpv(#[from] MpvError),
  #[error("Player rejected command: {0}")]
  Rejected(String),
}

/// Control surface of the external player.
///
/// Completion is reported asynchronously through the session as
/// [`Event::TrackEnded`], [`Event::TrackFailed`] or [`Event::PlayerExited`].
#[async_trait]
pub trait Player: Send {
  /// Unload whatever is loaded, then load `stream` labelled as `entry`.
  async fn load(&mut self, stream: StreamRef, entry: Uuid) -> Result<(), PlayerError>;

  async fn pause(&mut self) -> Result<(), PlayerError>;

  async fn resume(&mut self) -> Result<(), PlayerError>;

  /// Unload the current track. The process may keep running.
  async fn unload(&mut self) -> Result<(), PlayerError>;

  /// Terminate the external process. Never reported as [`Event::PlayerExited`].
  async fn terminate(&mut self);

  /// Bumped every time a new process is started.
  fn generation(&self) -> u64;
}

pub struct MpvPlayer {
  client: MpvClient,
  session: SessionHandle,
  generation: u64,
  /// mpv playlist entry id -> track entry id.
  entries: Arc<Mutex<HashMap<i64, Uuid>>>,
  /// Set before an intentional shutdown of the current process.
  stopping: Arc<AtomicBool>,
}

impl MpvPlayer {
  pub fn new(config: &DaemonConfig, session: SessionHandle) -> Self {
    let mpv_path = config
      .mpv_path
      .as_ref()
      .filter(|s| !s.is_empty())
      .map(PathBuf::from);
    Self {
      client: MpvClient::new(mpv_path, config.mpv_args.clone(), config.mpv_socket_path()),
      session,
      generation: 0,
      entries: Arc::new(Mutex::new(HashMap::new())),
      stopping: Arc::new(AtomicBool::new(false)),
    }
  }

  async fn ensure_running(&mut self) -> Result<(), PlayerError> {
    if self.client.is_connected() {
      return Ok(());
    }

    let events = self.client.start().await?;
    self.generation += 1;
    self.entries.lock().clear();
    self.stopping = Arc::new(AtomicBool::new(false));

    tokio::spawn(watch_events(
      events,
      self.generation,
      self.entries.clone(),
      self.stopping.clone(),
      self.session.clone(),
    ));
    Ok(())
  }
}

#[async_trait]
impl Player for MpvPlayer {
  async fn load(&mut self, stream: StreamRef, entry: Uuid) -> Result<(), PlayerError> {
    self.ensure_running().await?;
    log::info!("Loading {} as entry {}", stream.redacted(), entry);

    match self.client.loadfile(stream.as_str()).await? {
      Some(mpv_entry) => {
        self.entries.lock().insert(mpv_entry, entry);
      }
      None => log::warn!("mpv did not report a playlist entry id; completion will not be tracked"),
    }
    Ok(())
  }

  async fn pause(&mut self) -> Result<(), PlayerError> {
    self.client.set_pause(true).await?;
    Ok(())
  }

  async fn resume(&mut self) -> Result<(), PlayerError> {
    self.client.set_pause(false).await?;
    Ok(())
  }

  async fn unload(&mut self) -> Result<(), PlayerError> {
    if self.client.is_connected() {
      self.client.stop_playback().await?;
    }
    Ok(())
  }

  async fn terminate(&mut self) {
    self.stopping.store(true, Ordering::SeqCst);
    self.client.quit().await;
    self.entries.lock().clear();
  }

  fn generation(&self) -> u64 {
    self.generation
  }
}

/// Translate mpv events of one process into session events.
async fn watch_events(
  events: Receiver<MpvEvent>,
  generation: u64,
  entries: Arc<Mutex<HashMap<i64, Uuid>>>,
  stopping: Arc<AtomicBool>,
  session: SessionHandle,
) {
  log::debug!("Watching mpv events (generation {})", generation);

  while let Ok(event) = events.recv().await {
    let Some((mpv_entry, reason)) = event.end_of_file() else {
      continue;
    };
    let Some(entry) = entries.lock().remove(&mpv_entry) else {
      continue;
    };

    match reason {
      EndReason::Eof => session.notify(Event::TrackEnded { entry }).await,
      EndReason::Error(message) => session.notify(Event::TrackFailed { entry, message }).await,
      EndReason::Interrupted => log::debug!("Entry {} interrupted", entry),
    }
  }

  if !stopping.load(Ordering::SeqCst) {
    log::warn!("mpv (generation {}) went away unexpectedly", generation);
    session.notify(Event::PlayerExited { generation }).await;
  }
}
