//! Playback state machine.
//!
//! Owned by the session loop; every method here runs on that loop, so no
//! locking is needed. Stream resolution for auto-advance is spawned off the
//! loop and comes back as [`Event::StreamResolved`].

use std::collections::VecDeque;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{DaemonError, ErrorKind, ErrorReport};
use crate::player::Player;
use crate::queue::TrackQueue;
use crate::resolver::TrackResolver;
use crate::session::{Event, SessionHandle};
use crate::types::{PlaybackState, StatusSnapshot, StreamRef, Track};

pub struct PlaybackController<P: Player> {
  player: P,
  resolver: Arc<dyn TrackResolver>,
  session: SessionHandle,
  queue: TrackQueue,
  state: PlaybackState,
  current: Option<Track>,
  /// Entry of `current` whose stream is still being resolved.
  pending: Option<Uuid>,
  /// Whether the player holds a loaded track.
  loaded: bool,
  /// Last pause flag sent to the player. mpv keeps it across loads.
  player_paused: bool,
  consecutive_failures: u32,
  max_auto_skips: u32,
  last_error: Option<ErrorReport>,
  history: VecDeque<Track>,
  history_limit: usize,
}

impl<P: Player> PlaybackController<P> {
  pub fn new(
    player: P,
    resolver: Arc<dyn TrackResolver>,
    session: SessionHandle,
    max_auto_skips: u32,
    history_limit: usize,
  ) -> Self {
    Self {
      player,
      resolver,
      session,
      queue: TrackQueue::new(),
      state: PlaybackState::Idle,
      current: None,
      pending: None,
      loaded: false,
      player_paused: false,
      consecutive_failures: 0,
      max_auto_skips: max_auto_skips.max(1),
      last_error: None,
      history: VecDeque::new(),
      history_limit,
    }
  }

  pub fn enqueue(&mut self, track: Track) -> usize {
    log::info!("Queued {}", track);
    self.queue.enqueue(track)
  }

  pub fn queue_list(&self) -> Vec<Track> {
    self.queue.list()
  }

  pub fn queue_remove(&mut self, index: usize) -> Result<Track, DaemonError> {
    let track = self.queue.remove(index)?;
    log::info!("Removed {} from queue", track);
    Ok(track)
  }

  /// Replace the current track with an already-resolved one.
  pub async fn play(
    &mut self,
    track: Track,
    stream: StreamRef,
    epoch: u64,
  ) -> Result<StatusSnapshot, DaemonError> {
    if epoch != self.session.epoch() {
      log::info!("Discarding superseded play of {}", track);
      return Err(DaemonError::Superseded);
    }

    self.retire_current();
    self.pending = None;
    self.consecutive_failures = 0;

    match self.player.load(stream, track.entry_id).await {
      Ok(()) => {
        log::info!("Playing {}", track);
        self.loaded = true;
        self.current = Some(track);
        self.state = PlaybackState::Playing;
        self.sync_pause().await?;
        Ok(self.snapshot())
      }
      Err(e) => {
        self.player_failed().await;
        Err(e.into())
      }
    }
  }

  /// Skip to the head of the queue, or go Idle if it is empty.
  pub async fn next(&mut self) -> StatusSnapshot {
    self.session.bump_epoch();
    self.consecutive_failures = 0;
    self.retire_current();
    self.advance().await;
    self.snapshot()
  }

  /// Idempotent; a no-op unless Playing.
  pub async fn pause(&mut self) -> Result<StatusSnapshot, DaemonError> {
    if self.state == PlaybackState::Playing {
      if self.loaded {
        self.set_paused(true).await?;
      }
      self.state = PlaybackState::Paused;
    }
    Ok(self.snapshot())
  }

  /// Idempotent; a no-op unless Paused.
  pub async fn resume(&mut self) -> Result<StatusSnapshot, DaemonError> {
    if self.state == PlaybackState::Paused {
      if self.loaded {
        self.set_paused(false).await?;
      }
      self.state = PlaybackState::Playing;
    }
    Ok(self.snapshot())
  }

  /// Terminate the player and go Idle. The queue is kept.
  pub async fn stop(&mut self) -> StatusSnapshot {
    self.session.bump_epoch();
    self.retire_current();
    self.pending = None;
    self.consecutive_failures = 0;
    self.player.terminate().await;
    self.loaded = false;
    self.player_paused = false;
    self.state = PlaybackState::Idle;
    log::info!("Playback stopped");
    self.snapshot()
  }

  /// Snapshot including the recorded auto-advance failure, which is cleared.
  pub fn status(&mut self) -> StatusSnapshot {
    let mut snapshot = self.snapshot();
    snapshot.last_error = self.last_error.take();
    snapshot
  }

  pub fn is_idle_and_empty(&self) -> bool {
    self.state == PlaybackState::Idle && self.queue.is_empty() && self.pending.is_none()
  }

  pub async fn shutdown(&mut self) {
    self.pending = None;
    self.player.terminate().await;
    self.loaded = false;
    self.player_paused = false;
  }

  pub async fn on_event(&mut self, event: Event) {
    match event {
      Event::TrackEnded { entry } => {
        if !self.is_current_loaded(entry) {
          log::debug!("Ignoring stale end of entry {}", entry);
          return;
        }
        self.loaded = false;
        self.consecutive_failures = 0;
        self.retire_current();
        self.advance().await;
      }
      Event::TrackFailed { entry, message } => {
        if !self.is_current_loaded(entry) {
          log::debug!("Ignoring stale failure of entry {}", entry);
          return;
        }
        self.loaded = false;
        let report = ErrorReport::new(
          ErrorKind::ResolutionFailed,
          format!("Stream failed to play: {}", message),
        );
        self.skip_failed(report).await;
      }
      Event::PlayerExited { generation } => {
        if generation != self.player.generation() {
          log::debug!("Ignoring exit of old player generation {}", generation);
          return;
        }
        self.player_failed().await;
        self.last_error = Some(ErrorReport::new(
          ErrorKind::ExternalPlayerError,
          "Player exited unexpectedly",
        ));
      }
      Event::StreamResolved { entry, result } => {
        if self.pending != Some(entry) {
          log::debug!("Discarding stale resolution for entry {}", entry);
          return;
        }
        self.pending = None;
        match result {
          Ok(stream) => self.load_pending(stream, entry).await,
          Err(e) => {
            let report = ErrorReport::new(ErrorKind::ResolutionFailed, e.to_string());
            self.skip_failed(report).await;
          }
        }
      }
    }
  }

  fn is_current_loaded(&self, entry: Uuid) -> bool {
    self.pending.is_none() && self.current.as_ref().map(|t| t.entry_id) == Some(entry)
  }

  /// Move the head of the queue into `current` and start resolving it.
  /// `current` must already be cleared.
  async fn advance(&mut self) {
    self.pending = None;
    if self.loaded {
      if let Err(e) = self.player.unload().await {
        log::warn!("Failed to unload player: {}", e);
      }
      self.loaded = false;
    }

    let Some(track) = self.queue.dequeue_next() else {
      log::info!("Queue exhausted, going idle");
      self.state = PlaybackState::Idle;
      return;
    };

    log::info!("Advancing to {}", track);
    let entry = track.entry_id;
    let id = track.id.clone();
    self.current = Some(track);
    self.pending = Some(entry);
    self.state = PlaybackState::Playing;

    let resolver = self.resolver.clone();
    let session = self.session.clone();
    tokio::spawn(async move {
      let result = resolver.resolve_stream(&id).await;
      session.notify(Event::StreamResolved { entry, result }).await;
    });
  }

  async fn load_pending(&mut self, stream: StreamRef, entry: Uuid) {
    if let Err(e) = self.player.load(stream, entry).await {
      log::error!("Player failed to load entry {}: {}", entry, e);
      self.player_failed().await;
      self.last_error = Some(ErrorReport::new(ErrorKind::ExternalPlayerError, e.to_string()));
      return;
    }
    self.loaded = true;

    if let Err(e) = self.sync_pause().await {
      log::warn!("Failed to apply pause state to new track: {}", e);
    }
  }

  /// Drop the failed current track and try the next one, up to the cap.
  async fn skip_failed(&mut self, report: ErrorReport) {
    self.consecutive_failures += 1;
    if let Some(track) = self.current.take() {
      log::warn!(
        "Skipping {} ({}/{}): {}",
        track,
        self.consecutive_failures,
        self.max_auto_skips,
        report.message
      );
    }

    if self.consecutive_failures >= self.max_auto_skips {
      log::error!(
        "{} consecutive tracks failed, stopping auto-advance",
        self.consecutive_failures
      );
      self.last_error = Some(
        DaemonError::ResolverUnavailable(self.consecutive_failures).report(),
      );
      self.consecutive_failures = 0;
      self.pending = None;
      if self.loaded {
        if let Err(e) = self.player.unload().await {
          log::warn!("Failed to unload player: {}", e);
        }
        self.loaded = false;
      }
      self.state = PlaybackState::Idle;
      return;
    }

    if self.queue.is_empty() {
      self.last_error = Some(report);
      self.consecutive_failures = 0;
    }
    self.advance().await;
  }

  /// The player is unusable: drop it and the current track.
  async fn player_failed(&mut self) {
    self.player.terminate().await;
    self.loaded = false;
    self.player_paused = false;
    self.pending = None;
    self.current = None;
    self.state = PlaybackState::Idle;
  }

  /// Pause or resume the player; on failure the player is torn down.
  async fn set_paused(&mut self, paused: bool) -> Result<(), DaemonError> {
    let result = if paused {
      self.player.pause().await
    } else {
      self.player.resume().await
    };
    if let Err(e) = result {
      log::error!("Player command failed: {}", e);
      self.player_failed().await;
      return Err(e.into());
    }
    self.player_paused = paused;
    Ok(())
  }

  /// Bring the player's pause flag in line with `state` after a load.
  async fn sync_pause(&mut self) -> Result<(), DaemonError> {
    let paused = self.state == PlaybackState::Paused;
    if paused != self.player_paused {
      self.set_paused(paused).await?;
    }
    Ok(())
  }

  fn retire_current(&mut self) {
    if let Some(track) = self.current.take() {
      self.history.push_back(track);
      while self.history.len() > self.history_limit {
        self.history.pop_front();
      }
    }
  }

  fn snapshot(&self) -> StatusSnapshot {
    StatusSnapshot {
      state: self.state,
      current: self.current.clone(),
      queue_length: self.queue.len(),
      last_error: None,
      history: self.history.iter().cloned().collect(),
    }
  }
}
