//! Fakes for exercising the session without mpv or yt-dlp.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::playback::PlaybackController;
use crate::player::{Player, PlayerError};
use crate::resolver::{ResolveError, TrackResolver};
use crate::session::{self, Session, SessionHandle};
use crate::types::{Candidate, StreamRef, Track};

pub fn candidate(title: &str) -> Candidate {
  Candidate {
    id: title.to_string(),
    title: title.to_string(),
    artist: None,
    duration: Some(200.0),
  }
}

pub fn candidate_track(title: &str) -> Track {
  Track::from_candidate(candidate(title))
}

/// Records every call; clones share state.
#[derive(Clone)]
pub struct FakePlayer {
  calls: Arc<Mutex<Vec<String>>>,
  generation: Arc<AtomicU64>,
  fail_loads: Arc<Mutex<bool>>,
}

impl FakePlayer {
  pub fn new() -> Self {
    Self {
      calls: Arc::new(Mutex::new(Vec::new())),
      generation: Arc::new(AtomicU64::new(1)),
      fail_loads: Arc::new(Mutex::new(false)),
    }
  }

  pub fn fail_loads(&self, fail: bool) {
    *self.fail_loads.lock() = fail;
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().clone()
  }

  pub fn calls_named(&self, name: &str) -> usize {
    self.calls.lock().iter().filter(|c| c.as_str() == name).count()
  }

  pub fn generation_now(&self) -> u64 {
    self.generation.load(Ordering::SeqCst)
  }

  fn record(&self, name: &str) {
    self.calls.lock().push(name.to_string());
  }
}

#[async_trait]
impl Player for FakePlayer {
  async fn load(&mut self, _stream: StreamRef, _entry: Uuid) -> Result<(), PlayerError> {
    self.record("load");
    if *self.fail_loads.lock() {
      return Err(PlayerError::Rejected("load refused".to_string()));
    }
    Ok(())
  }

  async fn pause(&mut self) -> Result<(), PlayerError> {
    self.record("pause");
    Ok(())
  }

  async fn resume(&mut self) -> Result<(), PlayerError> {
    self.record("resume");
    Ok(())
  }

  async fn unload(&mut self) -> Result<(), PlayerError> {
    self.record("unload");
    Ok(())
  }

  async fn terminate(&mut self) {
    self.record("terminate");
    self.generation.fetch_add(1, Ordering::SeqCst);
  }

  fn generation(&self) -> u64 {
    self.generation_now()
  }
}

/// Echoes queries back as candidates; streams fail for registered ids.
#[derive(Clone, Default)]
pub struct FakeResolver {
  failing: Arc<Mutex<HashSet<String>>>,
  empty: Arc<Mutex<HashSet<String>>>,
  stream_attempts: Arc<AtomicUsize>,
  search_delay: Arc<Mutex<Option<Duration>>>,
  stream_delay: Arc<Mutex<Option<Duration>>>,
}

impl FakeResolver {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn fail_stream(&self, id: &str) {
    self.failing.lock().insert(id.to_string());
  }

  pub fn no_results_for(&self, query: &str) {
    self.empty.lock().insert(query.to_string());
  }

  pub fn delay_searches(&self, delay: Duration) {
    *self.search_delay.lock() = Some(delay);
  }

  pub fn delay_streams(&self, delay: Duration) {
    *self.stream_delay.lock() = Some(delay);
  }

  pub fn stream_attempts(&self) -> usize {
    self.stream_attempts.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl TrackResolver for FakeResolver {
  async fn resolve_search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>, ResolveError> {
    let delay = *self.search_delay.lock();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    if self.empty.lock().contains(query) {
      return Err(ResolveError::NoResults(query.to_string()));
    }
    Ok(
      (0..limit)
        .map(|i| {
          if i == 0 {
            candidate(query)
          } else {
            candidate(&format!("{} ({})", query, i))
          }
        })
        .collect(),
    )
  }

  async fn resolve_stream(&self, id: &str) -> Result<StreamRef, ResolveError> {
    self.stream_attempts.fetch_add(1, Ordering::SeqCst);
    let delay = *self.stream_delay.lock();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    if self.failing.lock().contains(id) {
      return Err(ResolveError::NoStream(id.to_string()));
    }
    Ok(StreamRef::new(format!("https://stream.test/{}", id)))
  }
}

/// A running session over fakes.
pub struct Harness {
  pub handle: SessionHandle,
  pub player: FakePlayer,
  pub token: CancellationToken,
}

impl Harness {
  pub fn start(resolver: FakeResolver, max_auto_skips: u32) -> Self {
    Self::with_idle_timeout(resolver, max_auto_skips, Duration::from_secs(3600))
  }

  pub fn with_idle_timeout(resolver: FakeResolver, max_auto_skips: u32, idle: Duration) -> Self {
    let (handle, inbox) = session::channel();
    let player = FakePlayer::new();
    let controller = PlaybackController::new(
      player.clone(),
      Arc::new(resolver),
      handle.clone(),
      max_auto_skips,
      10,
    );
    let token = CancellationToken::new();
    let session = Session::new(inbox, controller, idle);
    tokio::spawn(session.run(token.clone()));
    Self {
      handle,
      player,
      token,
    }
  }
}

impl Drop for Harness {
  fn drop(&mut self) {
    self.token.cancel();
  }
}
