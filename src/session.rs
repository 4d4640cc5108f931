//! The daemon's single serialization point.
//!
//! Client commands (after any resolution work) and internal events flow
//! through one channel into [`Session::run`], the only code that mutates the
//! queue or playback state. Ordering is therefore the channel's order.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::DaemonError;
use crate::ipc::Payload;
use crate::playback::PlaybackController;
use crate::player::Player;
use crate::resolver::ResolveError;
use crate::types::{StreamRef, Track};

const CHANNEL_CAPACITY: usize = 64;

/// State-affecting requests, already resolved where resolution is needed.
#[derive(Debug)]
pub enum Command {
  /// Replace the current track. `epoch` is [`SessionHandle::epoch`] read
  /// before resolution started.
  Play {
    track: Track,
    stream: StreamRef,
    epoch: u64,
  },
  Enqueue {
    track: Track,
  },
  QueueList,
  QueueRemove {
    index: usize,
  },
  Next,
  Pause,
  Resume,
  Status,
  Stop,
  Shutdown,
}

/// Internal notifications, funnelled through the same channel as commands.
#[derive(Debug)]
pub enum Event {
  /// The player finished `entry`.
  TrackEnded { entry: Uuid },
  /// The player could not play `entry`.
  TrackFailed { entry: Uuid, message: String },
  /// The player process of `generation` died on its own.
  PlayerExited { generation: u64 },
  /// Background stream resolution for an auto-advanced `entry` finished.
  StreamResolved {
    entry: Uuid,
    result: Result<StreamRef, ResolveError>,
  },
}

type Reply = oneshot::Sender<Result<Payload, DaemonError>>;

enum Message {
  Command { command: Command, reply: Reply },
  Event(Event),
  /// A client request arrived; resets the idle timer.
  Touch,
}

/// Cloneable sender side of the session.
#[derive(Clone)]
pub struct SessionHandle {
  tx: mpsc::Sender<Message>,
  epoch: Arc<AtomicU64>,
  in_flight: Arc<AtomicUsize>,
}

/// Receiver side, consumed by [`Session::new`].
pub struct Inbox {
  rx: mpsc::Receiver<Message>,
  in_flight: Arc<AtomicUsize>,
}

pub fn channel() -> (SessionHandle, Inbox) {
  let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
  let in_flight = Arc::new(AtomicUsize::new(0));
  let handle = SessionHandle {
    tx,
    epoch: Arc::new(AtomicU64::new(0)),
    in_flight: in_flight.clone(),
  };
  (handle, Inbox { rx, in_flight })
}

/// Marks a client request as in progress until dropped. The session does
/// not idle out while any are alive.
pub struct RequestGuard {
  in_flight: Arc<AtomicUsize>,
}

impl Drop for RequestGuard {
  fn drop(&mut self) {
    self.in_flight.fetch_sub(1, Ordering::SeqCst);
  }
}

impl Inbox {
  fn has_requests_in_flight(&self) -> bool {
    self.in_flight.load(Ordering::SeqCst) > 0
  }

  /// Next queued event, skipping anything else.
  #[cfg(test)]
  pub(crate) fn try_event(&mut self) -> Option<Event> {
    while let Ok(message) = self.rx.try_recv() {
      if let Message::Event(event) = message {
        return Some(event);
      }
    }
    None
  }
}

impl SessionHandle {
  /// Submit a command and wait for the session's answer.
  pub async fn request(&self, command: Command) -> Result<Payload, DaemonError> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Message::Command { command, reply })
      .await
      .map_err(|_| DaemonError::SessionClosed)?;
    rx.await.map_err(|_| DaemonError::SessionClosed)?
  }

  /// Inject an internal event. Dropped silently once the session is gone.
  pub async fn notify(&self, event: Event) {
    if self.tx.send(Message::Event(event)).await.is_err() {
      log::debug!("Session closed, dropping event");
    }
  }

  /// Reset the idle timer without touching playback state.
  pub async fn touch(&self) {
    let _ = self.tx.send(Message::Touch).await;
  }

  /// Hold the session open while a request resolves outside the loop.
  pub fn begin_request(&self) -> RequestGuard {
    self.in_flight.fetch_add(1, Ordering::SeqCst);
    RequestGuard {
      in_flight: self.in_flight.clone(),
    }
  }

  /// Counter bumped by every `next` and `stop`; stale resolutions compare against it.
  pub fn epoch(&self) -> u64 {
    self.epoch.load(Ordering::SeqCst)
  }

  pub(crate) fn bump_epoch(&self) -> u64 {
    self.epoch.fetch_add(1, Ordering::SeqCst) + 1
  }
}

enum Flow {
  Continue,
  Exit,
}

pub struct Session<P: Player> {
  inbox: Inbox,
  controller: PlaybackController<P>,
  idle_timeout: Duration,
}

impl<P: Player + 'static> Session<P> {
  pub fn new(inbox: Inbox, controller: PlaybackController<P>, idle_timeout: Duration) -> Self {
    Self {
      inbox,
      controller,
      idle_timeout,
    }
  }

  /// Process messages until `shutdown` fires, a `shutdown` command arrives,
  /// or Idle with an empty queue outlasts the idle timeout.
  ///
  /// Cancels `shutdown` on the way out so the rest of the daemon follows.
  pub async fn run(mut self, shutdown: CancellationToken) {
    log::info!("Session started (idle timeout {:?})", self.idle_timeout);
    let mut deadline = Instant::now() + self.idle_timeout;

    loop {
      tokio::select! {
        _ = shutdown.cancelled() => {
          log::info!("Session shutting down");
          break;
        }
        message = self.inbox.rx.recv() => {
          let Some(message) = message else { break };
          deadline = Instant::now() + self.idle_timeout;
          if let Flow::Exit = self.handle(message).await {
            break;
          }
        }
        _ = tokio::time::sleep_until(deadline) => {
          if self.controller.is_idle_and_empty() && !self.inbox.has_requests_in_flight() {
            log::info!("Idle for {:?} with an empty queue, exiting", self.idle_timeout);
            break;
          }
          deadline = Instant::now() + self.idle_timeout;
        }
      }
    }

    self.controller.shutdown().await;
    shutdown.cancel();
    log::info!("Session stopped");
  }

  async fn handle(&mut self, message: Message) -> Flow {
    match message {
      Message::Command { command, reply } => {
        log::debug!("Command: {:?}", command);
        let (result, flow) = self.dispatch(command).await;
        if let Err(e) = &result {
          log::info!("Command failed: {}", e);
        }
        let _ = reply.send(result);
        flow
      }
      Message::Event(event) => {
        log::debug!("Event: {:?}", event);
        self.controller.on_event(event).await;
        Flow::Continue
      }
      Message::Touch => Flow::Continue,
    }
  }

  async fn dispatch(&mut self, command: Command) -> (Result<Payload, DaemonError>, Flow) {
    let controller = &mut self.controller;
    let result = match command {
      Command::Play {
        track,
        stream,
        epoch,
      } => controller.play(track, stream, epoch).await.map(Payload::Status),
      Command::Enqueue { track } => {
        let queue_length = controller.enqueue(track.clone());
        Ok(Payload::Enqueued {
          track,
          queue_length,
        })
      }
      Command::QueueList => Ok(Payload::Queue {
        tracks: controller.queue_list(),
      }),
      Command::QueueRemove { index } => controller
        .queue_remove(index)
        .map(|track| Payload::Removed { track }),
      Command::Next => Ok(Payload::Status(controller.next().await)),
      Command::Pause => controller.pause().await.map(Payload::Status),
      Command::Resume => controller.resume().await.map(Payload::Status),
      Command::Status => Ok(Payload::Status(controller.status())),
      Command::Stop => Ok(Payload::Status(controller.stop().await)),
      Command::Shutdown => {
        log::info!("Shutdown requested");
        return (Ok(Payload::Ack), Flow::Exit);
      }
    };
    (result, Flow::Continue)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorKind;
  use crate::test_support::{candidate_track, FakePlayer, FakeResolver, Harness};
  use crate::types::{PlaybackState, StatusSnapshot};

  async fn status(handle: &SessionHandle) -> StatusSnapshot {
    match handle.request(Command::Status).await.unwrap() {
      Payload::Status(s) => s,
      other => panic!("Expected status, got {:?}", other),
    }
  }

  async fn queue_titles(handle: &SessionHandle) -> Vec<String> {
    match handle.request(Command::QueueList).await.unwrap() {
      Payload::Queue { tracks } => tracks.into_iter().map(|t| t.title).collect(),
      other => panic!("Expected queue, got {:?}", other),
    }
  }

  async fn enqueue(handle: &SessionHandle, title: &str) {
    handle
      .request(Command::Enqueue {
        track: candidate_track(title),
      })
      .await
      .unwrap();
  }

  async fn play(handle: &SessionHandle, title: &str) -> Result<Payload, DaemonError> {
    let epoch = handle.epoch();
    handle
      .request(Command::Play {
        track: candidate_track(title),
        stream: StreamRef::new(format!("https://stream.test/{}", title)),
        epoch,
      })
      .await
  }

  /// Poll until `pred` holds; events are processed asynchronously.
  async fn wait_for(handle: &SessionHandle, pred: impl Fn(&StatusSnapshot) -> bool) -> StatusSnapshot {
    for _ in 0..200 {
      let s = status(handle).await;
      if pred(&s) {
        return s;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
  }

  #[tokio::test]
  async fn fresh_daemon_is_idle() {
    let h = Harness::start(FakeResolver::new(), 3);
    let s = status(&h.handle).await;
    assert_eq!(s.state, PlaybackState::Idle);
    assert!(s.current.is_none());
    assert_eq!(s.queue_length, 0);
    assert!(s.last_error.is_none());
  }

  #[tokio::test]
  async fn direct_play_leaves_queue_untouched() {
    let h = Harness::start(FakeResolver::new(), 3);
    enqueue(&h.handle, "a").await;
    enqueue(&h.handle, "b").await;
    assert_eq!(queue_titles(&h.handle).await, ["a", "b"]);

    play(&h.handle, "a").await.unwrap();
    let s = status(&h.handle).await;
    assert_eq!(s.state, PlaybackState::Playing);
    assert_eq!(s.current.as_ref().map(|t| t.title.as_str()), Some("a"));
    assert_eq!(queue_titles(&h.handle).await, ["a", "b"]);
    assert_eq!(s.queue_length + 1, 3);
  }

  #[tokio::test]
  async fn next_advances_then_goes_idle() {
    let h = Harness::start(FakeResolver::new(), 3);
    play(&h.handle, "x").await.unwrap();
    enqueue(&h.handle, "b").await;

    h.handle.request(Command::Next).await.unwrap();
    let s = status(&h.handle).await;
    assert_eq!(s.state, PlaybackState::Playing);
    assert_eq!(s.current.as_ref().map(|t| t.title.as_str()), Some("b"));
    assert_eq!(s.queue_length, 0);

    h.handle.request(Command::Next).await.unwrap();
    let s = status(&h.handle).await;
    assert_eq!(s.state, PlaybackState::Idle);
    assert!(s.current.is_none());
    assert_eq!(s.queue_length, 0);
    let history: Vec<_> = s.history.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(history, ["x", "b"]);
  }

  #[tokio::test]
  async fn pause_is_idempotent() {
    let h = Harness::start(FakeResolver::new(), 3);
    play(&h.handle, "x").await.unwrap();

    h.handle.request(Command::Pause).await.unwrap();
    let first = status(&h.handle).await;
    h.handle.request(Command::Pause).await.unwrap();
    let second = status(&h.handle).await;
    assert_eq!(first.state, PlaybackState::Paused);
    assert_eq!(first, second);
    assert_eq!(h.player.calls_named("pause"), 1);

    h.handle.request(Command::Resume).await.unwrap();
    assert_eq!(status(&h.handle).await.state, PlaybackState::Playing);
  }

  #[tokio::test]
  async fn track_end_advances_to_queued_track() {
    let h = Harness::start(FakeResolver::new(), 3);
    play(&h.handle, "x").await.unwrap();
    enqueue(&h.handle, "b").await;
    let entry = status(&h.handle).await.current.unwrap().entry_id;

    h.handle.notify(Event::TrackEnded { entry }).await;
    let s = wait_for(&h.handle, |s| {
      s.current.as_ref().map(|t| t.title.as_str()) == Some("b")
    })
    .await;
    assert_eq!(s.state, PlaybackState::Playing);
    wait_for(&h.handle, |_| h.player.calls_named("load") == 2).await;
  }

  #[tokio::test]
  async fn stale_track_end_is_ignored() {
    let h = Harness::start(FakeResolver::new(), 3);
    play(&h.handle, "a").await.unwrap();
    enqueue(&h.handle, "b").await;
    enqueue(&h.handle, "c").await;
    let stale = status(&h.handle).await.current.unwrap().entry_id;

    h.handle.request(Command::Next).await.unwrap();
    let before = wait_for(&h.handle, |_| h.player.calls_named("load") == 2).await;

    h.handle.notify(Event::TrackEnded { entry: stale }).await;
    let after = status(&h.handle).await;
    assert_eq!(before, after);
    assert_eq!(after.current.as_ref().map(|t| t.title.as_str()), Some("b"));
    assert_eq!(after.queue_length, 1);
  }

  #[tokio::test]
  async fn auto_skip_is_bounded() {
    let resolver = FakeResolver::new();
    for title in ["f1", "f2", "f3", "f4"] {
      resolver.fail_stream(title);
    }
    let h = Harness::start(resolver.clone(), 3);
    play(&h.handle, "x").await.unwrap();
    for title in ["f1", "f2", "f3", "f4"] {
      enqueue(&h.handle, title).await;
    }
    let entry = status(&h.handle).await.current.unwrap().entry_id;

    h.handle.notify(Event::TrackEnded { entry }).await;
    let s = wait_for(&h.handle, |s| s.state == PlaybackState::Idle).await;

    assert_eq!(resolver.stream_attempts(), 3);
    assert!(s.current.is_none());
    assert_eq!(s.queue_length, 1);
    assert_eq!(
      s.last_error.as_ref().map(|e| e.kind),
      Some(ErrorKind::ResolverUnavailable)
    );
    // Reported once.
    assert!(status(&h.handle).await.last_error.is_none());
  }

  #[tokio::test]
  async fn failure_counter_resets_after_finished_track() {
    let resolver = FakeResolver::new();
    resolver.fail_stream("f1");
    resolver.fail_stream("f2");
    let h = Harness::start(resolver.clone(), 2);
    play(&h.handle, "x").await.unwrap();
    enqueue(&h.handle, "f1").await;
    enqueue(&h.handle, "ok").await;
    enqueue(&h.handle, "f2").await;
    let entry = status(&h.handle).await.current.unwrap().entry_id;

    h.handle.notify(Event::TrackEnded { entry }).await;
    wait_for(&h.handle, |_| h.player.calls_named("load") == 2).await;
    let s = status(&h.handle).await;
    assert_eq!(s.current.as_ref().map(|t| t.title.as_str()), Some("ok"));
    assert_eq!(s.queue_length, 1);

    // "ok" finishing clears the f1 failure, so f2 alone stays under the cap.
    let entry = s.current.unwrap().entry_id;
    h.handle.notify(Event::TrackEnded { entry }).await;
    let s = wait_for(&h.handle, |s| s.state == PlaybackState::Idle).await;
    assert_eq!(
      s.last_error.map(|e| e.kind),
      Some(ErrorKind::ResolutionFailed)
    );
  }

  #[tokio::test]
  async fn player_failures_count_toward_skip_cap() {
    let h = Harness::start(FakeResolver::new(), 3);
    play(&h.handle, "x").await.unwrap();
    for title in ["a", "b", "c"] {
      enqueue(&h.handle, title).await;
    }

    for loads in 1..=3 {
      let s = wait_for(&h.handle, |_| h.player.calls_named("load") == loads).await;
      let entry = s.current.unwrap().entry_id;
      h.handle
        .notify(Event::TrackFailed {
          entry,
          message: "demuxer error".to_string(),
        })
        .await;
    }

    let s = wait_for(&h.handle, |s| s.state == PlaybackState::Idle).await;
    assert!(s.current.is_none());
    assert_eq!(s.queue_length, 1);
    assert_eq!(
      s.last_error.map(|e| e.kind),
      Some(ErrorKind::ResolverUnavailable)
    );
    assert_eq!(h.player.calls_named("load"), 3);
  }

  #[tokio::test]
  async fn next_after_pause_plays_audibly() {
    let h = Harness::start(FakeResolver::new(), 3);
    play(&h.handle, "x").await.unwrap();
    h.handle.request(Command::Pause).await.unwrap();
    enqueue(&h.handle, "b").await;

    h.handle.request(Command::Next).await.unwrap();
    let s = wait_for(&h.handle, |_| h.player.calls_named("resume") == 1).await;
    assert_eq!(s.state, PlaybackState::Playing);
    assert_eq!(h.player.calls_named("load"), 2);
    assert_eq!(h.player.calls_named("pause"), 1);
  }

  #[tokio::test]
  async fn play_after_next_is_superseded() {
    let h = Harness::start(FakeResolver::new(), 3);
    let epoch = h.handle.epoch();
    h.handle.request(Command::Next).await.unwrap();

    let err = h
      .handle
      .request(Command::Play {
        track: candidate_track("late"),
        stream: StreamRef::new("https://stream.test/late"),
        epoch,
      })
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Superseded);
    assert!(status(&h.handle).await.current.is_none());
  }

  #[tokio::test]
  async fn play_resolved_before_stop_is_superseded() {
    let h = Harness::start(FakeResolver::new(), 3);
    enqueue(&h.handle, "b").await;
    let epoch = h.handle.epoch();
    h.handle.request(Command::Stop).await.unwrap();

    let err = h
      .handle
      .request(Command::Play {
        track: candidate_track("late"),
        stream: StreamRef::new("https://stream.test/late"),
        epoch,
      })
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Superseded);
    let s = status(&h.handle).await;
    assert_eq!(s.state, PlaybackState::Idle);
    assert_eq!(s.queue_length, 1);
    assert_eq!(h.player.calls_named("load"), 0);
  }

  #[tokio::test]
  async fn stream_resolved_after_stop_is_discarded() {
    let resolver = FakeResolver::new();
    resolver.delay_streams(Duration::from_millis(100));
    let h = Harness::start(resolver.clone(), 3);
    play(&h.handle, "x").await.unwrap();
    enqueue(&h.handle, "b").await;
    let entry = status(&h.handle).await.current.unwrap().entry_id;

    h.handle.notify(Event::TrackEnded { entry }).await;
    wait_for(&h.handle, |_| resolver.stream_attempts() == 1).await;
    h.handle.request(Command::Stop).await.unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    let s = status(&h.handle).await;
    assert_eq!(s.state, PlaybackState::Idle);
    assert!(s.current.is_none());
    assert_eq!(h.player.calls_named("load"), 1);
  }

  #[tokio::test]
  async fn stream_resolved_after_direct_play_is_discarded() {
    let resolver = FakeResolver::new();
    resolver.delay_streams(Duration::from_millis(100));
    let h = Harness::start(resolver.clone(), 3);
    play(&h.handle, "x").await.unwrap();
    enqueue(&h.handle, "b").await;
    let entry = status(&h.handle).await.current.unwrap().entry_id;

    h.handle.notify(Event::TrackEnded { entry }).await;
    wait_for(&h.handle, |_| resolver.stream_attempts() == 1).await;
    play(&h.handle, "y").await.unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    let s = status(&h.handle).await;
    assert_eq!(s.current.as_ref().map(|t| t.title.as_str()), Some("y"));
    assert_eq!(s.state, PlaybackState::Playing);
    assert_eq!(h.player.calls_named("load"), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn request_in_flight_holds_idle_timeout() {
    let (handle, inbox) = channel();
    let controller =
      PlaybackController::new(FakePlayer::new(), Arc::new(FakeResolver::new()), handle.clone(), 3, 10);
    let token = CancellationToken::new();
    let session = Session::new(inbox, controller, Duration::from_secs(30));
    let task = tokio::spawn(session.run(token.clone()));

    let request = handle.begin_request();
    handle.touch().await;
    tokio::time::sleep(Duration::from_secs(90)).await;
    assert!(!token.is_cancelled());

    drop(request);
    tokio::time::sleep(Duration::from_secs(31)).await;
    task.await.unwrap();
    assert!(token.is_cancelled());
  }

  #[tokio::test]
  async fn player_crash_forces_idle() {
    let h = Harness::start(FakeResolver::new(), 3);
    play(&h.handle, "x").await.unwrap();
    enqueue(&h.handle, "b").await;

    h.handle
      .notify(Event::PlayerExited {
        generation: h.player.generation_now(),
      })
      .await;
    let s = status(&h.handle).await;
    assert_eq!(s.state, PlaybackState::Idle);
    assert!(s.current.is_none());
    assert_eq!(s.queue_length, 1);
    assert_eq!(
      s.last_error.map(|e| e.kind),
      Some(ErrorKind::ExternalPlayerError)
    );
  }

  #[tokio::test]
  async fn stop_terminates_player_and_keeps_queue() {
    let h = Harness::start(FakeResolver::new(), 3);
    play(&h.handle, "x").await.unwrap();
    enqueue(&h.handle, "b").await;

    h.handle.request(Command::Stop).await.unwrap();
    let s = status(&h.handle).await;
    assert_eq!(s.state, PlaybackState::Idle);
    assert!(s.current.is_none());
    assert_eq!(s.queue_length, 1);
    assert_eq!(h.player.calls_named("terminate"), 1);
  }

  #[tokio::test]
  async fn queue_remove_out_of_range_is_not_found() {
    let h = Harness::start(FakeResolver::new(), 3);
    enqueue(&h.handle, "a").await;
    let err = h
      .handle
      .request(Command::QueueRemove { index: 1 })
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(queue_titles(&h.handle).await, ["a"]);
  }

  #[tokio::test]
  async fn tracked_count_matches_queue_plus_current() {
    let h = Harness::start(FakeResolver::new(), 3);
    for title in ["a", "b", "c"] {
      enqueue(&h.handle, title).await;
    }
    h.handle.request(Command::Next).await.unwrap();
    let s = status(&h.handle).await;
    let current = s.current.clone().unwrap();
    assert_eq!(s.queue_length + 1, 3);

    match h.handle.request(Command::QueueList).await.unwrap() {
      Payload::Queue { tracks } => {
        assert!(tracks.iter().all(|t| t.entry_id != current.entry_id));
        assert_eq!(tracks.len(), s.queue_length);
      }
      other => panic!("Expected queue, got {:?}", other),
    }
  }

  #[tokio::test(start_paused = true)]
  async fn idle_timeout_ends_session() {
    let (handle, inbox) = channel();
    let player = FakePlayer::new();
    let controller = PlaybackController::new(player, Arc::new(FakeResolver::new()), handle.clone(), 3, 10);
    let token = CancellationToken::new();
    let session = Session::new(inbox, controller, Duration::from_secs(30));
    let task = tokio::spawn(session.run(token.clone()));

    tokio::time::sleep(Duration::from_secs(31)).await;
    task.await.unwrap();
    assert!(token.is_cancelled());
    assert!(matches!(
      handle.request(Command::Status).await,
      Err(DaemonError::SessionClosed)
    ));
  }

  #[tokio::test]
  async fn shutdown_command_ends_session() {
    let h = Harness::start(FakeResolver::new(), 3);
    assert!(matches!(
      h.handle.request(Command::Shutdown).await,
      Ok(Payload::Ack)
    ));
    h.token.cancelled().await;
  }
}
