//! Async JSON IPC connection to mpv over its Unix socket.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::protocol::{MpvCommand, MpvEvent, MpvMessage, MpvResponse};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum IpcError {
  #[error("Connection failed: {0}")]
  ConnectionFailed(String),
  #[error("Write failed: {0}")]
  WriteFailed(#[from] std::io::Error),
  #[error("Command timeout")]
  Timeout,
  #[error("Disconnected")]
  Disconnected,
}

type PendingRequest = oneshot::Sender<MpvResponse>;
type PendingMap = Arc<Mutex<HashMap<i64, PendingRequest>>>;

/// Connection to a running mpv.
///
/// The event channel closes when mpv closes the socket, which is how a
/// crashed or killed player is noticed.
pub struct MpvIpc {
  pending: PendingMap,
  write_tx: Sender<Vec<u8>>,
  event_rx: Receiver<MpvEvent>,
  reader: JoinHandle<()>,
  writer: JoinHandle<()>,
}

impl MpvIpc {
  /// Connect, retrying with a linear backoff while mpv creates the socket.
  pub async fn connect(path: &Path, retry_count: u32) -> Result<Self, IpcError> {
    let mut last_error = None;

    for attempt in 0..retry_count {
      if attempt > 0 {
        tokio::time::sleep(Duration::from_millis(100 * (attempt as u64 + 1))).await;
      }

      match UnixStream::connect(path).await {
        Ok(stream) => return Ok(Self::setup(stream)),
        Err(e) => {
          log::debug!("mpv IPC connect attempt {} failed: {}", attempt + 1, e);
          last_error = Some(e);
        }
      }
    }

    Err(IpcError::ConnectionFailed(
      last_error.map_or_else(|| "no attempts made".to_string(), |e| e.to_string()),
    ))
  }

  fn setup(stream: UnixStream) -> Self {
    let (reader, writer) = stream.into_split();
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (event_tx, event_rx) = async_channel::unbounded();
    let (write_tx, write_rx) = async_channel::unbounded::<Vec<u8>>();

    let reader = tokio::spawn(Self::reader_loop(reader, pending.clone(), event_tx));
    let writer = tokio::spawn(Self::writer_loop(writer, write_rx));

    Self {
      pending,
      write_tx,
      event_rx,
      reader,
      writer,
    }
  }

  async fn reader_loop<R: tokio::io::AsyncRead + Unpin>(
    reader: R,
    pending: PendingMap,
    event_tx: Sender<MpvEvent>,
  ) {
    let mut lines = BufReader::new(reader).lines();

    loop {
      match lines.next_line().await {
        Ok(Some(line)) => {
          let trimmed = line.trim();
          if trimmed.is_empty() {
            continue;
          }
          match MpvMessage::parse(trimmed) {
            Ok(MpvMessage::Response(response)) => {
              if let Some(tx) = pending.lock().remove(&response.request_id) {
                let _ = tx.send(response);
              }
            }
            Ok(MpvMessage::Event(event)) => {
              log::debug!("mpv event: {:?}", event);
              if event_tx.send(event).await.is_err() {
                break;
              }
            }
            Err(e) => log::warn!("Failed to parse mpv message: {} - {}", e, trimmed),
          }
        }
        Ok(None) => {
          log::info!("mpv IPC connection closed");
          break;
        }
        Err(e) => {
          log::error!("mpv IPC read error: {}", e);
          break;
        }
      }
    }
    // Fail outstanding requests fast instead of waiting for their timeout.
    pending.lock().clear();
  }

  async fn writer_loop<W: tokio::io::AsyncWrite + Unpin>(mut writer: W, write_rx: Receiver<Vec<u8>>) {
    while let Ok(mut line) = write_rx.recv().await {
      line.push(b'\n');
      if let Err(e) = writer.write_all(&line).await {
        log::error!("mpv IPC write error: {}", e);
        break;
      }
      if let Err(e) = writer.flush().await {
        log::error!("mpv IPC flush error: {}", e);
        break;
      }
    }
  }

  /// Send a command and wait for its response.
  pub async fn send_command(&self, cmd: MpvCommand) -> Result<MpvResponse, IpcError> {
    let request_id = cmd.request_id;
    let (tx, rx) = oneshot::channel();
    self.pending.lock().insert(request_id, tx);

    let json = serde_json::to_vec(&cmd).map_err(|e| IpcError::WriteFailed(e.into()))?;
    log::debug!("Sending mpv command: {}", String::from_utf8_lossy(&json));

    if self.write_tx.send(json).await.is_err() {
      self.pending.lock().remove(&request_id);
      return Err(IpcError::Disconnected);
    }

    match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
      Ok(Ok(response)) => Ok(response),
      Ok(Err(_)) => Err(IpcError::Disconnected),
      Err(_) => {
        log::error!("mpv command timed out, request_id={}", request_id);
        self.pending.lock().remove(&request_id);
        Err(IpcError::Timeout)
      }
    }
  }

  pub fn events(&self) -> Receiver<MpvEvent> {
    self.event_rx.clone()
  }

  /// Stop the writer and reader tasks.
  pub fn close(&self) {
    self.write_tx.close();
    self.reader.abort();
  }
}

impl Drop for MpvIpc {
  fn drop(&mut self) {
    self.write_tx.close();
    self.reader.abort();
    self.writer.abort();
  }
}
