//! Unix socket acceptor and per-connection request handling.
//!
//! Connections are served concurrently. Resolution (search, stream lookup)
//! runs here, outside the session, so a slow lookup never blocks other
//! clients; only the final state change goes through [`SessionHandle`].
//! Every request resets the idle timer on arrival and keeps the session
//! from idling out until it is answered.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::protocol::{ClientCommand, Payload, Response, SelectAction};
use crate::error::DaemonError;
use crate::resolver::{resolve_first, TrackResolver};
use crate::session::{Command, SessionHandle};
use crate::types::{Candidate, Track};

pub struct IpcServer {
  listener: UnixListener,
  session: SessionHandle,
  resolver: Arc<dyn TrackResolver>,
  search_limit: usize,
}

impl IpcServer {
  pub fn new(
    listener: UnixListener,
    session: SessionHandle,
    resolver: Arc<dyn TrackResolver>,
    search_limit: usize,
  ) -> Self {
    Self {
      listener,
      session,
      resolver,
      search_limit,
    }
  }

  /// Accept until `shutdown` fires. Open connections are closed with it.
  pub async fn run(self, shutdown: CancellationToken) {
    log::info!("IPC server accepting connections");
    loop {
      tokio::select! {
        _ = shutdown.cancelled() => break,
        accepted = self.listener.accept() => match accepted {
          Ok((stream, _)) => {
            let connection = Connection {
              id: Uuid::new_v4(),
              session: self.session.clone(),
              resolver: self.resolver.clone(),
              search_limit: self.search_limit,
              results: Vec::new(),
            };
            tokio::spawn(connection.serve(stream, shutdown.clone()));
          }
          Err(e) => log::warn!("IPC accept error: {}", e),
        }
      }
    }
    log::info!("IPC server stopped");
  }
}

/// One client connection. Search results live exactly as long as it does.
struct Connection {
  id: Uuid,
  session: SessionHandle,
  resolver: Arc<dyn TrackResolver>,
  search_limit: usize,
  results: Vec<Candidate>,
}

impl Connection {
  async fn serve(mut self, stream: UnixStream, shutdown: CancellationToken) {
    log::debug!("Connection {} opened", self.id);
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
      buf.clear();
      let read = tokio::select! {
        _ = shutdown.cancelled() => break,
        read = reader.read_until(b'\n', &mut buf) => read,
      };
      match read {
        Ok(0) => break,
        Ok(_) => {}
        Err(e) => {
          log::debug!("Connection {} read error: {}", self.id, e);
          break;
        }
      }

      // Bytes are decoded here so bad UTF-8 gets an answer like any other
      // malformed request.
      let command = match std::str::from_utf8(&buf) {
        Ok(line) if line.trim().is_empty() => continue,
        Ok(line) => ClientCommand::decode(line),
        Err(e) => Err(DaemonError::Protocol(format!(
          "request is not valid UTF-8: {}",
          e
        ))),
      };

      let _request = self.session.begin_request();
      self.session.touch().await;

      let result = match command {
        Ok(command) => {
          log::debug!("Connection {}: {:?}", self.id, command);
          self.execute(command).await
        }
        Err(e) => {
          log::warn!("Connection {}: {}", self.id, e);
          Err(e)
        }
      };

      let response = Response::from_result(result);
      if let Err(e) = write_response(&mut writer, &response).await {
        log::debug!("Connection {} write error: {}", self.id, e);
        break;
      }
    }
    log::debug!("Connection {} closed", self.id);
  }

  async fn execute(&mut self, command: ClientCommand) -> Result<Payload, DaemonError> {
    match command {
      ClientCommand::Play { query } => {
        let epoch = self.session.epoch();
        let candidate = resolve_first(self.resolver.as_ref(), &query).await?;
        self.play(candidate, epoch).await
      }
      ClientCommand::Search { query } => {
        let tracks = self.resolver.resolve_search(&query, self.search_limit).await?;
        self.results = tracks.clone();
        Ok(Payload::Candidates { tracks })
      }
      ClientCommand::Select { index, action } => {
        let epoch = self.session.epoch();
        let candidate = self.results.get(index).cloned().ok_or_else(|| {
          DaemonError::NotFound(format!(
            "no search result #{} in this session ({} available)",
            index,
            self.results.len()
          ))
        })?;
        match action {
          SelectAction::Play => self.play(candidate, epoch).await,
          SelectAction::QueueAdd => self.enqueue(candidate).await,
        }
      }
      ClientCommand::QueueAdd { query } => {
        let candidate = resolve_first(self.resolver.as_ref(), &query).await?;
        self.enqueue(candidate).await
      }
      ClientCommand::QueueList => self.session.request(Command::QueueList).await,
      ClientCommand::QueueRemove { index } => {
        self.session.request(Command::QueueRemove { index }).await
      }
      ClientCommand::Next => self.session.request(Command::Next).await,
      ClientCommand::Pause => self.session.request(Command::Pause).await,
      ClientCommand::Resume => self.session.request(Command::Resume).await,
      ClientCommand::Status => self.session.request(Command::Status).await,
      ClientCommand::Stop => self.session.request(Command::Stop).await,
      ClientCommand::Shutdown => self.session.request(Command::Shutdown).await,
    }
  }

  async fn play(&self, candidate: Candidate, epoch: u64) -> Result<Payload, DaemonError> {
    let stream = self.resolver.resolve_stream(&candidate.id).await?;
    let track = Track::from_candidate(candidate);
    self
      .session
      .request(Command::Play {
        track,
        stream,
        epoch,
      })
      .await
  }

  async fn enqueue(&self, candidate: Candidate) -> Result<Payload, DaemonError> {
    let track = Track::from_candidate(candidate);
    self.session.request(Command::Enqueue { track }).await
  }
}

async fn write_response<W: tokio::io::AsyncWrite + Unpin>(
  writer: &mut W,
  response: &Response,
) -> std::io::Result<()> {
  let mut line = serde_json::to_vec(response)?;
  line.push(b'\n');
  writer.write_all(&line).await?;
  writer.flush().await
}
