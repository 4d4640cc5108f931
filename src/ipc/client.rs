//! Client side of the daemon socket.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use super::protocol::{ClientCommand, Payload, Response};
use crate::error::DaemonError;

/// A connection to the daemon. Requests on one client share a session,
/// so `select` can follow `search`.
pub struct DaemonClient {
  lines: Lines<BufReader<OwnedReadHalf>>,
  writer: OwnedWriteHalf,
}

impl DaemonClient {
  pub async fn connect(path: &Path) -> Result<Self, DaemonError> {
    let stream = UnixStream::connect(path).await.map_err(|e| {
      DaemonError::NotFound(format!("daemon unreachable at {}: {}", path.display(), e))
    })?;
    let (reader, writer) = stream.into_split();
    Ok(Self {
      lines: BufReader::new(reader).lines(),
      writer,
    })
  }

  pub async fn send(&mut self, command: &ClientCommand) -> Result<Payload, DaemonError> {
    let mut line = serde_json::to_vec(&command.to_request())
      .map_err(|e| DaemonError::Protocol(e.to_string()))?;
    line.push(b'\n');
    self.writer.write_all(&line).await?;
    self.writer.flush().await?;

    let reply = self.lines.next_line().await?.ok_or_else(|| {
      DaemonError::NotFound("daemon closed the connection".to_string())
    })?;
    let response: Response = serde_json::from_str(&reply)
      .map_err(|e| DaemonError::Protocol(format!("invalid response: {}", e)))?;
    response.into_result()
  }
}
