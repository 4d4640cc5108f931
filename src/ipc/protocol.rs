//! Client/daemon wire types. Newline-delimited JSON, one object per line.
//!
//! String parsing of requests happens here and nowhere else; everything past
//! [`ClientCommand::decode`] works with typed commands.

use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, ErrorReport};
use crate::types::{Candidate, StatusSnapshot, Track};

/// Raw request as sent on the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
  pub verb: String,
  #[serde(default)]
  pub args: Vec<String>,
  #[serde(default)]
  pub index: Option<i64>,
}

/// What `select` does with the chosen search result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectAction {
  Play,
  QueueAdd,
}

impl SelectAction {
  fn as_str(self) -> &'static str {
    match self {
      SelectAction::Play => "play",
      SelectAction::QueueAdd => "queue-add",
    }
  }
}

/// Decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
  Play { query: String },
  Search { query: String },
  Select { index: usize, action: SelectAction },
  QueueAdd { query: String },
  QueueList,
  QueueRemove { index: usize },
  Next,
  Pause,
  Resume,
  Status,
  Stop,
  Shutdown,
}

impl ClientCommand {
  /// Parse one request line. Any failure is a protocol error.
  pub fn decode(line: &str) -> Result<Self, DaemonError> {
    let request: Request = serde_json::from_str(line)
      .map_err(|e| DaemonError::Protocol(format!("invalid JSON request: {}", e)))?;
    Self::from_request(request)
  }

  pub fn from_request(request: Request) -> Result<Self, DaemonError> {
    let Request { verb, args, index } = request;
    let command = match verb.as_str() {
      "play" => ClientCommand::Play {
        query: query(&verb, &args)?,
      },
      "search" => ClientCommand::Search {
        query: query(&verb, &args)?,
      },
      "queue-add" => ClientCommand::QueueAdd {
        query: query(&verb, &args)?,
      },
      "select" => {
        let action = match args.first().map(String::as_str) {
          None | Some("play") => SelectAction::Play,
          Some("queue-add") => SelectAction::QueueAdd,
          Some(other) => {
            return Err(DaemonError::Protocol(format!(
              "select action must be 'play' or 'queue-add', got '{}'",
              other
            )))
          }
        };
        ClientCommand::Select {
          index: required_index(&verb, index)?,
          action,
        }
      }
      "queue-remove" => ClientCommand::QueueRemove {
        index: required_index(&verb, index)?,
      },
      "queue-list" => ClientCommand::QueueList,
      "next" => ClientCommand::Next,
      "pause" => ClientCommand::Pause,
      "resume" => ClientCommand::Resume,
      "status" => ClientCommand::Status,
      "stop" => ClientCommand::Stop,
      "shutdown" => ClientCommand::Shutdown,
      other => return Err(DaemonError::Protocol(format!("unknown verb '{}'", other))),
    };
    Ok(command)
  }

  pub fn to_request(&self) -> Request {
    let (verb, args, index) = match self {
      ClientCommand::Play { query } => ("play", vec![query.clone()], None),
      ClientCommand::Search { query } => ("search", vec![query.clone()], None),
      ClientCommand::Select { index, action } => {
        ("select", vec![action.as_str().to_string()], Some(*index))
      }
      ClientCommand::QueueAdd { query } => ("queue-add", vec![query.clone()], None),
      ClientCommand::QueueList => ("queue-list", Vec::new(), None),
      ClientCommand::QueueRemove { index } => ("queue-remove", Vec::new(), Some(*index)),
      ClientCommand::Next => ("next", Vec::new(), None),
      ClientCommand::Pause => ("pause", Vec::new(), None),
      ClientCommand::Resume => ("resume", Vec::new(), None),
      ClientCommand::Status => ("status", Vec::new(), None),
      ClientCommand::Stop => ("stop", Vec::new(), None),
      ClientCommand::Shutdown => ("shutdown", Vec::new(), None),
    };
    Request {
      verb: verb.to_string(),
      args,
      index: index.map(|i| i as i64),
    }
  }
}

fn query(verb: &str, args: &[String]) -> Result<String, DaemonError> {
  let query = args.join(" ").trim().to_string();
  if query.is_empty() {
    return Err(DaemonError::Protocol(format!("'{}' needs a query", verb)));
  }
  Ok(query)
}

fn required_index(verb: &str, index: Option<i64>) -> Result<usize, DaemonError> {
  let index = index.ok_or_else(|| DaemonError::Protocol(format!("'{}' needs an index", verb)))?;
  usize::try_from(index)
    .map_err(|_| DaemonError::Protocol(format!("'{}' index must not be negative", verb)))
}

/// Verb-specific response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Payload {
  Ack,
  Status(StatusSnapshot),
  Candidates {
    tracks: Vec<Candidate>,
  },
  Queue {
    tracks: Vec<Track>,
  },
  #[serde(rename_all = "camelCase")]
  Enqueued {
    track: Track,
    queue_length: usize,
  },
  Removed {
    track: Track,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
  Ok { payload: Payload },
  Error { error: ErrorReport },
}

impl Response {
  pub fn from_result(result: Result<Payload, DaemonError>) -> Self {
    match result {
      Ok(payload) => Response::Ok { payload },
      Err(e) => Response::Error { error: e.report() },
    }
  }

  pub fn into_result(self) -> Result<Payload, DaemonError> {
    match self {
      Response::Ok { payload } => Ok(payload),
      Response::Error { error } => Err(DaemonError::Remote(error)),
    }
  }
}
