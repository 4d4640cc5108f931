//! mpv JSON IPC protocol types.
//!
//! Reference: https://mpv.io/manual/master/#json-ipc

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

static REQUEST_ID: AtomicI64 = AtomicI64::new(1);

pub fn next_request_id() -> i64 {
  REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// Command sent to mpv via IPC.
#[derive(Debug, Clone, Serialize)]
pub struct MpvCommand {
  pub command: Vec<serde_json::Value>,
  pub request_id: i64,
}

impl MpvCommand {
  pub fn new(args: Vec<serde_json::Value>) -> Self {
    Self {
      command: args,
      request_id: next_request_id(),
    }
  }

  /// Replace whatever is loaded with `url`.
  pub fn loadfile(url: &str) -> Self {
    Self::new(vec!["loadfile".into(), url.into(), "replace".into()])
  }

  /// Unload the current file; the process keeps idling.
  pub fn stop() -> Self {
    Self::new(vec!["stop".into()])
  }

  pub fn set_pause(paused: bool) -> Self {
    Self::new(vec!["set_property".into(), "pause".into(), paused.into()])
  }

  pub fn quit() -> Self {
    Self::new(vec!["quit".into()])
  }
}

/// Response from mpv for a command.
#[derive(Debug, Clone, Deserialize)]
pub struct MpvResponse {
  /// "success" or error message.
  pub error: String,
  pub data: Option<serde_json::Value>,
  pub request_id: i64,
}

impl MpvResponse {
  pub fn is_success(&self) -> bool {
    self.error == "success"
  }

  /// Playlist entry created by `loadfile` (mpv 0.34+).
  pub fn playlist_entry_id(&self) -> Option<i64> {
    self
      .data
      .as_ref()
      .and_then(|d| d.get("playlist_entry_id"))
      .and_then(|v| v.as_i64())
  }
}

/// Unsolicited event from mpv.
#[derive(Debug, Clone, Deserialize)]
pub struct MpvEvent {
  /// Event type (e.g. "end-file", "start-file", "idle").
  pub event: String,
  /// Reason for end-file events ("eof", "stop", "quit", "error", "redirect").
  pub reason: Option<String>,
  pub playlist_entry_id: Option<i64>,
  /// Error text for end-file events with reason "error".
  pub file_error: Option<String>,
}

/// How a loaded file stopped playing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
  /// Played to the end.
  Eof,
  /// Failed to play; carries mpv's error text.
  Error(String),
  /// Replaced, stopped or quit by us.
  Interrupted,
}

impl MpvEvent {
  /// `Some((entry, reason))` for end-file events.
  pub fn end_of_file(&self) -> Option<(i64, EndReason)> {
    if self.event != "end-file" {
      return None;
    }
    let entry = self.playlist_entry_id?;
    let reason = match self.reason.as_deref() {
      Some("eof") => EndReason::Eof,
      Some("error") => EndReason::Error(
        self
          .file_error
          .clone()
          .unwrap_or_else(|| "unknown error".to_string()),
      ),
      _ => EndReason::Interrupted,
    };
    Some((entry, reason))
  }
}

/// Message received from mpv IPC (either response or event).
#[derive(Debug, Clone)]
pub enum MpvMessage {
  Response(MpvResponse),
  Event(MpvEvent),
}

impl MpvMessage {
  /// Parse one JSON line from mpv.
  pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    if value.get("request_id").is_some() && value.get("event").is_none() {
      Ok(MpvMessage::Response(serde_json::from_value(value)?))
    } else {
      Ok(MpvMessage::Event(serde_json::from_value(value)?))
    }
  }
}
