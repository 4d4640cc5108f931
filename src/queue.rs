//! Ordered FIFO of pending tracks.

use std::collections::VecDeque;

use crate::error::DaemonError;
use crate::types::Track;

/// Pending tracks. Never holds the current track.
#[derive(Debug, Default)]
pub struct TrackQueue {
  items: VecDeque<Track>,
}

impl TrackQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append to the tail, returning the new length.
  pub fn enqueue(&mut self, track: Track) -> usize {
    self.items.push_back(track);
    self.items.len()
  }

  pub fn dequeue_next(&mut self) -> Option<Track> {
    self.items.pop_front()
  }

  /// Ordered snapshot.
  pub fn list(&self) -> Vec<Track> {
    self.items.iter().cloned().collect()
  }

  pub fn remove(&mut self, index: usize) -> Result<Track, DaemonError> {
    let len = self.items.len();
    self.items.remove(index).ok_or_else(|| {
      DaemonError::NotFound(format!(
        "queue index {} out of range (queue has {} tracks)",
        index, len
      ))
    })
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}
