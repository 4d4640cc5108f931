//! `musicd`: a background music daemon driven by short-lived CLI clients.
//!
//! The daemon owns a FIFO queue and one external player (mpv). Clients talk
//! to it over a Unix socket; every state change is serialized through
//! [`session::Session`].

pub mod config;
pub mod error;
pub mod ipc;
pub mod lifecycle;
mod mpv;
pub mod playback;
pub mod player;
pub mod queue;
pub mod resolver;
pub mod session;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::DaemonConfig;
pub use error::{DaemonError, ErrorKind, ErrorReport};
pub use types::{Candidate, PlaybackState, StatusSnapshot, Track};

use tracing_subscriber::EnvFilter;

/// Install the global log subscriber. `RUST_LOG` overrides `default_filter`.
///
/// Library code logs through the `log` facade; the subscriber picks those
/// records up through its `tracing-log` bridge.
pub fn init_logging(default_filter: &str) {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(false)
    .try_init();
}
