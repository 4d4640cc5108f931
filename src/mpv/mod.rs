//! mpv backend - spawns and controls an external mpv via JSON IPC.
//!
//! Architecture:
//! - `process.rs` - mpv binary detection and process spawning
//! - `ipc.rs` - async Unix socket connection with request/response matching
//! - `protocol.rs` - JSON command/response/event types
//! - `client.rs` - process + connection owner with command methods

mod client;
mod ipc;
mod process;
mod protocol;

pub use client::{MpvClient, MpvError};
pub use protocol::{EndReason, MpvEvent};
