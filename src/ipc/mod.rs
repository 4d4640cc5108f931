//! Client/daemon IPC over a Unix domain socket.
//!
//! - `protocol.rs` - request decoding, payload and response types
//! - `server.rs` - acceptor and per-connection handling
//! - `client.rs` - connection used by the CLI

mod client;
mod protocol;
mod server;

pub use client::DaemonClient;
pub use protocol::{ClientCommand, Payload, Request, Response, SelectAction};
pub use server::IpcServer;
