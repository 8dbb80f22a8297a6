//! Network Layer: dispatcher, protocol connection, transport
//!
//! - `dispatch`: handler registry + per-message algorithm
//! - `connection`: state machine per peer, tanpa I/O
//! - `transport`: buffered non-blocking socket I/O
//! - `server`: mio event loop di atas Unix socket

mod connection;
mod dispatch;
mod server;
mod transport;

pub use connection::{Connection, ConnectionState};
pub use dispatch::{Callback, Ctx, Dispatcher, Message};
pub use server::{Server, SetupHook};
pub use transport::Transport;
