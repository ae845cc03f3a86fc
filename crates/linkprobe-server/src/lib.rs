//! linkprobe-server
//!
//! Echo server for the probe client, serving TCP and UDP on the same
//! address, with idempotent shutdown and handler drain.

pub mod config;
pub mod echo;
pub mod server;
pub mod types;

pub use echo::EchoHandler;
pub use server::Server;
pub use types::{Handler, ListenerId, ServerError, ServerState};
