//! linkprobe-client
//!
//! Connection-quality probing: keeps a connection to an echo server open,
//! sends a numbered probe every interval and matches the echoes against
//! what was sent to measure latency and detect loss.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;

pub use engine::{EngineConfig, ProbeEngine};
pub use error::EngineError;
pub use events::{ProbeEvent, ProbeObserver, TracingObserver};
