//! linkprobe-core
//!
//! Pure probe logic:
//! - messages exchanged between the probe client and the echo server
//! - expectations (sent probes awaiting their echo)
//! - FIFO reconciliation of echoed responses against expectations

pub mod message;
pub mod expectation;

pub use message::{Message, Probe};
pub use expectation::{Expectation, ExpectationQueue, Matched, Reconciliation};
