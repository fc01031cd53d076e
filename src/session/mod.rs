//! H-UDP - Session
//!
//! High-level API: one socket multiplexing the reliable and unreliable
//! channels for a sender or a receiver.

mod config;
#[allow(clippy::module_inception)]
mod session;

pub use config::*;
pub use session::*;
