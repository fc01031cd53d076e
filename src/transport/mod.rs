//! H-UDP - Transport Layer
//!
//! Thin tokio wrapper around the single UDP socket both channels share.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Session                    │
//! ├─────────────────────────────────────────┤
//! │   reliable (SR)  │  unreliable          │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! ├─────────────────────────────────────────┤
//! │              UDP                        │
//! └─────────────────────────────────────────┘
//! ```

mod socket;

pub use socket::*;
