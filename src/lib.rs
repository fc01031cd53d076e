//! # H-UDP
//!
//! A dual-channel transport over a single UDP socket:
//!
//! - **Reliable channel**: Selective Repeat ARQ with per-packet
//!   retransmission timers, out-of-order buffering and a bounded-latency
//!   skip for gaps that never fill
//! - **Unreliable channel**: fire-and-forget datagrams for ephemeral state
//!
//! Both channels share one socket and one wire format; a one-byte tag on
//! every datagram tells them apart.
//!
//! ## Feature Flags
//!
//! - `session` (default): tokio socket wrapper and the [`Session`] multiplexer
//!
//! Without `session` the crate is a sans-IO protocol engine: the state
//! machines in [`reliable`] and [`unreliable`] take the current time and
//! hand back datagrams to write and payloads to deliver.
//!
//! ## Modules
//!
//! - [`core`]: Constants, sequence numbers and error types (always included)
//! - [`frame`]: Wire codec
//! - [`reliable`]: Selective Repeat sender and receiver
//! - [`unreliable`]: Unreliable sender and receiver
//! - [`tracking`]: Sent/received packet logs and delivery statistics
//! - [`transport`]: Async UDP socket (requires `session` feature)
//! - [`session`]: Session API (requires `session` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::Instant;
//! use hudp::prelude::*;
//!
//! let mut tx = SrSender::default();
//! let mut rx = SrReceiver::default();
//! let now = Instant::now();
//!
//! let transmit = tx.submit(b"hello".to_vec(), now).unwrap();
//! let Frame::Data(frame) = decode(&transmit.datagram).unwrap() else {
//!     unreachable!()
//! };
//!
//! let outcome = rx.on_frame(frame, now);
//! assert_eq!(outcome.delivered[0].payload, b"hello");
//!
//! let ack = outcome.ack.unwrap();
//! assert!(matches!(tx.on_ack(ack.seq, now), AckOutcome::Acked { .. }));
//! assert!(tx.is_idle());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

pub mod delivery;
pub mod frame;
pub mod reliable;
pub mod timing;
pub mod tracking;
pub mod unreliable;

// Transport layer (feature-gated)
#[cfg(feature = "session")]
#[cfg_attr(docsrs, doc(cfg(feature = "session")))]
pub mod transport;

// Session API (feature-gated)
#[cfg(feature = "session")]
#[cfg_attr(docsrs, doc(cfg(feature = "session")))]
pub mod session;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::delivery::{Delivered, Transmit};
    pub use crate::frame::{AckFrame, Channel, ChannelType, DataFrame, Frame, decode, encode};
    pub use crate::reliable::{
        AckOutcome, Disposition, ReceiveOutcome, ReceiverConfig, SenderConfig, SkipOutcome,
        SrReceiver, SrSender, TimeoutEvent,
    };
    pub use crate::tracking::{ChannelStats, DeliveryStats};
    pub use crate::unreliable::{UnreliableReceiver, UnreliableSender};

    #[cfg(feature = "session")]
    pub use crate::session::{Role, Session, SessionConfig, SessionConfigBuilder, WindowFullPolicy};
    #[cfg(feature = "session")]
    pub use crate::transport::{HudpSocket, HudpSocketBuilder};
}

// Re-export commonly used items at crate root
pub use crate::core::{DecodeError, EncodeError, HudpError, HudpResult, SeqNum};
pub use crate::delivery::Delivered;
pub use crate::frame::Channel;

#[cfg(feature = "session")]
pub use crate::session::{Role, Session, SessionConfig, WindowFullPolicy};
