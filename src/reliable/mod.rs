//! Reliable channel: Selective Repeat ARQ.
//!
//! The sender retransmits only packets whose individual timers expire; the
//! receiver buffers out-of-order arrivals and acknowledges each frame
//! separately. Neither side performs I/O.

mod receiver;
mod sender;
mod window;

pub use receiver::{Disposition, ReceiveOutcome, ReceiverConfig, SkipOutcome, SrReceiver};
pub use sender::{AckOutcome, SenderConfig, SrSender, TimeoutEvent};
pub use window::SlotRing;
