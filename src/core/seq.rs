//! Sequence-number arithmetic over the 16-bit wraparound space.
//!
//! Raw integer comparison is wrong once numbers wrap, so every ordering and
//! window-membership check in the protocol goes through [`SeqNum`].

use std::fmt;

use serde::{Deserialize, Serialize};

use super::constants::SEQ_SPACE;

/// Half of the sequence space; the ordering horizon for [`SeqNum::precedes`].
const HALF_SPACE: u16 = (SEQ_SPACE / 2) as u16;

/// A sequence number modulo 2^16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeqNum(u16);

impl SeqNum {
    /// The first sequence number used by every channel.
    pub const ZERO: Self = Self(0);

    /// Create a sequence number from its raw value.
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw 16-bit value.
    pub const fn get(self) -> u16 {
        self.0
    }

    /// The following sequence number (wraps at 2^16).
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Advance by `n` (wraps at 2^16).
    pub const fn add(self, n: u16) -> Self {
        Self(self.0.wrapping_add(n))
    }

    /// Forward distance from `base` to `self`, in `0..2^16`.
    pub const fn distance_from(self, base: SeqNum) -> u16 {
        self.0.wrapping_sub(base.0)
    }

    /// `true` if `self` comes strictly before `other`.
    ///
    /// Only meaningful when the two numbers are less than half the space
    /// apart, which every window in the protocol guarantees.
    pub const fn precedes(self, other: SeqNum) -> bool {
        let d = other.distance_from(self);
        d != 0 && d < HALF_SPACE
    }

    /// `true` if `self` lies in `[base, base + len)`.
    pub const fn is_within(self, base: SeqNum, len: u16) -> bool {
        self.distance_from(base) < len
    }
}

impl From<u16> for SeqNum {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<SeqNum> for u16 {
    fn from(seq: SeqNum) -> Self {
        seq.0
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
