//! H-UDP - Core types, constants, and errors.
//!
//! This module provides the foundational pieces shared by every layer of the
//! protocol. It has no runtime dependencies and is always built.

mod constants;
mod error;
mod seq;

pub use constants::*;
pub use error::*;
pub use seq::*;
