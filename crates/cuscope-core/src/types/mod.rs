//! # Types
//!
//! Target-agnostic value types shared by the decoders.
//!
//! Endianness is not wrapped here: decoders take `gimli::RunTimeEndian`
//! directly, the same value the container reports.

pub mod address;
pub mod range;

// Re-export all public types
pub use address::{Address, AddressSize};
pub use range::{range_size, RangeEntry, ResolvedRange};
