//! # cuscope-core
//!
//! DWARF decoding primitives and range-size reporting for cuscope.
//!
//! This crate provides everything between an object file on disk and the
//! per-unit range report, including:
//! - Container parsing and debug section discovery
//! - Bounds-checked primitive reads (fixed-width, LEB128, C strings)
//! - Abbreviation tables, DIE trees and unit enumeration
//! - `.debug_ranges` and `.debug_rnglists` resolution
//! - The range-size reporter and its output sinks
//!
//! ## Format Support
//!
//! - **Containers**: ELF, Mach-O and anything else the `object` crate reads
//! - **DWARF**: versions 2 through 5, 32- and 64-bit formats
//!
//! Decoding never trusts lengths or offsets from the file: every read is
//! checked against the region it was issued on and reported as an error.

pub mod container;
pub mod dwarf;
pub mod error;
pub mod prelude;
pub mod reader;
pub mod report;
pub mod types;

pub use container::Container;
// Re-export commonly used types
pub use dwarf::{CompileUnit, DwarfInfo};
pub use error::{CuscopeError, CuscopeResult, DwarfError, DwarfResult, UnitError};
pub use report::{RangeSizeReporter, ReportOptions, ReportSink};
pub use types::{Address, AddressSize, ResolvedRange};
