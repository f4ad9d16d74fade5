//! # Error Types
//!
//! Error handling for container parsing and DWARF decoding.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use thiserror::Error;

/// Errors raised while decoding DWARF data
///
/// Every variant carries the section offset at which decoding stopped so a
/// report can point at the offending bytes.
///
/// ## Error Categories
///
/// 1. **Primitive errors**: OutOfBounds, Leb128Overflow
/// 2. **Abbreviation errors**: MalformedAbbrevTable
/// 3. **Entry errors**: UnknownAbbrevCode, UnsupportedForm, MalformedDie, UnterminatedChildren
/// 4. **Unit errors**: TruncatedUnit, MalformedUnitHeader, UnsupportedVersion, UnsupportedAddressSize,
///    MissingUnitBase
/// 5. **Range list errors**: UnterminatedRangeList, UnknownRangeListEntry, InvertedRange
/// 6. **Section errors**: MissingSection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DwarfError
{
    /// A read would run past the end of its region
    ///
    /// Region boundaries are authoritative: this is raised even when the
    /// underlying buffer holds more bytes.
    #[error("Read of {len} byte(s) at offset 0x{offset:x} exceeds region of {region_len} byte(s)")]
    OutOfBounds
    {
        offset: usize,
        len: usize,
        region_len: usize,
    },

    /// A LEB128 value carries more than 64 bits of payload
    #[error("LEB128 value at offset 0x{0:x} overflows 64 bits")]
    Leb128Overflow(usize),

    /// An abbreviation table could not be decoded
    #[error("Malformed abbreviation table at offset 0x{offset:x}: {reason}")]
    MalformedAbbrevTable
    {
        offset: usize,
        reason: String,
    },

    /// An entry uses an abbreviation code its table does not define
    #[error("Unknown abbreviation code {code} at offset 0x{offset:x}")]
    UnknownAbbrevCode
    {
        code: u64,
        offset: usize,
    },

    /// An attribute uses a form the decoder does not understand
    ///
    /// Decoding fails closed here; the size of an unknown form cannot be
    /// guessed without corrupting every following attribute.
    #[error("Unsupported attribute form 0x{form:x} at offset 0x{offset:x}")]
    UnsupportedForm
    {
        form: u64,
        offset: usize,
    },

    /// An entry is structurally invalid (for example a repeated attribute)
    #[error("Malformed DIE at offset 0x{offset:x}: {reason}")]
    MalformedDie
    {
        offset: usize,
        reason: String,
    },

    /// The unit ended while a children list was still open
    #[error("Children of DIE at offset 0x{0:x} are not terminated before the end of the unit")]
    UnterminatedChildren(usize),

    /// A unit header claims more bytes than remain in the section
    #[error("Unit at offset 0x{offset:x} claims {claimed} byte(s) but only {remaining} remain")]
    TruncatedUnit
    {
        offset: usize,
        claimed: u64,
        remaining: usize,
    },

    /// A unit header could not be decoded
    #[error("Malformed unit header at offset 0x{offset:x}: {reason}")]
    MalformedUnitHeader
    {
        offset: usize,
        reason: String,
    },

    /// A unit declares a DWARF version outside 2..=5
    #[error("Unsupported DWARF version {version} in unit at offset 0x{offset:x}")]
    UnsupportedVersion
    {
        version: u16,
        offset: usize,
    },

    /// A unit declares an address size other than 4 or 8 bytes
    #[error("Unsupported address size {size} in unit at offset 0x{offset:x}")]
    UnsupportedAddressSize
    {
        size: u8,
        offset: usize,
    },

    /// An indexed form was used but the unit declares no matching base
    #[error("Unit at offset 0x{offset:x} uses an indexed form without {attribute}")]
    MissingUnitBase
    {
        offset: usize,
        attribute: &'static str,
    },

    /// A range list reaches the end of its section without an end-of-list entry
    #[error("Range list at offset 0x{0:x} is not terminated")]
    UnterminatedRangeList(usize),

    /// A DWARF 5 range list entry kind is not recognised
    #[error("Unknown range list entry kind 0x{kind:x} at offset 0x{offset:x}")]
    UnknownRangeListEntry
    {
        kind: u8,
        offset: usize,
    },

    /// A resolved range ends before it begins
    #[error("Range list at offset 0x{offset:x} yields inverted range 0x{begin:x}..0x{end:x}")]
    InvertedRange
    {
        offset: usize,
        begin: u64,
        end: u64,
    },

    /// A section needed to resolve a value is not present in the container
    #[error("Section {0} is not present")]
    MissingSection(&'static str),
}

/// A decoding error attributed to one compile unit
///
/// The unit enumerator and the reporter isolate failures per unit; this
/// carries the unit's header offset alongside the underlying error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unit at offset 0x{unit_offset:x}: {source}")]
pub struct UnitError
{
    pub unit_offset: usize,
    #[source]
    pub source: DwarfError,
}

impl UnitError
{
    pub fn new(unit_offset: usize, source: DwarfError) -> Self
    {
        Self { unit_offset, source }
    }
}

impl From<UnitError> for DwarfError
{
    fn from(err: UnitError) -> Self
    {
        err.source
    }
}

/// Top-level error type for cuscope operations
#[derive(Error, Debug)]
pub enum CuscopeError
{
    /// The input is not an object file we can read
    ///
    /// Raised when the magic number or header is not recognised, or the
    /// section table cannot be parsed.
    #[error("Invalid container: {0}")]
    InvalidContainer(String),

    /// DWARF decoding failed
    #[error("DWARF error: {0}")]
    Dwarf(#[from] DwarfError),

    /// A compile unit could not be decoded
    #[error("{0}")]
    Unit(#[from] UnitError),

    /// I/O error (for file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, DwarfError>`
pub type DwarfResult<T> = std::result::Result<T, DwarfError>;

/// Convenience type alias for `Result<T, CuscopeError>`
///
/// ```rust
/// use cuscope_core::error::CuscopeResult;
/// fn foo() -> CuscopeResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type CuscopeResult<T> = std::result::Result<T, CuscopeError>;
