//! # DWARF Decoding
//!
//! Unit enumeration, DIE trees and range lists over the debug sections of one
//! container.
//!
//! A [`DwarfInfo`] is the decoding session for one file: it owns the section
//! views and the abbreviation cache, and is shared by every unit it yields.
//!
//! ## Example
//!
//! ```rust,no_run
//! use cuscope_core::container::Container;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let container = Container::from_path("/path/to/binary")?;
//! let dwarf = container.dwarf()?;
//! for unit in dwarf.units() {
//!     let unit = unit?;
//!     if let Some(ranges) = unit.ranges()? {
//!         println!("{} covers {} range(s)", unit.full_path(), ranges.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod abbrev;
pub mod die;
pub mod form;
pub mod ranges;
pub mod unit;

use gimli::RunTimeEndian;

pub use abbrev::{AbbrevCache, Abbreviation, AbbreviationTable, AttributeSpec};
pub use die::{decode_die, decode_entry, DecodeContext, Die, DieId, DieTree};
pub use form::{AttrValue, AttributeValue, Form};
pub use unit::{CompileUnit, DwarfFormat, Encoding, UnitBases, UnitHeader, UnitIter};

use crate::error::{DwarfError, DwarfResult};
use crate::reader::ByteRegion;
use crate::types::Address;

/// The debug sections a decoding session reads
///
/// Only `.debug_info` is required. The others are looked up when a form or a
/// range attribute needs them; their absence is `MissingSection` at that
/// point.
#[derive(Debug, Clone)]
pub struct DwarfSections
{
    pub info: ByteRegion,
    pub abbrev: Option<ByteRegion>,
    pub str: Option<ByteRegion>,
    pub line_str: Option<ByteRegion>,
    pub str_offsets: Option<ByteRegion>,
    pub addr: Option<ByteRegion>,
    pub ranges: Option<ByteRegion>,
    pub rnglists: Option<ByteRegion>,
}

fn require<'a>(section: Option<&'a ByteRegion>, name: &'static str) -> DwarfResult<&'a ByteRegion>
{
    section.ok_or(DwarfError::MissingSection(name))
}

/// Position of element `index` in a table of `width`-byte entries at `base`
fn table_position(region: &ByteRegion, base: u64, index: u64, width: u8) -> DwarfResult<usize>
{
    index
        .checked_mul(u64::from(width))
        .and_then(|delta| base.checked_add(delta))
        .and_then(|position| usize::try_from(position).ok())
        .ok_or(DwarfError::OutOfBounds {
            offset: usize::MAX,
            len: usize::from(width),
            region_len: region.len(),
        })
}

impl DwarfSections
{
    /// A section set with only `.debug_info`
    pub fn new(info: ByteRegion) -> Self
    {
        Self {
            info,
            abbrev: None,
            str: None,
            line_str: None,
            str_offsets: None,
            addr: None,
            ranges: None,
            rnglists: None,
        }
    }

    fn cstring_at(region: &ByteRegion, offset: u64) -> DwarfResult<String>
    {
        let offset = unit::section_position(offset, region)?;
        let (bytes, _) = region.read_cstring(offset)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// The string at `offset` in `.debug_str`
    ///
    /// ## Errors
    ///
    /// `MissingSection` or `OutOfBounds`.
    pub fn string_at(&self, offset: u64) -> DwarfResult<String>
    {
        Self::cstring_at(require(self.str.as_ref(), ".debug_str")?, offset)
    }

    /// The string at `offset` in `.debug_line_str`
    ///
    /// ## Errors
    ///
    /// `MissingSection` or `OutOfBounds`.
    pub fn line_string_at(&self, offset: u64) -> DwarfResult<String>
    {
        Self::cstring_at(require(self.line_str.as_ref(), ".debug_line_str")?, offset)
    }

    /// Resolve a `strx` index through `.debug_str_offsets`
    ///
    /// ## Errors
    ///
    /// `MissingUnitBase` without `DW_AT_str_offsets_base`, `MissingSection`
    /// or `OutOfBounds`.
    pub fn indexed_string(&self, index: u64, bases: &UnitBases, encoding: &Encoding, unit_offset: usize) -> DwarfResult<String>
    {
        let base = bases.str_offsets_base.ok_or(DwarfError::MissingUnitBase {
            offset: unit_offset,
            attribute: "DW_AT_str_offsets_base",
        })?;
        let offsets = require(self.str_offsets.as_ref(), ".debug_str_offsets")?;
        let width = encoding.format.offset_size();
        let position = table_position(offsets, base, index, width)?;
        let (offset, _) = offsets.read_uint(position, width, encoding.endian)?;
        self.string_at(offset)
    }

    /// Resolve an `addrx` index through `.debug_addr`
    ///
    /// ## Errors
    ///
    /// `MissingUnitBase` without `DW_AT_addr_base`, `MissingSection` or
    /// `OutOfBounds`.
    pub fn indexed_address(&self, index: u64, bases: &UnitBases, encoding: &Encoding, unit_offset: usize) -> DwarfResult<Address>
    {
        let base = bases.addr_base.ok_or(DwarfError::MissingUnitBase {
            offset: unit_offset,
            attribute: "DW_AT_addr_base",
        })?;
        let addresses = require(self.addr.as_ref(), ".debug_addr")?;
        let width = encoding.address_size.bytes();
        let position = table_position(addresses, base, index, width)?;
        let (address, _) = addresses.read_uint(position, width, encoding.endian)?;
        Ok(Address::from(address))
    }
}

/// Decoding session for the DWARF data of one container
///
/// ## Thread Safety
///
/// Section views are immutable and the abbreviation cache is internally
/// locked, so a `DwarfInfo` is `Send + Sync`.
#[derive(Debug)]
pub struct DwarfInfo
{
    sections: DwarfSections,
    endian: RunTimeEndian,
    abbrev_cache: AbbrevCache,
}

impl DwarfInfo
{
    pub fn new(sections: DwarfSections, endian: RunTimeEndian) -> Self
    {
        Self {
            sections,
            endian,
            abbrev_cache: AbbrevCache::new(),
        }
    }

    /// Iterate the units of `.debug_info` from the start
    ///
    /// Each call returns a fresh iterator; abbreviation tables decoded by
    /// earlier passes stay cached.
    pub fn units(&self) -> UnitIter<'_>
    {
        UnitIter::new(self)
    }

    pub fn endian(&self) -> RunTimeEndian
    {
        self.endian
    }

    pub fn sections(&self) -> &DwarfSections
    {
        &self.sections
    }

    pub fn abbrev_cache(&self) -> &AbbrevCache
    {
        &self.abbrev_cache
    }

    /// Returns true if either range list section is present
    pub fn has_range_sections(&self) -> bool
    {
        self.sections.ranges.is_some() || self.sections.rnglists.is_some()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::types::AddressSize;

    fn encoding() -> Encoding
    {
        Encoding {
            endian: RunTimeEndian::Little,
            format: DwarfFormat::Dwarf32,
            version: 5,
            address_size: AddressSize::EIGHT,
        }
    }

    #[test]
    fn test_indexed_string_goes_through_offsets_table()
    {
        let mut sections = DwarfSections::new(ByteRegion::empty());
        sections.str = Some(ByteRegion::from_vec(b"main.c\0util.c\0".to_vec()));
        let mut offsets = vec![0u8; 8];
        offsets.extend_from_slice(&0u32.to_le_bytes());
        offsets.extend_from_slice(&7u32.to_le_bytes());
        sections.str_offsets = Some(ByteRegion::from_vec(offsets));

        let bases = UnitBases {
            str_offsets_base: Some(8),
            ..UnitBases::default()
        };
        assert_eq!(sections.indexed_string(1, &bases, &encoding(), 0).unwrap(), "util.c");
        assert_eq!(
            sections.indexed_string(0, &UnitBases::default(), &encoding(), 0x40),
            Err(DwarfError::MissingUnitBase {
                offset: 0x40,
                attribute: "DW_AT_str_offsets_base",
            })
        );
    }

    #[test]
    fn test_indexed_address_requires_section()
    {
        let sections = DwarfSections::new(ByteRegion::empty());
        let bases = UnitBases {
            addr_base: Some(8),
            ..UnitBases::default()
        };
        assert_eq!(
            sections.indexed_address(0, &bases, &encoding(), 0),
            Err(DwarfError::MissingSection(".debug_addr"))
        );
    }

    #[test]
    fn test_units_on_empty_info_yields_nothing()
    {
        let dwarf = DwarfInfo::new(DwarfSections::new(ByteRegion::empty()), RunTimeEndian::Little);
        assert_eq!(dwarf.units().count(), 0);
        assert!(!dwarf.has_range_sections());
    }
}
