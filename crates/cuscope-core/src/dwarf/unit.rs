//! Unit headers, compile units and the unit iterator.

use std::sync::Arc;

use gimli::{DwTag, DwUt, RunTimeEndian};
use tracing::{debug, warn};

use super::abbrev::AbbreviationTable;
use super::die::{decode_die, read_raw_entry, DecodeContext, Die, DieTree};
use super::form::{AttrValue, RawValue};
use super::ranges::{resolve_range_list, resolve_rnglist, rnglistx_offset};
use super::DwarfInfo;
use crate::error::{DwarfError, DwarfResult, UnitError};
use crate::reader::{ByteRegion, Cursor};
use crate::types::{Address, AddressSize, ResolvedRange};

/// 32- or 64-bit DWARF, selected by the unit's initial length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DwarfFormat
{
    Dwarf32,
    Dwarf64,
}

impl DwarfFormat
{
    /// Width of section offsets in this format
    pub const fn offset_size(self) -> u8
    {
        match self {
            DwarfFormat::Dwarf32 => 4,
            DwarfFormat::Dwarf64 => 8,
        }
    }
}

/// Parameters that decide how a unit's values are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding
{
    pub endian: RunTimeEndian,
    pub format: DwarfFormat,
    pub version: u16,
    pub address_size: AddressSize,
}

/// A decoded unit header from `.debug_info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitHeader
{
    /// Offset of the header in `.debug_info`
    pub offset: usize,
    /// Length of the unit, not counting the initial length field
    pub unit_length: u64,
    pub format: DwarfFormat,
    pub version: u16,
    /// `DW_UT_compile` for units before version 5
    pub unit_type: DwUt,
    pub abbrev_offset: u64,
    pub address_size: AddressSize,
    /// Offset of the first DIE
    pub entries_offset: usize,
    /// Offset just past the unit
    pub end_offset: usize,
    pub dwo_id: Option<u64>,
    pub type_signature: Option<u64>,
    pub type_offset: Option<u64>,
}

fn header_truncated(offset: usize) -> impl Fn(DwarfError) -> DwarfError
{
    move |_| DwarfError::MalformedUnitHeader {
        offset,
        reason: "header runs past the end of the unit".to_string(),
    }
}

impl UnitHeader
{
    /// Decode the header at `offset` in `.debug_info`
    ///
    /// ## Errors
    ///
    /// - `TruncatedUnit` if the unit claims more bytes than remain
    /// - `UnsupportedVersion` for versions outside 2..=5
    /// - `UnsupportedAddressSize` for address sizes other than 4 or 8
    /// - `MalformedUnitHeader` for reserved lengths, unknown unit types or a
    ///   header that does not fit inside its own unit
    pub fn parse(info: &ByteRegion, offset: usize, endian: RunTimeEndian) -> DwarfResult<Self>
    {
        let remaining = info.len().saturating_sub(offset);
        let truncated = |claimed: u64, remaining: usize| DwarfError::TruncatedUnit {
            offset,
            claimed,
            remaining,
        };

        let mut cursor = info.cursor(offset);
        let initial = cursor
            .read_uint(4, endian)
            .map_err(|_| truncated(4, remaining))?;

        let (format, unit_length) = match initial {
            0xffff_ffff => {
                let length = cursor
                    .read_uint(8, endian)
                    .map_err(|_| truncated(12, remaining))?;
                (DwarfFormat::Dwarf64, length)
            }
            0xffff_fff0..=0xffff_fffe => {
                return Err(DwarfError::MalformedUnitHeader {
                    offset,
                    reason: format!("reserved initial length 0x{initial:x}"),
                });
            }
            length => (DwarfFormat::Dwarf32, length),
        };

        let body_offset = cursor.position();
        let body_len = info.len() - body_offset;
        let end_offset = match usize::try_from(unit_length) {
            Ok(len) if len <= body_len => body_offset + len,
            _ => return Err(truncated(unit_length, body_len)),
        };

        // Header fields are read from the unit's own bytes only.
        let unit = info.sub_region(0, end_offset)?;
        let mut cursor = unit.cursor(body_offset);
        let bad = header_truncated(offset);

        let version = cursor.read_u16(endian).map_err(&bad)?;
        if !(2..=5).contains(&version) {
            return Err(DwarfError::UnsupportedVersion { version, offset });
        }

        let offset_size = format.offset_size();
        let mut dwo_id = None;
        let mut type_signature = None;
        let mut type_offset = None;

        let (unit_type, abbrev_offset, address_size) = if version >= 5 {
            let unit_type = DwUt(cursor.read_u8().map_err(&bad)?);
            let address_size = cursor.read_u8().map_err(&bad)?;
            let abbrev_offset = cursor.read_uint(offset_size, endian).map_err(&bad)?;
            match unit_type {
                gimli::DW_UT_compile | gimli::DW_UT_partial => {}
                gimli::DW_UT_skeleton | gimli::DW_UT_split_compile => {
                    dwo_id = Some(cursor.read_uint(8, endian).map_err(&bad)?);
                }
                gimli::DW_UT_type | gimli::DW_UT_split_type => {
                    type_signature = Some(cursor.read_uint(8, endian).map_err(&bad)?);
                    type_offset = Some(cursor.read_uint(offset_size, endian).map_err(&bad)?);
                }
                other => {
                    return Err(DwarfError::MalformedUnitHeader {
                        offset,
                        reason: format!("unknown unit type {other}"),
                    });
                }
            }
            (unit_type, abbrev_offset, address_size)
        } else {
            let abbrev_offset = cursor.read_uint(offset_size, endian).map_err(&bad)?;
            let address_size = cursor.read_u8().map_err(&bad)?;
            (gimli::DW_UT_compile, abbrev_offset, address_size)
        };

        Ok(Self {
            offset,
            unit_length,
            format,
            version,
            unit_type,
            abbrev_offset,
            address_size: AddressSize::new(address_size, offset)?,
            entries_offset: cursor.position(),
            end_offset,
            dwo_id,
            type_signature,
            type_offset,
        })
    }

    pub fn encoding(&self, endian: RunTimeEndian) -> Encoding
    {
        Encoding {
            endian,
            format: self.format,
            version: self.version,
            address_size: self.address_size,
        }
    }
}

/// Base values read from a unit's top-level DIE
///
/// These anchor the indexed forms of DWARF 5 and the relative entries of
/// range lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitBases
{
    /// `DW_AT_low_pc`: the initial base address for range lists
    pub low_pc: Option<Address>,
    /// `DW_AT_addr_base`
    pub addr_base: Option<u64>,
    /// `DW_AT_str_offsets_base`
    pub str_offsets_base: Option<u64>,
    /// `DW_AT_rnglists_base`
    pub rnglists_base: Option<u64>,
}

fn raw_offset(value: Option<&RawValue>) -> Option<u64>
{
    match value {
        Some(RawValue::Value(AttrValue::SectionOffset(value) | AttrValue::Unsigned(value))) => Some(*value),
        _ => None,
    }
}

/// A compile unit with its header, abbreviations and top-level DIE
///
/// Only the top-level DIE is decoded up front; [`CompileUnit::entries`]
/// decodes the full tree on demand.
pub struct CompileUnit<'dwarf>
{
    dwarf: &'dwarf DwarfInfo,
    header: UnitHeader,
    abbrevs: Arc<AbbreviationTable>,
    bases: UnitBases,
    top: DieTree,
    region: ByteRegion,
}

impl<'dwarf> CompileUnit<'dwarf>
{
    /// Resolve a unit's abbreviation table and decode its top-level DIE
    ///
    /// ## Errors
    ///
    /// `MissingSection` if `.debug_abbrev` is absent, and any error from
    /// loading the table or decoding the entry.
    pub fn new(dwarf: &'dwarf DwarfInfo, header: UnitHeader) -> DwarfResult<Self>
    {
        let sections = dwarf.sections();
        let abbrev_section = sections
            .abbrev
            .as_ref()
            .ok_or(DwarfError::MissingSection(".debug_abbrev"))?;
        let abbrev_offset = usize::try_from(header.abbrev_offset).map_err(|_| DwarfError::OutOfBounds {
            offset: usize::MAX,
            len: 1,
            region_len: abbrev_section.len(),
        })?;
        let abbrevs = dwarf.abbrev_cache().get_or_load(abbrev_section, abbrev_offset)?;
        let region = sections.info.sub_region(0, header.end_offset)?;

        let mut ctx = DecodeContext {
            region: &region,
            abbrevs: &abbrevs,
            encoding: header.encoding(dwarf.endian()),
            sections,
            bases: UnitBases::default(),
            unit_offset: header.offset,
        };

        let mut cursor: Cursor<'_> = region.cursor(header.entries_offset);
        let raw = read_raw_entry(&ctx, &mut cursor)?.ok_or_else(|| DwarfError::MalformedDie {
            offset: header.entries_offset,
            reason: "unit has no top-level DIE".to_string(),
        })?;

        // The *_base attributes must be known before indexed values resolve.
        ctx.bases = UnitBases {
            low_pc: None,
            addr_base: raw_offset(raw.raw_value(gimli::DW_AT_addr_base)),
            str_offsets_base: raw_offset(raw.raw_value(gimli::DW_AT_str_offsets_base)),
            rnglists_base: raw_offset(raw.raw_value(gimli::DW_AT_rnglists_base)),
        };
        let die = raw.resolve(&ctx)?;

        let mut bases = ctx.bases;
        bases.low_pc = die.attr_value(gimli::DW_AT_low_pc).and_then(AttrValue::as_address);

        let top = DieTree::from_root(die);

        Ok(Self {
            dwarf,
            header,
            abbrevs,
            bases,
            top,
            region,
        })
    }

    fn decode_context(&self) -> DecodeContext<'_>
    {
        DecodeContext {
            region: &self.region,
            abbrevs: &self.abbrevs,
            encoding: self.encoding(),
            sections: self.dwarf.sections(),
            bases: self.bases,
            unit_offset: self.header.offset,
        }
    }

    /// Offset of the unit header in `.debug_info`
    pub fn offset(&self) -> usize
    {
        self.header.offset
    }

    pub fn header(&self) -> &UnitHeader
    {
        &self.header
    }

    pub fn version(&self) -> u16
    {
        self.header.version
    }

    pub fn address_size(&self) -> AddressSize
    {
        self.header.address_size
    }

    pub fn encoding(&self) -> Encoding
    {
        self.header.encoding(self.dwarf.endian())
    }

    pub fn abbreviations(&self) -> &Arc<AbbreviationTable>
    {
        &self.abbrevs
    }

    pub fn bases(&self) -> &UnitBases
    {
        &self.bases
    }

    pub fn top_die(&self) -> &Die
    {
        self.top.root_die()
    }

    pub fn tag(&self) -> DwTag
    {
        self.top_die().tag()
    }

    pub fn name(&self) -> Option<&str>
    {
        self.top_die().name()
    }

    pub fn comp_dir(&self) -> Option<&str>
    {
        self.top_die()
            .attr_value(gimli::DW_AT_comp_dir)
            .and_then(AttrValue::as_str)
    }

    /// Path of the unit, or `<unit 0x…>` when it has no name
    pub fn full_path(&self) -> String
    {
        self.top
            .full_path(self.top.root())
            .unwrap_or_else(|| format!("<unit 0x{:x}>", self.header.offset))
    }

    /// Base address for range lists: `DW_AT_low_pc`, or zero
    pub fn base_address(&self) -> Address
    {
        self.bases.low_pc.unwrap_or(Address::ZERO)
    }

    /// Decode the unit's full DIE tree
    ///
    /// ## Errors
    ///
    /// Any error from [`decode_die`].
    pub fn entries(&self) -> DwarfResult<DieTree>
    {
        decode_die(&self.decode_context(), self.header.entries_offset).map(|(tree, _)| tree)
    }

    /// Resolve the unit's `DW_AT_ranges` list
    ///
    /// Returns `Ok(None)` when the top-level DIE has no `DW_AT_ranges`.
    /// Version 2–4 units read `.debug_ranges`; version 5 units read
    /// `.debug_rnglists`, through the offsets table for `DW_FORM_rnglistx`.
    ///
    /// ## Errors
    ///
    /// `MissingSection` when the range section is absent, `MissingUnitBase`
    /// for an index without `DW_AT_rnglists_base`, and any range list error.
    pub fn ranges(&self) -> DwarfResult<Option<Vec<ResolvedRange>>>
    {
        let Some(value) = self.top_die().attr_value(gimli::DW_AT_ranges) else {
            return Ok(None);
        };
        let sections = self.dwarf.sections();
        let encoding = self.encoding();
        let not_an_offset = || DwarfError::MalformedDie {
            offset: self.header.entries_offset,
            reason: format!("DW_AT_ranges has unusable value {value}"),
        };

        if self.header.version <= 4 {
            let region = sections
                .ranges
                .as_ref()
                .ok_or(DwarfError::MissingSection(".debug_ranges"))?;
            let offset = value.as_section_offset().ok_or_else(not_an_offset)?;
            let offset = section_position(offset, region)?;
            return resolve_range_list(
                region,
                offset,
                encoding.address_size,
                encoding.endian,
                self.base_address(),
            )
            .map(Some);
        }

        let region = sections
            .rnglists
            .as_ref()
            .ok_or(DwarfError::MissingSection(".debug_rnglists"))?;
        let offset = match value {
            AttrValue::RangeListIndex(index) => {
                let base = self.bases.rnglists_base.ok_or(DwarfError::MissingUnitBase {
                    offset: self.header.offset,
                    attribute: "DW_AT_rnglists_base",
                })?;
                rnglistx_offset(region, base, *index, &encoding)?
            }
            other => section_position(other.as_section_offset().ok_or_else(not_an_offset)?, region)?,
        };

        resolve_rnglist(region, offset, &encoding, self.base_address(), |index| {
            sections.indexed_address(index, &self.bases, &encoding, self.header.offset)
        })
        .map(Some)
    }
}

/// Convert a section offset read from DWARF data into a position
pub(crate) fn section_position(offset: u64, region: &ByteRegion) -> DwarfResult<usize>
{
    usize::try_from(offset).map_err(|_| DwarfError::OutOfBounds {
        offset: usize::MAX,
        len: 1,
        region_len: region.len(),
    })
}

/// Iterator over the units of `.debug_info`
///
/// A unit whose header decodes but whose abbreviations or top-level DIE do
/// not is yielded as an error and iteration moves on to the next header. A
/// header that cannot be decoded ends iteration, since the next unit's
/// position is unknown.
pub struct UnitIter<'dwarf>
{
    dwarf: &'dwarf DwarfInfo,
    offset: usize,
    done: bool,
}

impl<'dwarf> UnitIter<'dwarf>
{
    pub(crate) fn new(dwarf: &'dwarf DwarfInfo) -> Self
    {
        Self {
            dwarf,
            offset: 0,
            done: false,
        }
    }
}

impl<'dwarf> Iterator for UnitIter<'dwarf>
{
    type Item = Result<CompileUnit<'dwarf>, UnitError>;

    fn next(&mut self) -> Option<Self::Item>
    {
        let info = &self.dwarf.sections().info;
        if self.done || self.offset >= info.len() {
            return None;
        }

        let offset = self.offset;
        let header = match UnitHeader::parse(info, offset, self.dwarf.endian()) {
            Ok(header) => header,
            Err(err) => {
                warn!(offset, error = %err, "stopping unit iteration at undecodable header");
                self.done = true;
                return Some(Err(UnitError::new(offset, err)));
            }
        };
        self.offset = header.end_offset;

        debug!(
            offset,
            version = header.version,
            address_size = header.address_size.bytes(),
            "decoded unit header"
        );

        Some(CompileUnit::new(self.dwarf, header).map_err(|err| {
            warn!(offset, error = %err, "failed to decode unit");
            UnitError::new(offset, err)
        }))
    }
}
