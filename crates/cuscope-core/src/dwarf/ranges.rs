//! Range list decoding for `.debug_ranges` and `.debug_rnglists`.
//!
//! Decoding produces [`RangeEntry`] values; resolution walks them with a
//! running base address and yields absolute [`ResolvedRange`]s.

use gimli::{DwRle, RunTimeEndian};
use tracing::trace;

use super::unit::{section_position, Encoding};
use crate::error::{DwarfError, DwarfResult};
use crate::reader::ByteRegion;
use crate::types::{Address, AddressSize, RangeEntry, ResolvedRange};

fn check_start(region: &ByteRegion, offset: usize, len: usize) -> DwarfResult<()>
{
    if offset >= region.len() {
        return Err(DwarfError::OutOfBounds {
            offset,
            len,
            region_len: region.len(),
        });
    }
    Ok(())
}

/// Running out of bytes inside a list means the terminator is missing
fn unterminated(list_offset: usize) -> impl Fn(DwarfError) -> DwarfError
{
    move |err| match err {
        DwarfError::OutOfBounds { .. } => DwarfError::UnterminatedRangeList(list_offset),
        other => other,
    }
}

/// Decode the `.debug_ranges` list at `offset`
///
/// Entries are pairs of address-sized values. A pair whose first value is
/// all-ones selects a new base address (the second value); `(0, 0)` ends
/// the list. The terminator is included in the result.
///
/// ## Errors
///
/// `OutOfBounds` if `offset` is not inside the region, and
/// `UnterminatedRangeList` if the region ends before the terminator.
pub fn decode_range_list(
    region: &ByteRegion,
    offset: usize,
    address_size: AddressSize,
    endian: RunTimeEndian,
) -> DwarfResult<Vec<RangeEntry>>
{
    let width = address_size.bytes();
    check_start(region, offset, usize::from(width) * 2)?;

    let to_unterminated = unterminated(offset);
    let mut cursor = region.cursor(offset);
    let mut entries = Vec::new();

    loop {
        let first = cursor.read_uint(width, endian).map_err(&to_unterminated)?;
        let second = cursor.read_uint(width, endian).map_err(&to_unterminated)?;

        let entry = if first == address_size.max_value() {
            RangeEntry::BaseAddressSelection(Address::from(second))
        } else if first == 0 && second == 0 {
            RangeEntry::EndOfList
        } else {
            RangeEntry::Range {
                low: first,
                high: second,
            }
        };

        entries.push(entry);
        if entry == RangeEntry::EndOfList {
            return Ok(entries);
        }
    }
}

/// Decode the DWARF 5 `.debug_rnglists` list at `offset`
///
/// `address_at` resolves a `.debug_addr` index for the `*x` entry kinds.
///
/// ## Errors
///
/// `OutOfBounds` if `offset` is not inside the region,
/// `UnterminatedRangeList` if the region ends before `DW_RLE_end_of_list`,
/// `UnknownRangeListEntry` for unrecognised kinds, and any error from
/// `address_at`.
pub fn decode_rnglist(
    region: &ByteRegion,
    offset: usize,
    encoding: &Encoding,
    mut address_at: impl FnMut(u64) -> DwarfResult<Address>,
) -> DwarfResult<Vec<RangeEntry>>
{
    check_start(region, offset, 1)?;

    let endian = encoding.endian;
    let size = encoding.address_size;
    let width = size.bytes();
    let to_unterminated = unterminated(offset);
    let mut cursor = region.cursor(offset);
    let mut entries = Vec::new();

    loop {
        let entry_offset = cursor.position();
        let kind = cursor.read_u8().map_err(&to_unterminated)?;

        let entry = match DwRle(kind) {
            gimli::DW_RLE_end_of_list => RangeEntry::EndOfList,
            gimli::DW_RLE_base_addressx => {
                let index = cursor.read_uleb128().map_err(&to_unterminated)?;
                RangeEntry::BaseAddressSelection(address_at(index)?)
            }
            gimli::DW_RLE_startx_endx => {
                let begin = cursor.read_uleb128().map_err(&to_unterminated)?;
                let end = cursor.read_uleb128().map_err(&to_unterminated)?;
                RangeEntry::Bounded {
                    begin: address_at(begin)?,
                    end: address_at(end)?,
                }
            }
            gimli::DW_RLE_startx_length => {
                let begin = cursor.read_uleb128().map_err(&to_unterminated)?;
                let length = cursor.read_uleb128().map_err(&to_unterminated)?;
                let begin = address_at(begin)?;
                RangeEntry::Bounded {
                    begin,
                    end: begin.wrapping_add_in(length, size),
                }
            }
            gimli::DW_RLE_offset_pair => {
                let low = cursor.read_uleb128().map_err(&to_unterminated)?;
                let high = cursor.read_uleb128().map_err(&to_unterminated)?;
                RangeEntry::Range { low, high }
            }
            gimli::DW_RLE_base_address => {
                let base = cursor.read_uint(width, endian).map_err(&to_unterminated)?;
                RangeEntry::BaseAddressSelection(Address::from(base))
            }
            gimli::DW_RLE_start_end => {
                let begin = cursor.read_uint(width, endian).map_err(&to_unterminated)?;
                let end = cursor.read_uint(width, endian).map_err(&to_unterminated)?;
                RangeEntry::Bounded {
                    begin: Address::from(begin),
                    end: Address::from(end),
                }
            }
            gimli::DW_RLE_start_length => {
                let begin = Address::from(cursor.read_uint(width, endian).map_err(&to_unterminated)?);
                let length = cursor.read_uleb128().map_err(&to_unterminated)?;
                RangeEntry::Bounded {
                    begin,
                    end: begin.wrapping_add_in(length, size),
                }
            }
            _ => {
                return Err(DwarfError::UnknownRangeListEntry {
                    kind,
                    offset: entry_offset,
                });
            }
        };

        entries.push(entry);
        if entry == RangeEntry::EndOfList {
            return Ok(entries);
        }
    }
}

/// Turn decoded entries into absolute intervals
///
/// `base` is the unit's base address; base-address selections replace it
/// for the entries that follow. Arithmetic wraps within `address_size`.
///
/// ## Errors
///
/// `InvertedRange` if an interval ends before it begins.
pub fn resolve_entries(
    entries: &[RangeEntry],
    list_offset: usize,
    address_size: AddressSize,
    base: Address,
) -> DwarfResult<Vec<ResolvedRange>>
{
    let mut base = base;
    let mut resolved = Vec::new();

    for entry in entries {
        let (begin, end) = match *entry {
            RangeEntry::BaseAddressSelection(new_base) => {
                base = new_base;
                continue;
            }
            RangeEntry::Range { low, high } => (
                base.wrapping_add_in(low, address_size),
                base.wrapping_add_in(high, address_size),
            ),
            RangeEntry::Bounded { begin, end } => (begin, end),
            RangeEntry::EndOfList => break,
        };

        if end < begin {
            return Err(DwarfError::InvertedRange {
                offset: list_offset,
                begin: begin.value(),
                end: end.value(),
            });
        }
        resolved.push(ResolvedRange { begin, end });
    }

    trace!(offset = list_offset, ranges = resolved.len(), "resolved range list");
    Ok(resolved)
}

/// Decode and resolve the `.debug_ranges` list at `offset`
///
/// ## Errors
///
/// Any error from [`decode_range_list`] or [`resolve_entries`].
pub fn resolve_range_list(
    region: &ByteRegion,
    offset: usize,
    address_size: AddressSize,
    endian: RunTimeEndian,
    base: Address,
) -> DwarfResult<Vec<ResolvedRange>>
{
    let entries = decode_range_list(region, offset, address_size, endian)?;
    resolve_entries(&entries, offset, address_size, base)
}

/// Decode and resolve the `.debug_rnglists` list at `offset`
///
/// ## Errors
///
/// Any error from [`decode_rnglist`] or [`resolve_entries`].
pub fn resolve_rnglist(
    region: &ByteRegion,
    offset: usize,
    encoding: &Encoding,
    base: Address,
    address_at: impl FnMut(u64) -> DwarfResult<Address>,
) -> DwarfResult<Vec<ResolvedRange>>
{
    let entries = decode_rnglist(region, offset, encoding, address_at)?;
    resolve_entries(&entries, offset, encoding.address_size, base)
}

/// Locate the list selected by a `DW_FORM_rnglistx` index
///
/// The offsets array starts at `rnglists_base`; each element is relative to
/// that base.
///
/// ## Errors
///
/// `OutOfBounds` if the index or the resulting offset falls outside the
/// section.
pub fn rnglistx_offset(region: &ByteRegion, rnglists_base: u64, index: u64, encoding: &Encoding) -> DwarfResult<usize>
{
    let width = encoding.format.offset_size();
    let base = section_position(rnglists_base, region)?;
    let entry = index
        .checked_mul(u64::from(width))
        .and_then(|delta| usize::try_from(delta).ok())
        .and_then(|delta| base.checked_add(delta))
        .ok_or(DwarfError::OutOfBounds {
            offset: base,
            len: usize::from(width),
            region_len: region.len(),
        })?;

    let (relative, _) = region.read_uint(entry, width, encoding.endian)?;
    let offset = section_position(relative, region)?;
    base.checked_add(offset).ok_or(DwarfError::OutOfBounds {
        offset: base,
        len: 1,
        region_len: region.len(),
    })
}
