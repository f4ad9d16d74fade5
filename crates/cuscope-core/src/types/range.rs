//! Range list entry and resolved interval types.

use std::fmt;

use super::address::Address;

/// One decoded range list entry
///
/// `.debug_ranges` lists only ever produce `BaseAddressSelection`, `Range`
/// and `EndOfList`. `Bounded` comes from DWARF 5 `.debug_rnglists` entries
/// that carry absolute bounds and ignore the current base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeEntry
{
    /// Replace the base address for the entries that follow
    BaseAddressSelection(Address),
    /// Offsets relative to the current base address
    Range
    {
        low: u64,
        high: u64,
    },
    /// Absolute bounds
    Bounded
    {
        begin: Address,
        end: Address,
    },
    /// Terminates the list
    EndOfList,
}

/// A half-open address interval `[begin, end)`
///
/// Always satisfies `end >= begin`; the resolver reports a violation instead
/// of building one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResolvedRange
{
    pub begin: Address,
    pub end: Address,
}

impl ResolvedRange
{
    /// Number of bytes covered by the interval
    pub fn size(&self) -> u64
    {
        self.end - self.begin
    }

    /// Returns true if the interval covers no bytes
    pub fn is_empty(&self) -> bool
    {
        self.begin == self.end
    }
}

impl fmt::Display for ResolvedRange
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "[0x{:x}, 0x{:x})", self.begin, self.end)
    }
}

/// Total number of bytes covered by a set of ranges
///
/// Overlapping ranges are counted once per range, matching a plain sum of
/// `end - begin`.
///
/// ## Example
///
/// ```rust
/// use cuscope_core::types::{range_size, Address, ResolvedRange};
///
/// let ranges = [
///     ResolvedRange { begin: Address::from(0x1010), end: Address::from(0x1020) },
///     ResolvedRange { begin: Address::from(0x1030), end: Address::from(0x1040) },
/// ];
/// assert_eq!(range_size(&ranges), 32);
/// ```
pub fn range_size(ranges: &[ResolvedRange]) -> u64
{
    ranges.iter().map(ResolvedRange::size).fold(0u64, u64::saturating_add)
}
