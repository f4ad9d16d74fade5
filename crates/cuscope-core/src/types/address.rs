//! Target address and address-width types.

use std::fmt;
use std::ops::Sub;

use crate::error::{DwarfError, DwarfResult};

/// Strongly typed target address
///
/// This wrapper around `u64` keeps addresses from being mixed up with sizes,
/// section offsets and other plain integers while decoding.
///
/// ## Example
///
/// ```rust
/// use cuscope_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// assert_eq!(addr.value(), 0x1000);
/// assert_eq!(Address::from(0x1020) - addr, 0x20);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Add an offset, wrapping within the given address width
    ///
    /// DWARF address arithmetic is modular in the target's address size, so a
    /// 32-bit target wraps at `u32::MAX` rather than `u64::MAX`.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use cuscope_core::types::{Address, AddressSize};
    ///
    /// let base = Address::from(0xffff_fff0);
    /// assert_eq!(base.wrapping_add_in(0x20, AddressSize::FOUR), Address::from(0x10));
    /// assert_eq!(base.wrapping_add_in(0x20, AddressSize::EIGHT), Address::from(0x1_0000_0010));
    /// ```
    #[must_use]
    pub fn wrapping_add_in(self, offset: u64, size: AddressSize) -> Self
    {
        Address(self.0.wrapping_add(offset) & size.max_value())
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Distance between two addresses in bytes
impl Sub for Address
{
    type Output = u64;

    fn sub(self, rhs: Address) -> Self::Output
    {
        self.0.wrapping_sub(rhs.0)
    }
}

/// Width of a target address in bytes
///
/// Only 4- and 8-byte targets are supported; construction through
/// [`AddressSize::new`] rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressSize(u8);

impl AddressSize
{
    /// 32-bit targets
    pub const FOUR: Self = AddressSize(4);
    /// 64-bit targets
    pub const EIGHT: Self = AddressSize(8);

    /// Validate a raw address size read from a unit header
    ///
    /// `unit_offset` is only used for the error message.
    ///
    /// ## Errors
    ///
    /// Returns `UnsupportedAddressSize` for any size other than 4 or 8.
    pub fn new(size: u8, unit_offset: usize) -> DwarfResult<Self>
    {
        match size {
            4 | 8 => Ok(AddressSize(size)),
            _ => Err(DwarfError::UnsupportedAddressSize {
                size,
                offset: unit_offset,
            }),
        }
    }

    /// Number of bytes in an address
    pub const fn bytes(self) -> u8
    {
        self.0
    }

    /// The all-ones bit pattern for this width
    ///
    /// In `.debug_ranges` this value marks a base-address selection entry.
    pub const fn max_value(self) -> u64
    {
        if self.0 == 8 {
            u64::MAX
        } else {
            u32::MAX as u64
        }
    }
}

impl fmt::Display for AddressSize
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}-bit", u32::from(self.0) * 8)
    }
}
