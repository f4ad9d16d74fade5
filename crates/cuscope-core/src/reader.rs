//! # Primitive Decoder
//!
//! Bounds-checked reads over an immutable byte region.
//!
//! A [`ByteRegion`] is a view into a shared buffer (usually the whole object
//! file). All reads are relative to the start of the region and fail with
//! [`DwarfError::OutOfBounds`] as soon as they would cross its end, even when
//! the buffer behind it continues.
//!
//! The functional API (`read_*(offset) -> (value, next_offset)`) is what the
//! decoders are specified against; [`Cursor`] wraps it for sequential reads.
//!
//! ## Example
//!
//! ```rust
//! use cuscope_core::reader::ByteRegion;
//! use gimli::RunTimeEndian;
//!
//! let region = ByteRegion::from_vec(vec![0xe5, 0x8e, 0x26, 0x34, 0x12]);
//! let (value, next) = region.read_uleb128(0).unwrap();
//! assert_eq!((value, next), (624_485, 3));
//! let (value, _) = region.read_uint(next, 2, RunTimeEndian::Little).unwrap();
//! assert_eq!(value, 0x1234);
//! ```

use std::fmt;
use std::sync::Arc;

use gimli::{Endianity, RunTimeEndian};

use crate::error::{DwarfError, DwarfResult};

/// An immutable view into a shared byte buffer
///
/// Cloning a region is cheap: it shares the buffer and copies three words.
#[derive(Clone)]
pub struct ByteRegion
{
    buffer: Arc<[u8]>,
    start: usize,
    len: usize,
}

impl ByteRegion
{
    /// Create a view of `len` bytes starting at `start` in `buffer`
    ///
    /// Returns `None` if the view does not fit inside the buffer.
    pub fn new(buffer: Arc<[u8]>, start: usize, len: usize) -> Option<Self>
    {
        let end = start.checked_add(len)?;
        if end > buffer.len() {
            return None;
        }
        Some(Self { buffer, start, len })
    }

    /// Create a region covering a whole buffer
    pub fn from_arc(buffer: Arc<[u8]>) -> Self
    {
        let len = buffer.len();
        Self { buffer, start: 0, len }
    }

    /// Create a region owning a copy of `bytes`
    pub fn from_vec(bytes: Vec<u8>) -> Self
    {
        Self::from_arc(Arc::from(bytes))
    }

    /// A region with no bytes
    pub fn empty() -> Self
    {
        Self::from_vec(Vec::new())
    }

    /// Number of bytes in the region
    pub fn len(&self) -> usize
    {
        self.len
    }

    /// Returns true if the region holds no bytes
    pub fn is_empty(&self) -> bool
    {
        self.len == 0
    }

    /// Offset of this region inside its buffer
    pub fn start(&self) -> usize
    {
        self.start
    }

    /// The bytes of the region
    pub fn as_slice(&self) -> &[u8]
    {
        &self.buffer[self.start..self.start + self.len]
    }

    /// Returns true if both regions view the same bytes of the same buffer
    pub fn same_view(&self, other: &ByteRegion) -> bool
    {
        Arc::ptr_eq(&self.buffer, &other.buffer) && self.start == other.start && self.len == other.len
    }

    /// A bounds-checked sub-view `[offset, offset + len)`
    ///
    /// ## Errors
    ///
    /// Returns `OutOfBounds` if the sub-view would leave this region.
    pub fn sub_region(&self, offset: usize, len: usize) -> DwarfResult<ByteRegion>
    {
        self.check(offset, len)?;
        Ok(Self {
            buffer: Arc::clone(&self.buffer),
            start: self.start + offset,
            len,
        })
    }

    fn check(&self, offset: usize, len: usize) -> DwarfResult<()>
    {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(DwarfError::OutOfBounds {
                offset,
                len,
                region_len: self.len,
            }),
        }
    }

    /// Borrow `len` raw bytes at `offset`
    ///
    /// ## Errors
    ///
    /// Returns `OutOfBounds` if the bytes exceed the region.
    pub fn read_bytes(&self, offset: usize, len: usize) -> DwarfResult<(&[u8], usize)>
    {
        self.check(offset, len)?;
        Ok((&self.as_slice()[offset..offset + len], offset + len))
    }

    /// Read a single byte
    ///
    /// ## Errors
    ///
    /// Returns `OutOfBounds` if `offset` is at or past the end of the region.
    pub fn read_u8(&self, offset: usize) -> DwarfResult<(u8, usize)>
    {
        let (bytes, next) = self.read_bytes(offset, 1)?;
        Ok((bytes[0], next))
    }

    /// Read an unsigned integer of `width` bytes (1 to 8) in `endian` order
    ///
    /// Odd widths (3, 5, 6, 7) are supported for the `strx3`/`addrx3` forms.
    ///
    /// ## Errors
    ///
    /// Returns `OutOfBounds` if the bytes exceed the region.
    pub fn read_uint(&self, offset: usize, width: u8, endian: RunTimeEndian) -> DwarfResult<(u64, usize)>
    {
        let (bytes, next) = self.read_bytes(offset, usize::from(width))?;
        let value = match width {
            1 => u64::from(bytes[0]),
            2 => u64::from(endian.read_u16(bytes)),
            4 => u64::from(endian.read_u32(bytes)),
            8 => endian.read_u64(bytes),
            _ if endian.is_big_endian() => bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
            _ => bytes.iter().rev().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
        };
        Ok((value, next))
    }

    /// Read an unsigned LEB128 value
    ///
    /// ## Errors
    ///
    /// Returns `OutOfBounds` if the encoding runs off the region, or
    /// `Leb128Overflow` if the payload does not fit in 64 bits.
    pub fn read_uleb128(&self, offset: usize) -> DwarfResult<(u64, usize)>
    {
        let mut result = 0u64;
        let mut shift = 0u32;
        let mut pos = offset;
        loop {
            let (byte, next) = self.read_u8(pos)?;
            pos = next;
            let low = u64::from(byte & 0x7f);
            if (shift == 63 && low > 1) || (shift > 63 && low != 0) {
                return Err(DwarfError::Leb128Overflow(offset));
            }
            if shift < 64 {
                result |= low << shift;
            }
            if byte & 0x80 == 0 {
                return Ok((result, pos));
            }
            shift += 7;
        }
    }

    /// Read a signed LEB128 value
    ///
    /// The result is sign-extended from bit 6 of the final byte.
    ///
    /// ## Errors
    ///
    /// Returns `OutOfBounds` if the encoding runs off the region, or
    /// `Leb128Overflow` if the payload does not fit in 64 bits.
    pub fn read_sleb128(&self, offset: usize) -> DwarfResult<(i64, usize)>
    {
        let mut result = 0i64;
        let mut shift = 0u32;
        let mut pos = offset;
        loop {
            let (byte, next) = self.read_u8(pos)?;
            pos = next;
            let low = i64::from(byte & 0x7f);
            // Past bit 63 every group must repeat the sign bit
            let fits = match shift {
                0..=62 => true,
                63 => low == 0 || low == 0x7f,
                _ => low == if result < 0 { 0x7f } else { 0 },
            };
            if !fits {
                return Err(DwarfError::Leb128Overflow(offset));
            }
            if shift < 64 {
                result |= low << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return Ok((result, pos));
            }
        }
    }

    /// Read a null-terminated string, returning the bytes without the terminator
    ///
    /// ## Errors
    ///
    /// Returns `OutOfBounds` if no terminator occurs before the end of the region.
    pub fn read_cstring(&self, offset: usize) -> DwarfResult<(&[u8], usize)>
    {
        let tail = self.as_slice().get(offset..).ok_or(DwarfError::OutOfBounds {
            offset,
            len: 1,
            region_len: self.len,
        })?;
        match tail.iter().position(|&b| b == 0) {
            Some(nul) => Ok((&tail[..nul], offset + nul + 1)),
            None => Err(DwarfError::OutOfBounds {
                offset,
                len: tail.len() + 1,
                region_len: self.len,
            }),
        }
    }

    /// Start a sequential cursor at `offset`
    pub fn cursor(&self, offset: usize) -> Cursor<'_>
    {
        Cursor { region: self, pos: offset }
    }
}

impl fmt::Debug for ByteRegion
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("ByteRegion")
            .field("start", &self.start)
            .field("len", &self.len)
            .finish()
    }
}

/// Sequential reader over a [`ByteRegion`]
///
/// Each read advances the position only when it succeeds.
#[derive(Clone, Copy)]
pub struct Cursor<'r>
{
    region: &'r ByteRegion,
    pos: usize,
}

impl<'r> Cursor<'r>
{
    pub fn position(&self) -> usize
    {
        self.pos
    }

    pub fn region(&self) -> &'r ByteRegion
    {
        self.region
    }

    /// Returns true once every byte of the region has been consumed
    pub fn is_at_end(&self) -> bool
    {
        self.pos >= self.region.len()
    }

    /// Bytes left before the end of the region
    pub fn remaining(&self) -> usize
    {
        self.region.len().saturating_sub(self.pos)
    }

    pub fn read_u8(&mut self) -> DwarfResult<u8>
    {
        let (value, next) = self.region.read_u8(self.pos)?;
        self.pos = next;
        Ok(value)
    }

    pub fn read_uint(&mut self, width: u8, endian: RunTimeEndian) -> DwarfResult<u64>
    {
        let (value, next) = self.region.read_uint(self.pos, width, endian)?;
        self.pos = next;
        Ok(value)
    }

    pub fn read_u16(&mut self, endian: RunTimeEndian) -> DwarfResult<u16>
    {
        // A 2-byte read always fits in u16.
        self.read_uint(2, endian).map(|value| value as u16)
    }

    pub fn read_uleb128(&mut self) -> DwarfResult<u64>
    {
        let (value, next) = self.region.read_uleb128(self.pos)?;
        self.pos = next;
        Ok(value)
    }

    pub fn read_sleb128(&mut self) -> DwarfResult<i64>
    {
        let (value, next) = self.region.read_sleb128(self.pos)?;
        self.pos = next;
        Ok(value)
    }

    pub fn read_cstring(&mut self) -> DwarfResult<&'r [u8]>
    {
        let (bytes, next) = self.region.read_cstring(self.pos)?;
        self.pos = next;
        Ok(bytes)
    }

    pub fn read_bytes(&mut self, len: usize) -> DwarfResult<&'r [u8]>
    {
        let (bytes, next) = self.region.read_bytes(self.pos, len)?;
        self.pos = next;
        Ok(bytes)
    }

    /// Advance past `len` bytes without reading them
    pub fn skip(&mut self, len: usize) -> DwarfResult<()>
    {
        self.read_bytes(len).map(|_| ())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_read_exactly_filling_region_succeeds()
    {
        let region = ByteRegion::from_vec(vec![1, 2, 3, 4]);
        let (value, next) = region.read_uint(0, 4, RunTimeEndian::Little).unwrap();
        assert_eq!(value, 0x0403_0201);
        assert_eq!(next, 4);
    }

    #[test]
    fn test_read_past_region_fails()
    {
        let region = ByteRegion::from_vec(vec![1, 2, 3]);
        let err = region.read_uint(0, 4, RunTimeEndian::Little).unwrap_err();
        assert_eq!(
            err,
            DwarfError::OutOfBounds {
                offset: 0,
                len: 4,
                region_len: 3
            }
        );
        assert!(region.read_u8(3).is_err());
    }

    #[test]
    fn test_sub_region_bounds_are_authoritative()
    {
        let whole = ByteRegion::from_vec(vec![0xaa, 0xbb, 0xcc, 0xdd]);
        let view = whole.sub_region(1, 2).unwrap();
        assert_eq!(view.as_slice(), &[0xbb, 0xcc]);
        assert_eq!(view.read_u8(1).unwrap().0, 0xcc);
        // The buffer continues, the view does not.
        assert!(matches!(view.read_u8(2), Err(DwarfError::OutOfBounds { .. })));
        assert!(whole.sub_region(3, 2).is_err());
    }

    #[test]
    fn test_read_uint_big_endian_and_odd_widths()
    {
        let region = ByteRegion::from_vec(vec![0x12, 0x34, 0x56]);
        assert_eq!(region.read_uint(0, 2, RunTimeEndian::Big).unwrap().0, 0x1234);
        assert_eq!(region.read_uint(0, 3, RunTimeEndian::Big).unwrap().0, 0x12_3456);
        assert_eq!(region.read_uint(0, 3, RunTimeEndian::Little).unwrap().0, 0x56_3412);
    }

    #[test]
    fn test_uleb128_known_values()
    {
        let region = ByteRegion::from_vec(vec![0x02, 0x7f, 0x80, 0x01, 0xe5, 0x8e, 0x26]);
        assert_eq!(region.read_uleb128(0).unwrap(), (2, 1));
        assert_eq!(region.read_uleb128(1).unwrap(), (127, 2));
        assert_eq!(region.read_uleb128(2).unwrap(), (128, 4));
        assert_eq!(region.read_uleb128(4).unwrap(), (624_485, 7));
    }

    #[test]
    fn test_sleb128_known_values()
    {
        let region = ByteRegion::from_vec(vec![0x02, 0x7e, 0xff, 0x00, 0x81, 0x7f, 0x80, 0x7f]);
        assert_eq!(region.read_sleb128(0).unwrap(), (2, 1));
        assert_eq!(region.read_sleb128(1).unwrap(), (-2, 2));
        assert_eq!(region.read_sleb128(2).unwrap(), (127, 4));
        assert_eq!(region.read_sleb128(4).unwrap(), (-127, 6));
        assert_eq!(region.read_sleb128(6).unwrap(), (-128, 8));
    }

    #[test]
    fn test_sleb128_overlong_groups_must_repeat_sign()
    {
        // Bit 63 set by the tenth byte, then a positive sign group
        let mut bytes = vec![0x80; 9];
        bytes.extend([0xff, 0x00]);
        let region = ByteRegion::from_vec(bytes);
        assert_eq!(region.read_sleb128(0), Err(DwarfError::Leb128Overflow(0)));

        // Bit 63 clear, then a negative sign group
        let mut bytes = vec![0x80; 9];
        bytes.extend([0x80, 0x7f]);
        let region = ByteRegion::from_vec(bytes);
        assert_eq!(region.read_sleb128(0), Err(DwarfError::Leb128Overflow(0)));

        // Redundant groups that agree with the sign are accepted
        let mut bytes = vec![0x80; 9];
        bytes.extend([0xff, 0x7f]);
        let region = ByteRegion::from_vec(bytes);
        assert_eq!(region.read_sleb128(0).unwrap(), (i64::MIN, 11));

        let mut bytes = vec![0xff; 10];
        bytes.push(0x7f);
        let region = ByteRegion::from_vec(bytes);
        assert_eq!(region.read_sleb128(0).unwrap(), (-1, 11));
    }

    #[test]
    fn test_leb128_truncated_is_out_of_bounds()
    {
        let region = ByteRegion::from_vec(vec![0x80, 0x80]);
        assert!(matches!(region.read_uleb128(0), Err(DwarfError::OutOfBounds { .. })));
        assert!(matches!(region.read_sleb128(0), Err(DwarfError::OutOfBounds { .. })));
    }

    #[test]
    fn test_uleb128_overflow()
    {
        let mut bytes = vec![0xff; 9];
        bytes.push(0x02);
        let region = ByteRegion::from_vec(bytes);
        assert_eq!(region.read_uleb128(0), Err(DwarfError::Leb128Overflow(0)));
    }

    #[test]
    fn test_read_cstring()
    {
        let region = ByteRegion::from_vec(b"main.c\0x".to_vec());
        assert_eq!(region.read_cstring(0).unwrap(), (&b"main.c"[..], 7));
        assert!(matches!(region.read_cstring(7), Err(DwarfError::OutOfBounds { .. })));
        assert!(matches!(region.read_cstring(8), Err(DwarfError::OutOfBounds { .. })));
    }

    #[test]
    fn test_cursor_only_advances_on_success()
    {
        let region = ByteRegion::from_vec(vec![0x01, 0x02]);
        let mut cursor = region.cursor(0);
        assert_eq!(cursor.read_u8().unwrap(), 1);
        assert!(cursor.read_uint(4, RunTimeEndian::Little).is_err());
        assert_eq!(cursor.position(), 1);
        assert_eq!(cursor.remaining(), 1);
        assert_eq!(cursor.read_u8().unwrap(), 2);
        assert!(cursor.is_at_end());
    }
}
