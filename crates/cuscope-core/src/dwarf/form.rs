//! Attribute forms and decoded attribute values.
//!
//! Form dispatch is a closed `match` over [`Form`]. A form number outside the
//! enumeration fails with `UnsupportedForm`; new forms need an explicit
//! variant.

use std::fmt;

use gimli::{DwAt, DwForm};

use super::unit::Encoding;
use crate::error::{DwarfError, DwarfResult};
use crate::reader::Cursor;
use crate::types::Address;

macro_rules! forms {
    ($($variant:ident => $constant:ident,)*) => {
        /// Every attribute form the decoder understands
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Form
        {
            $($variant,)*
        }

        impl TryFrom<DwForm> for Form
        {
            type Error = DwForm;

            fn try_from(form: DwForm) -> Result<Self, Self::Error>
            {
                match form {
                    $(gimli::$constant => Ok(Form::$variant),)*
                    other => Err(other),
                }
            }
        }

        impl From<Form> for DwForm
        {
            fn from(form: Form) -> Self
            {
                match form {
                    $(Form::$variant => gimli::$constant,)*
                }
            }
        }
    };
}

forms! {
    Addr => DW_FORM_addr,
    Addrx => DW_FORM_addrx,
    Addrx1 => DW_FORM_addrx1,
    Addrx2 => DW_FORM_addrx2,
    Addrx3 => DW_FORM_addrx3,
    Addrx4 => DW_FORM_addrx4,
    Data1 => DW_FORM_data1,
    Data2 => DW_FORM_data2,
    Data4 => DW_FORM_data4,
    Data8 => DW_FORM_data8,
    Data16 => DW_FORM_data16,
    Sdata => DW_FORM_sdata,
    Udata => DW_FORM_udata,
    String => DW_FORM_string,
    Strp => DW_FORM_strp,
    LineStrp => DW_FORM_line_strp,
    Strx => DW_FORM_strx,
    Strx1 => DW_FORM_strx1,
    Strx2 => DW_FORM_strx2,
    Strx3 => DW_FORM_strx3,
    Strx4 => DW_FORM_strx4,
    Block => DW_FORM_block,
    Block1 => DW_FORM_block1,
    Block2 => DW_FORM_block2,
    Block4 => DW_FORM_block4,
    Exprloc => DW_FORM_exprloc,
    Flag => DW_FORM_flag,
    FlagPresent => DW_FORM_flag_present,
    SecOffset => DW_FORM_sec_offset,
    Ref1 => DW_FORM_ref1,
    Ref2 => DW_FORM_ref2,
    Ref4 => DW_FORM_ref4,
    Ref8 => DW_FORM_ref8,
    RefUdata => DW_FORM_ref_udata,
    RefAddr => DW_FORM_ref_addr,
    RefSig8 => DW_FORM_ref_sig8,
    ImplicitConst => DW_FORM_implicit_const,
    Rnglistx => DW_FORM_rnglistx,
    Loclistx => DW_FORM_loclistx,
    Indirect => DW_FORM_indirect,
}

impl fmt::Display for Form
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", DwForm::from(*self))
    }
}

/// A decoded attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue
{
    Unsigned(u64),
    Signed(i64),
    Address(Address),
    String(String),
    Block(Vec<u8>),
    /// Offset into another debug section (`DW_FORM_sec_offset`)
    SectionOffset(u64),
    Flag(bool),
    /// Absolute offset of the referenced DIE in `.debug_info`
    Reference(u64),
    /// Type signature from `DW_FORM_ref_sig8`
    Signature(u64),
    /// Index into the unit's range list offsets (`DW_FORM_rnglistx`)
    RangeListIndex(u64),
    /// Index into the unit's location list offsets (`DW_FORM_loclistx`)
    LocationListIndex(u64),
}

impl AttrValue
{
    pub fn as_str(&self) -> Option<&str>
    {
        match self {
            AttrValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address>
    {
        match self {
            AttrValue::Address(address) => Some(*address),
            _ => None,
        }
    }

    /// The value as an offset into another section
    ///
    /// DWARF 2 and 3 encode section offsets with `data4`/`data8`, so plain
    /// unsigned constants are accepted too.
    pub fn as_section_offset(&self) -> Option<u64>
    {
        match self {
            AttrValue::SectionOffset(offset) | AttrValue::Unsigned(offset) => Some(*offset),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            AttrValue::Unsigned(value) => write!(f, "{value}"),
            AttrValue::Signed(value) => write!(f, "{value}"),
            AttrValue::Address(address) => write!(f, "0x{address:x}"),
            AttrValue::String(value) => write!(f, "{value:?}"),
            AttrValue::Block(bytes) => write!(f, "<{} byte block>", bytes.len()),
            AttrValue::SectionOffset(offset) => write!(f, "<section offset 0x{offset:x}>"),
            AttrValue::Flag(value) => write!(f, "{value}"),
            AttrValue::Reference(offset) => write!(f, "<0x{offset:x}>"),
            AttrValue::Signature(signature) => write!(f, "<signature 0x{signature:016x}>"),
            AttrValue::RangeListIndex(index) => write!(f, "<rnglist index {index}>"),
            AttrValue::LocationListIndex(index) => write!(f, "<loclist index {index}>"),
        }
    }
}

/// One attribute of a DIE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeValue
{
    pub name: DwAt,
    pub form: Form,
    pub value: AttrValue,
}

/// A value as read from `.debug_info`, before unit bases are applied
///
/// String and address forms that point into other sections are kept as
/// offsets or indices here; the DIE decoder resolves them once the unit's
/// bases are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RawValue
{
    Value(AttrValue),
    StrOffset(u64),
    LineStrOffset(u64),
    StrIndex(u64),
    AddrIndex(u64),
}

/// Read a length-prefixed block
fn read_block(cursor: &mut Cursor<'_>, len: u64) -> DwarfResult<RawValue>
{
    let offset = cursor.position();
    let len = usize::try_from(len).map_err(|_| DwarfError::OutOfBounds {
        offset,
        len: usize::MAX,
        region_len: cursor.region().len(),
    })?;
    Ok(RawValue::Value(AttrValue::Block(cursor.read_bytes(len)?.to_vec())))
}

/// Decode one attribute value of `form` at the cursor
///
/// Returns the concrete form after `DW_FORM_indirect` has been followed.
///
/// ## Errors
///
/// `UnsupportedForm` for form numbers outside [`Form`], `OutOfBounds` when
/// the value runs past the unit, `MalformedDie` for an `implicit_const`
/// without a table value.
pub(crate) fn read_value(
    cursor: &mut Cursor<'_>,
    form: DwForm,
    implicit_const: Option<i64>,
    encoding: &Encoding,
    unit_offset: usize,
) -> DwarfResult<(Form, RawValue)>
{
    let form_offset = cursor.position();
    let unsupported = |form: DwForm| DwarfError::UnsupportedForm {
        form: u64::from(form.0),
        offset: form_offset,
    };

    let mut form = Form::try_from(form).map_err(unsupported)?;
    while form == Form::Indirect {
        let raw = cursor.read_uleb128()?;
        let raw = u16::try_from(raw).map_err(|_| DwarfError::UnsupportedForm {
            form: raw,
            offset: form_offset,
        })?;
        form = Form::try_from(DwForm(raw)).map_err(unsupported)?;
    }

    let endian = encoding.endian;
    let address_size = encoding.address_size.bytes();
    let offset_size = encoding.format.offset_size();
    let unit_ref = |value: u64| RawValue::Value(AttrValue::Reference((unit_offset as u64).wrapping_add(value)));

    let value = match form {
        Form::Addr => RawValue::Value(AttrValue::Address(Address::from(cursor.read_uint(address_size, endian)?))),
        Form::Addrx => RawValue::AddrIndex(cursor.read_uleb128()?),
        Form::Addrx1 => RawValue::AddrIndex(cursor.read_uint(1, endian)?),
        Form::Addrx2 => RawValue::AddrIndex(cursor.read_uint(2, endian)?),
        Form::Addrx3 => RawValue::AddrIndex(cursor.read_uint(3, endian)?),
        Form::Addrx4 => RawValue::AddrIndex(cursor.read_uint(4, endian)?),
        Form::Data1 => RawValue::Value(AttrValue::Unsigned(cursor.read_uint(1, endian)?)),
        Form::Data2 => RawValue::Value(AttrValue::Unsigned(cursor.read_uint(2, endian)?)),
        Form::Data4 => RawValue::Value(AttrValue::Unsigned(cursor.read_uint(4, endian)?)),
        Form::Data8 => RawValue::Value(AttrValue::Unsigned(cursor.read_uint(8, endian)?)),
        Form::Data16 => read_block(cursor, 16)?,
        Form::Sdata => RawValue::Value(AttrValue::Signed(cursor.read_sleb128()?)),
        Form::Udata => RawValue::Value(AttrValue::Unsigned(cursor.read_uleb128()?)),
        Form::String => {
            let bytes = cursor.read_cstring()?;
            RawValue::Value(AttrValue::String(String::from_utf8_lossy(bytes).into_owned()))
        }
        Form::Strp => RawValue::StrOffset(cursor.read_uint(offset_size, endian)?),
        Form::LineStrp => RawValue::LineStrOffset(cursor.read_uint(offset_size, endian)?),
        Form::Strx => RawValue::StrIndex(cursor.read_uleb128()?),
        Form::Strx1 => RawValue::StrIndex(cursor.read_uint(1, endian)?),
        Form::Strx2 => RawValue::StrIndex(cursor.read_uint(2, endian)?),
        Form::Strx3 => RawValue::StrIndex(cursor.read_uint(3, endian)?),
        Form::Strx4 => RawValue::StrIndex(cursor.read_uint(4, endian)?),
        Form::Block | Form::Exprloc => {
            let len = cursor.read_uleb128()?;
            read_block(cursor, len)?
        }
        Form::Block1 => {
            let len = cursor.read_uint(1, endian)?;
            read_block(cursor, len)?
        }
        Form::Block2 => {
            let len = cursor.read_uint(2, endian)?;
            read_block(cursor, len)?
        }
        Form::Block4 => {
            let len = cursor.read_uint(4, endian)?;
            read_block(cursor, len)?
        }
        Form::Flag => RawValue::Value(AttrValue::Flag(cursor.read_u8()? != 0)),
        Form::FlagPresent => RawValue::Value(AttrValue::Flag(true)),
        Form::SecOffset => RawValue::Value(AttrValue::SectionOffset(cursor.read_uint(offset_size, endian)?)),
        Form::Ref1 => unit_ref(cursor.read_uint(1, endian)?),
        Form::Ref2 => unit_ref(cursor.read_uint(2, endian)?),
        Form::Ref4 => unit_ref(cursor.read_uint(4, endian)?),
        Form::Ref8 => unit_ref(cursor.read_uint(8, endian)?),
        Form::RefUdata => unit_ref(cursor.read_uleb128()?),
        Form::RefAddr => {
            // DWARF 2 sized this like an address; later versions use the offset size.
            let width = if encoding.version <= 2 { address_size } else { offset_size };
            RawValue::Value(AttrValue::Reference(cursor.read_uint(width, endian)?))
        }
        Form::RefSig8 => RawValue::Value(AttrValue::Signature(cursor.read_uint(8, endian)?)),
        Form::ImplicitConst => {
            let value = implicit_const.ok_or_else(|| DwarfError::MalformedDie {
                offset: form_offset,
                reason: "implicit_const used without a table value".to_string(),
            })?;
            RawValue::Value(AttrValue::Signed(value))
        }
        Form::Rnglistx => RawValue::Value(AttrValue::RangeListIndex(cursor.read_uleb128()?)),
        Form::Loclistx => RawValue::Value(AttrValue::LocationListIndex(cursor.read_uleb128()?)),
        Form::Indirect => unreachable!("indirect forms are followed above"),
    };

    Ok((form, value))
}
