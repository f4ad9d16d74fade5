//! Helpers for assembling DWARF sections by hand and wrapping them in an ELF

#![allow(dead_code)]

use gimli::{DwAt, DwForm, DwTag};
use object::write::Object;
use object::{Architecture, BinaryFormat, Endianness, SectionKind};

pub fn uleb(value: u64) -> Vec<u8>
{
    let mut bytes = Vec::new();
    gimli::leb128::write::unsigned(&mut bytes, value).unwrap();
    bytes
}

pub fn sleb(value: i64) -> Vec<u8>
{
    let mut bytes = Vec::new();
    gimli::leb128::write::signed(&mut bytes, value).unwrap();
    bytes
}

/// One abbreviation: code, tag, has-children flag, attribute specs
pub type AbbrevSpec<'a> = (u64, DwTag, bool, &'a [(DwAt, DwForm)]);

/// Encode an abbreviation table terminated by a zero code
pub fn abbrev_table(entries: &[AbbrevSpec<'_>]) -> Vec<u8>
{
    let mut bytes = Vec::new();
    for (code, tag, children, attributes) in entries {
        bytes.extend(uleb(*code));
        bytes.extend(uleb(u64::from(tag.0)));
        bytes.push(u8::from(*children));
        for (name, form) in *attributes {
            bytes.extend(uleb(u64::from(name.0)));
            bytes.extend(uleb(u64::from(form.0)));
        }
        bytes.extend([0, 0]);
    }
    bytes.push(0);
    bytes
}

/// Abbreviation codes of [`standard_abbrevs`]
pub mod code
{
    /// compile_unit: name, low_pc, ranges
    pub const CU_RANGES: u64 = 1;
    /// compile_unit: name
    pub const CU_PLAIN: u64 = 2;
    /// compile_unit: name, comp_dir, low_pc, ranges
    pub const CU_DIR_RANGES: u64 = 3;
    /// partial_unit: name, ranges
    pub const PARTIAL_RANGES: u64 = 4;
    /// compile_unit with children: name (strp), ranges
    pub const CU_STRP_CHILDREN: u64 = 5;
    /// subprogram: name
    pub const SUBPROGRAM: u64 = 6;
}

pub fn standard_abbrevs() -> Vec<u8>
{
    abbrev_table(&[
        (
            code::CU_RANGES,
            gimli::DW_TAG_compile_unit,
            false,
            &[
                (gimli::DW_AT_name, gimli::DW_FORM_string),
                (gimli::DW_AT_low_pc, gimli::DW_FORM_addr),
                (gimli::DW_AT_ranges, gimli::DW_FORM_sec_offset),
            ],
        ),
        (code::CU_PLAIN, gimli::DW_TAG_compile_unit, false, &[(gimli::DW_AT_name, gimli::DW_FORM_string)]),
        (
            code::CU_DIR_RANGES,
            gimli::DW_TAG_compile_unit,
            false,
            &[
                (gimli::DW_AT_name, gimli::DW_FORM_string),
                (gimli::DW_AT_comp_dir, gimli::DW_FORM_string),
                (gimli::DW_AT_low_pc, gimli::DW_FORM_addr),
                (gimli::DW_AT_ranges, gimli::DW_FORM_sec_offset),
            ],
        ),
        (
            code::PARTIAL_RANGES,
            gimli::DW_TAG_partial_unit,
            false,
            &[
                (gimli::DW_AT_name, gimli::DW_FORM_string),
                (gimli::DW_AT_ranges, gimli::DW_FORM_sec_offset),
            ],
        ),
        (
            code::CU_STRP_CHILDREN,
            gimli::DW_TAG_compile_unit,
            true,
            &[
                (gimli::DW_AT_name, gimli::DW_FORM_strp),
                (gimli::DW_AT_ranges, gimli::DW_FORM_sec_offset),
            ],
        ),
        (code::SUBPROGRAM, gimli::DW_TAG_subprogram, false, &[(gimli::DW_AT_name, gimli::DW_FORM_string)]),
    ])
}

/// Builds the bytes of one DIE
#[derive(Default)]
pub struct DieBytes(pub Vec<u8>);

impl DieBytes
{
    pub fn new(code: u64) -> Self
    {
        Self(uleb(code))
    }

    pub fn string(mut self, value: &str) -> Self
    {
        self.0.extend_from_slice(value.as_bytes());
        self.0.push(0);
        self
    }

    pub fn addr(mut self, value: u64) -> Self
    {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn offset(mut self, value: u32) -> Self
    {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn uleb(mut self, value: u64) -> Self
    {
        self.0.extend(uleb(value));
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self
    {
        self.0.extend_from_slice(bytes);
        self
    }
}

/// `.debug_info` assembled one unit at a time (32-bit DWARF, little endian)
#[derive(Default)]
pub struct InfoBuilder
{
    pub bytes: Vec<u8>,
}

impl InfoBuilder
{
    /// Append a version 2–4 unit and return its offset
    pub fn unit_v4(&mut self, version: u16, abbrev_offset: u32, entries: &[u8]) -> usize
    {
        let offset = self.bytes.len();
        let length = u32::try_from(2 + 4 + 1 + entries.len()).unwrap();
        self.bytes.extend_from_slice(&length.to_le_bytes());
        self.bytes.extend_from_slice(&version.to_le_bytes());
        self.bytes.extend_from_slice(&abbrev_offset.to_le_bytes());
        self.bytes.push(8);
        self.bytes.extend_from_slice(entries);
        offset
    }

    /// Append a version 5 compile unit and return its offset
    pub fn unit_v5(&mut self, abbrev_offset: u32, entries: &[u8]) -> usize
    {
        let offset = self.bytes.len();
        let length = u32::try_from(2 + 1 + 1 + 4 + entries.len()).unwrap();
        self.bytes.extend_from_slice(&length.to_le_bytes());
        self.bytes.extend_from_slice(&5u16.to_le_bytes());
        self.bytes.push(gimli::DW_UT_compile.0);
        self.bytes.push(8);
        self.bytes.extend_from_slice(&abbrev_offset.to_le_bytes());
        self.bytes.extend_from_slice(entries);
        offset
    }
}

/// `.debug_ranges` assembled one list at a time (8-byte addresses)
#[derive(Default)]
pub struct RangesBuilder
{
    pub bytes: Vec<u8>,
}

impl RangesBuilder
{
    /// Append `pairs` followed by a terminator and return the list offset
    pub fn list(&mut self, pairs: &[(u64, u64)]) -> u32
    {
        let offset = self.unterminated(pairs);
        self.bytes.extend_from_slice(&[0; 16]);
        offset
    }

    /// Append `pairs` without a terminator
    pub fn unterminated(&mut self, pairs: &[(u64, u64)]) -> u32
    {
        let offset = u32::try_from(self.bytes.len()).unwrap();
        for (first, second) in pairs {
            self.bytes.extend_from_slice(&first.to_le_bytes());
            self.bytes.extend_from_slice(&second.to_le_bytes());
        }
        offset
    }
}

/// Wrap named sections in a little-endian x86-64 ELF relocatable
pub fn elf(sections: &[(&str, &[u8])]) -> Vec<u8>
{
    let mut object = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    for (name, data) in sections {
        let kind = if name.starts_with(".debug") {
            SectionKind::Debug
        } else {
            SectionKind::Text
        };
        let id = object.add_section(Vec::new(), name.as_bytes().to_vec(), kind);
        object.append_section_data(id, data, 1);
    }
    object.write().unwrap()
}
