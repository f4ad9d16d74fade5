//! Abbreviation table decoding and the per-session table cache.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use gimli::{DwAt, DwForm, DwTag};
use smallvec::SmallVec;
use tracing::trace;

use crate::error::{DwarfError, DwarfResult};
use crate::reader::{ByteRegion, Cursor};

/// One `(attribute, form)` pair of an abbreviation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSpec
{
    pub name: DwAt,
    pub form: DwForm,
    /// The value stored in the table for `DW_FORM_implicit_const`
    pub implicit_const: Option<i64>,
}

/// The shape shared by every DIE that uses a given abbreviation code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abbreviation
{
    pub code: u64,
    pub tag: DwTag,
    pub has_children: bool,
    pub attributes: SmallVec<[AttributeSpec; 8]>,
}

/// Abbreviations of one table, keyed by code
///
/// Codes are unique within a table but not across tables.
#[derive(Debug, Clone, Default)]
pub struct AbbreviationTable
{
    offset: usize,
    entries: HashMap<u64, Abbreviation>,
}

fn malformed(offset: usize, reason: impl Into<String>) -> DwarfError
{
    DwarfError::MalformedAbbrevTable {
        offset,
        reason: reason.into(),
    }
}

fn read_u16_value(cursor: &mut Cursor<'_>, table_offset: usize, what: &str) -> DwarfResult<u16>
{
    let value = cursor
        .read_uleb128()
        .map_err(|_| malformed(table_offset, format!("truncated {what}")))?;
    u16::try_from(value).map_err(|_| malformed(table_offset, format!("{what} 0x{value:x} out of range")))
}

impl AbbreviationTable
{
    /// Decode the table that starts at `offset` in `.debug_abbrev`
    ///
    /// The table ends at a zero code. Reaching the end of the section exactly
    /// where a code is expected also ends the table.
    ///
    /// ## Errors
    ///
    /// Returns `OutOfBounds` if `offset` lies past the section, and
    /// `MalformedAbbrevTable` for truncated entries, invalid children flags,
    /// out-of-range numbers or duplicated codes.
    pub fn load(region: &ByteRegion, offset: usize) -> DwarfResult<Self>
    {
        if offset > region.len() {
            return Err(DwarfError::OutOfBounds {
                offset,
                len: 1,
                region_len: region.len(),
            });
        }

        let mut cursor = region.cursor(offset);
        let mut entries = HashMap::new();

        loop {
            if cursor.is_at_end() {
                break;
            }
            let code = cursor
                .read_uleb128()
                .map_err(|_| malformed(offset, "truncated abbreviation code"))?;
            if code == 0 {
                break;
            }

            let tag = DwTag(read_u16_value(&mut cursor, offset, "tag")?);
            let has_children = match cursor
                .read_u8()
                .map_err(|_| malformed(offset, "truncated children flag"))?
            {
                0 => false,
                1 => true,
                other => return Err(malformed(offset, format!("invalid children flag {other} for code {code}"))),
            };

            let mut attributes = SmallVec::new();
            loop {
                let name = read_u16_value(&mut cursor, offset, "attribute name")?;
                let form = read_u16_value(&mut cursor, offset, "attribute form")?;
                match (name, form) {
                    (0, 0) => break,
                    (0, _) | (_, 0) => {
                        return Err(malformed(offset, format!("half-empty attribute spec in code {code}")));
                    }
                    _ => {}
                }

                let form = DwForm(form);
                let implicit_const = if form == gimli::DW_FORM_implicit_const {
                    let value = cursor
                        .read_sleb128()
                        .map_err(|_| malformed(offset, "truncated implicit_const value"))?;
                    Some(value)
                } else {
                    None
                };
                attributes.push(AttributeSpec {
                    name: DwAt(name),
                    form,
                    implicit_const,
                });
            }

            let abbreviation = Abbreviation {
                code,
                tag,
                has_children,
                attributes,
            };
            if entries.insert(code, abbreviation).is_some() {
                return Err(malformed(offset, format!("duplicate abbreviation code {code}")));
            }
        }

        Ok(Self { offset, entries })
    }

    /// Offset of the table in `.debug_abbrev`
    pub fn offset(&self) -> usize
    {
        self.offset
    }

    pub fn get(&self, code: u64) -> Option<&Abbreviation>
    {
        self.entries.get(&code)
    }

    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }
}

/// Cache of decoded abbreviation tables keyed by section offset
///
/// Several units commonly share one table. The cache lives for one file
/// session and is never invalidated: the section bytes do not change while
/// it exists.
///
/// ## Thread Safety
///
/// Tables are immutable once built and handed out as `Arc`s. The map itself
/// sits behind an `RwLock`, so the cache can be shared across threads that
/// decode different units of the same file.
#[derive(Debug, Default)]
pub struct AbbrevCache
{
    tables: RwLock<HashMap<usize, Arc<AbbreviationTable>>>,
}

impl AbbrevCache
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Return the table at `offset`, decoding it on first use
    ///
    /// ## Errors
    ///
    /// Propagates any error from [`AbbreviationTable::load`]. Failed loads
    /// are not cached.
    pub fn get_or_load(&self, region: &ByteRegion, offset: usize) -> DwarfResult<Arc<AbbreviationTable>>
    {
        if let Some(existing) = self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&offset)
        {
            trace!(offset, "abbreviation cache hit");
            return Ok(Arc::clone(existing));
        }

        let table = Arc::new(AbbreviationTable::load(region, offset)?);
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have loaded the same table meanwhile; keep the first.
        let table = tables.entry(offset).or_insert(table);
        trace!(offset, entries = table.len(), "abbreviation table loaded");
        Ok(Arc::clone(table))
    }

    /// Returns true if both handles point at the same cached table
    pub fn is_same_table(a: &Arc<AbbreviationTable>, b: &Arc<AbbreviationTable>) -> bool
    {
        Arc::ptr_eq(a, b)
    }

    /// Number of distinct tables decoded so far
    pub fn len(&self) -> usize
    {
        self.tables.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    // code 1: compile_unit, children, (name, string), (ranges, sec_offset)
    // code 2: subprogram, no children, (name, string), (const_value, implicit_const -3)
    fn sample_table() -> Vec<u8>
    {
        vec![
            0x01, 0x11, 0x01, 0x03, 0x08, 0x55, 0x17, 0x00, 0x00, //
            0x02, 0x2e, 0x00, 0x03, 0x08, 0x1c, 0x21, 0x7d, 0x00, 0x00, //
            0x00,
        ]
    }

    #[test]
    fn test_load_decodes_entries()
    {
        let region = ByteRegion::from_vec(sample_table());
        let table = AbbreviationTable::load(&region, 0).unwrap();
        assert_eq!(table.len(), 2);

        let cu = table.get(1).unwrap();
        assert_eq!(cu.tag, gimli::DW_TAG_compile_unit);
        assert!(cu.has_children);
        assert_eq!(cu.attributes.len(), 2);
        assert_eq!(cu.attributes[1].name, gimli::DW_AT_ranges);
        assert_eq!(cu.attributes[1].form, gimli::DW_FORM_sec_offset);

        let sub = table.get(2).unwrap();
        assert!(!sub.has_children);
        assert_eq!(sub.attributes[1].implicit_const, Some(-3));
        assert!(table.get(3).is_none());
    }

    #[test]
    fn test_truncated_spec_pair_is_malformed()
    {
        // Attribute name present, form missing.
        let region = ByteRegion::from_vec(vec![0x01, 0x11, 0x00, 0x03]);
        let err = AbbreviationTable::load(&region, 0).unwrap_err();
        assert!(matches!(err, DwarfError::MalformedAbbrevTable { offset: 0, .. }));
    }

    #[test]
    fn test_bad_children_flag_is_malformed()
    {
        let region = ByteRegion::from_vec(vec![0x01, 0x11, 0x02, 0x00, 0x00, 0x00]);
        assert!(matches!(
            AbbreviationTable::load(&region, 0),
            Err(DwarfError::MalformedAbbrevTable { .. })
        ));
    }

    #[test]
    fn test_duplicate_code_is_malformed()
    {
        let region = ByteRegion::from_vec(vec![0x01, 0x11, 0x00, 0x00, 0x00, 0x01, 0x2e, 0x00, 0x00, 0x00, 0x00]);
        assert!(matches!(
            AbbreviationTable::load(&region, 0),
            Err(DwarfError::MalformedAbbrevTable { .. })
        ));
    }

    #[test]
    fn test_offset_past_section_is_out_of_bounds()
    {
        let region = ByteRegion::from_vec(sample_table());
        assert!(matches!(
            AbbreviationTable::load(&region, 100),
            Err(DwarfError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_cache_shares_tables_by_offset()
    {
        let mut bytes = sample_table();
        let second = bytes.len();
        bytes.extend_from_slice(&[0x01, 0x24, 0x00, 0x00, 0x00, 0x00]);
        let region = ByteRegion::from_vec(bytes);

        let cache = AbbrevCache::new();
        let a = cache.get_or_load(&region, 0).unwrap();
        let b = cache.get_or_load(&region, 0).unwrap();
        let c = cache.get_or_load(&region, second).unwrap();

        assert!(AbbrevCache::is_same_table(&a, &b));
        assert!(!AbbrevCache::is_same_table(&a, &c));
        assert_eq!(c.get(1).unwrap().tag, gimli::DW_TAG_base_type);
        assert_eq!(cache.len(), 2);
    }
}
