//! DIE decoding into an arena-backed tree.
//!
//! DIEs live in a `Vec` owned by [`DieTree`] and refer to each other by
//! [`DieId`]. A child stores its parent's index, so walking back to the root
//! needs no reference counting and the tree cannot form cycles.

use std::ops::Index;

use gimli::{DwAt, DwTag};
use smallvec::SmallVec;

use super::abbrev::AbbreviationTable;
use super::form::{read_value, AttrValue, AttributeValue, Form, RawValue};
use super::unit::{Encoding, UnitBases};
use super::DwarfSections;
use crate::error::{DwarfError, DwarfResult};
use crate::reader::{ByteRegion, Cursor};

/// Index of a DIE inside its [`DieTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DieId(usize);

impl DieId
{
    pub fn index(self) -> usize
    {
        self.0
    }
}

/// One debugging information entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Die
{
    offset: usize,
    tag: DwTag,
    has_children: bool,
    attributes: SmallVec<[AttributeValue; 8]>,
    children: Vec<DieId>,
    parent: Option<DieId>,
}

impl Die
{
    /// Offset of the entry in `.debug_info`; this is the DIE's identity
    pub fn offset(&self) -> usize
    {
        self.offset
    }

    pub fn tag(&self) -> DwTag
    {
        self.tag
    }

    /// Whether the abbreviation declares children (the list may still be empty)
    pub fn has_children(&self) -> bool
    {
        self.has_children
    }

    /// Attributes in declaration order
    pub fn attributes(&self) -> &[AttributeValue]
    {
        &self.attributes
    }

    pub fn attr(&self, name: DwAt) -> Option<&AttributeValue>
    {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    pub fn attr_value(&self, name: DwAt) -> Option<&AttrValue>
    {
        self.attr(name).map(|attr| &attr.value)
    }

    /// `DW_AT_name`, if present as a string
    pub fn name(&self) -> Option<&str>
    {
        self.attr_value(gimli::DW_AT_name).and_then(AttrValue::as_str)
    }

    pub fn children(&self) -> &[DieId]
    {
        &self.children
    }

    pub fn parent(&self) -> Option<DieId>
    {
        self.parent
    }
}

/// A decoded DIE and everything below it
///
/// The root is always `DieId(0)`; DIEs are stored in decode (pre-)order, so
/// offsets increase with the index. A tree is never empty: it is only built
/// around a root by [`decode_die`] or when a unit is enumerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DieTree
{
    dies: Vec<Die>,
}

impl DieTree
{
    fn push(&mut self, mut die: Die, parent: Option<DieId>) -> DieId
    {
        let id = DieId(self.dies.len());
        die.parent = parent;
        self.dies.push(die);
        if let Some(parent) = parent {
            self.dies[parent.0].children.push(id);
        }
        id
    }

    /// A tree holding a single top-level DIE
    pub(crate) fn from_root(die: Die) -> Self
    {
        let mut tree = Self { dies: Vec::new() };
        tree.push(die, None);
        tree
    }

    pub fn root(&self) -> DieId
    {
        DieId(0)
    }

    pub fn root_die(&self) -> &Die
    {
        &self.dies[0]
    }

    pub fn get(&self, id: DieId) -> Option<&Die>
    {
        self.dies.get(id.0)
    }

    pub fn len(&self) -> usize
    {
        self.dies.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.dies.is_empty()
    }

    /// All DIEs in decode order
    pub fn iter(&self) -> impl Iterator<Item = (DieId, &Die)>
    {
        self.dies.iter().enumerate().map(|(index, die)| (DieId(index), die))
    }

    /// Find a DIE by its `.debug_info` offset
    pub fn find_by_offset(&self, offset: usize) -> Option<DieId>
    {
        self.dies
            .binary_search_by_key(&offset, |die| die.offset)
            .ok()
            .map(DieId)
    }

    /// `id` and its ancestors, innermost first
    pub fn ancestors(&self, id: DieId) -> impl Iterator<Item = (DieId, &Die)>
    {
        let mut current = self.get(id).map(|die| (id, die));
        std::iter::from_fn(move || {
            let item = current?;
            current = item.1.parent.and_then(|parent| self.get(parent).map(|die| (parent, die)));
            Some(item)
        })
    }

    /// Human-readable path of a DIE
    ///
    /// Joins the `DW_AT_name` values from the root down to `id` with `/`,
    /// prefixed by the root's `DW_AT_comp_dir`. An absolute name discards
    /// what came before it. Returns `None` when no component has a name.
    pub fn full_path(&self, id: DieId) -> Option<String>
    {
        let mut names: Vec<&str> = self.ancestors(id).filter_map(|(_, die)| die.name()).collect();
        if let Some(dir) = self
            .dies
            .first()
            .and_then(|root| root.attr_value(gimli::DW_AT_comp_dir))
            .and_then(AttrValue::as_str)
        {
            names.push(dir);
        }
        if names.is_empty() {
            return None;
        }

        let mut path = String::new();
        for component in names.iter().rev() {
            if component.starts_with('/') {
                path.clear();
            } else if !path.is_empty() && !path.ends_with('/') {
                path.push('/');
            }
            path.push_str(component);
        }
        Some(path)
    }
}

impl Index<DieId> for DieTree
{
    type Output = Die;

    fn index(&self, id: DieId) -> &Self::Output
    {
        &self.dies[id.0]
    }
}

/// Everything needed to decode the entries of one unit
pub struct DecodeContext<'a>
{
    /// `.debug_info` truncated at the end of the unit
    pub region: &'a ByteRegion,
    pub abbrevs: &'a AbbreviationTable,
    pub encoding: Encoding,
    pub sections: &'a DwarfSections,
    pub bases: UnitBases,
    pub unit_offset: usize,
}

/// An entry whose attributes have been read but not resolved
pub(crate) struct RawEntry
{
    offset: usize,
    tag: DwTag,
    has_children: bool,
    attributes: SmallVec<[(DwAt, Form, RawValue); 8]>,
}

impl RawEntry
{
    pub(crate) fn raw_value(&self, name: DwAt) -> Option<&RawValue>
    {
        self.attributes
            .iter()
            .find(|(attr, _, _)| *attr == name)
            .map(|(_, _, value)| value)
    }

    /// Resolve section offsets and indices using the context's unit bases
    pub(crate) fn resolve(self, ctx: &DecodeContext<'_>) -> DwarfResult<Die>
    {
        let mut attributes = SmallVec::with_capacity(self.attributes.len());
        for (name, form, raw) in self.attributes {
            let value = ctx.resolve(raw)?;
            attributes.push(AttributeValue { name, form, value });
        }
        Ok(Die {
            offset: self.offset,
            tag: self.tag,
            has_children: self.has_children,
            attributes,
            children: Vec::new(),
            parent: None,
        })
    }
}

impl DecodeContext<'_>
{
    fn resolve(&self, raw: RawValue) -> DwarfResult<AttrValue>
    {
        match raw {
            RawValue::Value(value) => Ok(value),
            RawValue::StrOffset(offset) => self.sections.string_at(offset).map(AttrValue::String),
            RawValue::LineStrOffset(offset) => self.sections.line_string_at(offset).map(AttrValue::String),
            RawValue::StrIndex(index) => self
                .sections
                .indexed_string(index, &self.bases, &self.encoding, self.unit_offset)
                .map(AttrValue::String),
            RawValue::AddrIndex(index) => self
                .sections
                .indexed_address(index, &self.bases, &self.encoding, self.unit_offset)
                .map(AttrValue::Address),
        }
    }
}

/// Read one entry at the cursor without resolving it
///
/// Returns `None` for the null entry (abbreviation code 0).
pub(crate) fn read_raw_entry(ctx: &DecodeContext<'_>, cursor: &mut Cursor<'_>) -> DwarfResult<Option<RawEntry>>
{
    let offset = cursor.position();
    let code = cursor.read_uleb128()?;
    if code == 0 {
        return Ok(None);
    }

    let abbrev = ctx
        .abbrevs
        .get(code)
        .ok_or(DwarfError::UnknownAbbrevCode { code, offset })?;

    let mut attributes: SmallVec<[(DwAt, Form, RawValue); 8]> = SmallVec::with_capacity(abbrev.attributes.len());
    for spec in &abbrev.attributes {
        let (form, value) = read_value(cursor, spec.form, spec.implicit_const, &ctx.encoding, ctx.unit_offset)?;
        if attributes.iter().any(|(name, _, _)| *name == spec.name) {
            return Err(DwarfError::MalformedDie {
                offset,
                reason: format!("attribute {} appears more than once", spec.name),
            });
        }
        attributes.push((spec.name, form, value));
    }

    Ok(Some(RawEntry {
        offset,
        tag: abbrev.tag,
        has_children: abbrev.has_children,
        attributes,
    }))
}

/// Decode the single entry at `offset`, without its children
///
/// Returns `None` with the next offset when the entry is a null entry.
///
/// ## Errors
///
/// `UnknownAbbrevCode`, `UnsupportedForm`, `OutOfBounds` or `MalformedDie`.
pub fn decode_entry(ctx: &DecodeContext<'_>, offset: usize) -> DwarfResult<(Option<Die>, usize)>
{
    let mut cursor = ctx.region.cursor(offset);
    let die = match read_raw_entry(ctx, &mut cursor)? {
        Some(raw) => Some(raw.resolve(ctx)?),
        None => None,
    };
    Ok((die, cursor.position()))
}

/// Decode the DIE at `offset` and all of its descendants
///
/// Children are read iteratively: the only bound on nesting depth is the
/// size of the unit. Returns the tree and the offset just past the subtree.
///
/// ## Errors
///
/// `UnterminatedChildren` if the unit ends while a children list is open,
/// `MalformedDie` if `offset` holds a null entry, and any error from
/// [`decode_entry`].
pub fn decode_die(ctx: &DecodeContext<'_>, offset: usize) -> DwarfResult<(DieTree, usize)>
{
    let mut cursor = ctx.region.cursor(offset);

    let root = read_raw_entry(ctx, &mut cursor)?.ok_or_else(|| DwarfError::MalformedDie {
        offset,
        reason: "null entry where a DIE was expected".to_string(),
    })?;
    let mut tree = DieTree::from_root(root.resolve(ctx)?);
    let root = tree.root();

    let mut open: Vec<DieId> = Vec::new();
    if tree[root].has_children {
        open.push(root);
    }

    while let Some(&parent) = open.last() {
        if cursor.is_at_end() {
            return Err(DwarfError::UnterminatedChildren(tree[parent].offset));
        }
        match read_raw_entry(ctx, &mut cursor)? {
            None => {
                open.pop();
            }
            Some(raw) => {
                let id = tree.push(raw.resolve(ctx)?, Some(parent));
                if tree[id].has_children {
                    open.push(id);
                }
            }
        }
    }

    Ok((tree, cursor.position()))
}

#[cfg(test)]
mod tests
{
    use gimli::RunTimeEndian;

    use super::*;
    use crate::dwarf::unit::DwarfFormat;
    use crate::types::AddressSize;

    // code 1: compile_unit, children, (name, string)
    // code 2: subprogram, no children, (name, string)
    // code 3: lexical_block, children, no attributes
    // code 4: variable, no children, (name, string), (name, string)
    // code 5: variable, no children, (location, form 0x7f)
    const ABBREVS: &[u8] = &[
        0x01, 0x11, 0x01, 0x03, 0x08, 0x00, 0x00, //
        0x02, 0x2e, 0x00, 0x03, 0x08, 0x00, 0x00, //
        0x03, 0x0b, 0x01, 0x00, 0x00, //
        0x04, 0x34, 0x00, 0x03, 0x08, 0x03, 0x08, 0x00, 0x00, //
        0x05, 0x34, 0x00, 0x02, 0x7f, 0x00, 0x00, //
        0x00,
    ];

    struct Fixture
    {
        region: ByteRegion,
        abbrevs: AbbreviationTable,
        sections: DwarfSections,
    }

    impl Fixture
    {
        fn new(info: Vec<u8>) -> Self
        {
            let region = ByteRegion::from_vec(info);
            let abbrevs = AbbreviationTable::load(&ByteRegion::from_vec(ABBREVS.to_vec()), 0).unwrap();
            let sections = DwarfSections::new(region.clone());
            Self {
                region,
                abbrevs,
                sections,
            }
        }

        fn ctx(&self) -> DecodeContext<'_>
        {
            DecodeContext {
                region: &self.region,
                abbrevs: &self.abbrevs,
                encoding: Encoding {
                    endian: RunTimeEndian::Little,
                    format: DwarfFormat::Dwarf32,
                    version: 4,
                    address_size: AddressSize::EIGHT,
                },
                sections: &self.sections,
                bases: UnitBases::default(),
                unit_offset: 0,
            }
        }
    }

    #[test]
    fn test_single_terminator_gives_empty_children()
    {
        let fixture = Fixture::new(vec![0x01, b'a', 0x00, 0x00]);
        let (tree, next) = decode_die(&fixture.ctx(), 0).unwrap();
        assert_eq!(tree.len(), 1);
        assert!(tree.root_die().has_children());
        assert!(tree.root_die().children().is_empty());
        assert_eq!(next, 4);
    }

    #[test]
    fn test_missing_terminator_is_unterminated_children()
    {
        let fixture = Fixture::new(vec![0x01, b'a', 0x00, 0x02, b'f', 0x00]);
        let err = decode_die(&fixture.ctx(), 0).unwrap_err();
        assert_eq!(err, DwarfError::UnterminatedChildren(0));
    }

    #[test]
    fn test_nested_children_keep_order_and_parents()
    {
        // cu { f, block { g }, h }
        let info = vec![
            0x01, b'c', b'u', 0x00, //
            0x02, b'f', 0x00, //
            0x03, //
            0x02, b'g', 0x00, //
            0x00, //
            0x02, b'h', 0x00, //
            0x00,
        ];
        let fixture = Fixture::new(info);
        let (tree, next) = decode_die(&fixture.ctx(), 0).unwrap();
        assert_eq!(next, 16);
        assert_eq!(tree.len(), 5);

        let root = tree.root_die();
        let names: Vec<_> = root.children().iter().map(|&id| tree[id].name()).collect();
        assert_eq!(names, vec![Some("f"), None, Some("h")]);

        let block = root.children()[1];
        assert_eq!(tree[block].tag(), gimli::DW_TAG_lexical_block);
        let g = tree[block].children()[0];
        assert_eq!(tree[g].parent(), Some(block));
        assert_eq!(tree[g].offset(), 8);
        assert_eq!(tree.find_by_offset(8), Some(g));
        assert_eq!(tree.full_path(g).as_deref(), Some("cu/g"));
    }

    #[test]
    fn test_unknown_code_is_reported()
    {
        let fixture = Fixture::new(vec![0x09, 0x00]);
        assert_eq!(
            decode_die(&fixture.ctx(), 0).unwrap_err(),
            DwarfError::UnknownAbbrevCode { code: 9, offset: 0 }
        );
    }

    #[test]
    fn test_repeated_attribute_is_malformed()
    {
        let fixture = Fixture::new(vec![0x04, b'a', 0x00, b'b', 0x00]);
        assert!(matches!(
            decode_die(&fixture.ctx(), 0),
            Err(DwarfError::MalformedDie { offset: 0, .. })
        ));
    }

    #[test]
    fn test_unsupported_form_aborts_entry()
    {
        let fixture = Fixture::new(vec![0x05, 0x01, 0x02]);
        assert_eq!(
            decode_die(&fixture.ctx(), 0).unwrap_err(),
            DwarfError::UnsupportedForm { form: 0x7f, offset: 1 }
        );
    }

    #[test]
    fn test_null_entry_is_not_materialised()
    {
        let fixture = Fixture::new(vec![0x00, 0x02, b'f', 0x00]);
        let (die, next) = decode_entry(&fixture.ctx(), 0).unwrap();
        assert!(die.is_none());
        assert_eq!(next, 1);
        assert!(matches!(decode_die(&fixture.ctx(), 0), Err(DwarfError::MalformedDie { .. })));
    }

    #[test]
    fn test_full_path_prefers_absolute_names()
    {
        let fixture = Fixture::new(vec![0x02, b'/', b'x', 0x00]);
        let (tree, _) = decode_die(&fixture.ctx(), 0).unwrap();
        assert_eq!(tree.full_path(tree.root()).as_deref(), Some("/x"));
    }

    #[test]
    fn test_tree_from_shallow_entry_has_root()
    {
        let fixture = Fixture::new(vec![0x02, b'f', 0x00]);
        let (die, _) = decode_entry(&fixture.ctx(), 0).unwrap();
        let tree = DieTree::from_root(die.unwrap());
        assert_eq!(tree.len(), 1);
        assert!(!tree.is_empty());
        assert_eq!(tree.root_die().tag(), gimli::DW_TAG_subprogram);
        assert_eq!(tree.get(tree.root()).and_then(Die::name), Some("f"));
        assert_eq!(tree.root_die().parent(), None);
    }
}
