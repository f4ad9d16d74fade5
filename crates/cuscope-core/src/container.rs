//! # Container Reader
//!
//! Object-file parsing and debug section discovery.
//!
//! The container is parsed once with the `object` crate, which validates the
//! magic number and header and gives us the section directory. Debug sections
//! are then exposed as [`ByteRegion`] views into the file buffer; only
//! compressed sections are copied (into their decompressed form).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cuscope_core::container::Container;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>>
//! {
//!     let container = Container::from_path("/path/to/binary")?;
//!     if !container.has_debug_info() {
//!         println!("file has no DWARF info");
//!         return Ok(());
//!     }
//!
//!     let dwarf = container.dwarf()?;
//!     for unit in dwarf.units() {
//!         let unit = unit?;
//!         println!("{} {}", unit.offset(), unit.full_path());
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use gimli::{RunTimeEndian, SectionId};
use object::{CompressionFormat, Object, ObjectSection};
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::dwarf::{DwarfInfo, DwarfSections};
use crate::error::{CuscopeError, CuscopeResult, DwarfError};
use crate::reader::ByteRegion;
use crate::types::AddressSize;

/// Debug sections we load, with the names they go by in ELF and Mach-O files.
const DWARF_SECTIONS: &[(SectionId, &[&str])] = &[
    (SectionId::DebugAbbrev, &[".debug_abbrev", "__debug_abbrev"]),
    (SectionId::DebugAddr, &[".debug_addr", "__debug_addr"]),
    (SectionId::DebugInfo, &[".debug_info", "__debug_info"]),
    (SectionId::DebugLineStr, &[".debug_line_str", "__debug_line_str"]),
    (SectionId::DebugRanges, &[".debug_ranges", "__debug_ranges"]),
    (SectionId::DebugRngLists, &[".debug_rnglists", "__debug_rnglists"]),
    (SectionId::DebugStr, &[".debug_str", "__debug_str"]),
    (SectionId::DebugStrOffsets, &[".debug_str_offsets", "__debug_str_offsets"]),
];

/// One entry of the container's section directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo
{
    pub name: String,
    /// Offset of the section's bytes in the file, if it occupies any
    pub file_offset: Option<u64>,
    /// Size in the file (compressed size for compressed sections)
    pub file_size: u64,
    /// Size once decompressed
    pub size: u64,
    pub compressed: bool,
}

/// A parsed object file with its debug sections resolved.
pub struct Container
{
    data: Arc<[u8]>,
    format: object::BinaryFormat,
    architecture: object::Architecture,
    endian: RunTimeEndian,
    address_size: AddressSize,
    directory: Vec<SectionInfo>,
    debug_sections: HashMap<&'static str, ByteRegion>,
    dwarf_cache: OnceCell<DwarfInfo>,
}

fn load_section_region(file: &object::File<'_>, data: &Arc<[u8]>, names: &[&str]) -> CuscopeResult<Option<ByteRegion>>
{
    for name in names {
        if let Some(section) = file.section_by_name(name) {
            let range = section
                .compressed_file_range()
                .map_err(|err| CuscopeError::InvalidContainer(format!("failed to locate {name}: {err}")))?;

            if range.format == CompressionFormat::None {
                let (start, len) = match (usize::try_from(range.offset), usize::try_from(range.uncompressed_size)) {
                    (Ok(start), Ok(len)) => (start, len),
                    _ => return Err(CuscopeError::InvalidContainer(format!("{name} does not fit in memory"))),
                };
                let region = ByteRegion::new(Arc::clone(data), start, len)
                    .ok_or_else(|| CuscopeError::InvalidContainer(format!("{name} extends past the end of the file")))?;
                return Ok(Some(region));
            }

            let bytes = section
                .uncompressed_data()
                .map_err(|err| CuscopeError::InvalidContainer(format!("failed to decompress {name}: {err}")))?;
            debug!(section = name, size = bytes.len(), "decompressed debug section");
            return Ok(Some(ByteRegion::from_vec(bytes.into_owned())));
        }
    }

    Ok(None)
}

fn section_directory(file: &object::File<'_>) -> Vec<SectionInfo>
{
    file.sections()
        .map(|section| {
            let name = section.name().unwrap_or("<invalid>").to_string();
            let file_range = section.file_range();
            let compressed = section
                .compressed_file_range()
                .map(|range| range.format != CompressionFormat::None)
                .unwrap_or(false);
            SectionInfo {
                name,
                file_offset: file_range.map(|(offset, _)| offset),
                file_size: file_range.map_or(0, |(_, size)| size),
                size: section.size(),
                compressed,
            }
        })
        .collect()
}

impl Container
{
    /// Parse an object file from its bytes
    ///
    /// ## Errors
    ///
    /// Returns `InvalidContainer` if the magic number or header is not
    /// recognised, or a debug section lies outside the file.
    pub fn open(bytes: impl Into<Arc<[u8]>>) -> CuscopeResult<Self>
    {
        let data: Arc<[u8]> = bytes.into();

        let (format, architecture, endian, address_size, directory, debug_sections) = {
            let file = object::File::parse(&*data)
                .map_err(|err| CuscopeError::InvalidContainer(format!("failed to parse object file: {err}")))?;

            let endian = if file.is_little_endian() {
                RunTimeEndian::Little
            } else {
                RunTimeEndian::Big
            };
            let address_size = if file.is_64() {
                AddressSize::EIGHT
            } else {
                AddressSize::FOUR
            };

            let mut sections = HashMap::new();
            for (id, aliases) in DWARF_SECTIONS {
                if let Some(region) = load_section_region(&file, &data, aliases)? {
                    sections.insert(id.name(), region);
                }
            }

            (
                file.format(),
                file.architecture(),
                endian,
                address_size,
                section_directory(&file),
                sections,
            )
        };

        debug!(
            ?format,
            ?architecture,
            ?endian,
            %address_size,
            debug_sections = debug_sections.len(),
            "opened container"
        );

        Ok(Self {
            data,
            format,
            architecture,
            endian,
            address_size,
            directory,
            debug_sections,
            dwarf_cache: OnceCell::new(),
        })
    }

    /// Read and parse an object file from disk
    ///
    /// ## Errors
    ///
    /// Returns `Io` if the file cannot be read, otherwise as [`Container::open`].
    pub fn from_path(path: impl AsRef<Path>) -> CuscopeResult<Self>
    {
        let bytes = fs::read(path.as_ref())?;
        Self::open(bytes)
    }

    pub fn format(&self) -> object::BinaryFormat
    {
        self.format
    }

    pub fn architecture(&self) -> object::Architecture
    {
        self.architecture
    }

    pub fn endian(&self) -> RunTimeEndian
    {
        self.endian
    }

    /// Address width declared by the container header
    ///
    /// Units carry their own address size; this is the file-level default.
    pub fn address_size(&self) -> AddressSize
    {
        self.address_size
    }

    /// The section directory in file order
    pub fn sections(&self) -> &[SectionInfo]
    {
        &self.directory
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str>
    {
        self.directory.iter().map(|section| section.name.as_str())
    }

    /// Look up a section's bytes by name
    ///
    /// Debug sections are found under their ELF name (`.debug_info`) whatever
    /// the container format. Other sections are returned as views of their
    /// file bytes; compressed non-debug sections are not supported and yield
    /// `None`.
    pub fn section(&self, name: &str) -> Option<ByteRegion>
    {
        if let Some(region) = self.debug_sections.get(name) {
            return Some(region.clone());
        }

        let info = self
            .directory
            .iter()
            .find(|section| section.name == name && !section.compressed)?;
        let start = usize::try_from(info.file_offset?).ok()?;
        let len = usize::try_from(info.file_size).ok()?;
        ByteRegion::new(Arc::clone(&self.data), start, len)
    }

    /// Look up a DWARF section by id
    pub fn debug_section(&self, id: SectionId) -> Option<ByteRegion>
    {
        self.debug_sections.get(id.name()).cloned()
    }

    /// Returns true if the container has a `.debug_info` section
    pub fn has_debug_info(&self) -> bool
    {
        self.debug_sections.contains_key(SectionId::DebugInfo.name())
    }

    /// The DWARF session for this container, built on first use
    ///
    /// ## Errors
    ///
    /// Returns `MissingSection` if the container has no `.debug_info`.
    pub fn dwarf(&self) -> CuscopeResult<&DwarfInfo>
    {
        self.dwarf_cache.get_or_try_init(|| -> CuscopeResult<DwarfInfo> {
            let info = self
                .debug_section(SectionId::DebugInfo)
                .ok_or(DwarfError::MissingSection(".debug_info"))?;
            let sections = DwarfSections {
                info,
                abbrev: self.debug_section(SectionId::DebugAbbrev),
                str: self.debug_section(SectionId::DebugStr),
                line_str: self.debug_section(SectionId::DebugLineStr),
                str_offsets: self.debug_section(SectionId::DebugStrOffsets),
                addr: self.debug_section(SectionId::DebugAddr),
                ranges: self.debug_section(SectionId::DebugRanges),
                rnglists: self.debug_section(SectionId::DebugRngLists),
            };
            Ok(DwarfInfo::new(sections, self.endian))
        })
    }
}
