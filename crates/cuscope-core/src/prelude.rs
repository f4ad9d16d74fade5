//! Common module for library exports

pub use crate::container::{Container, SectionInfo};
pub use crate::dwarf::{CompileUnit, Die, DieId, DieTree, DwarfInfo, DwarfSections};
pub use crate::error::{CuscopeError, CuscopeResult, DwarfError, DwarfResult, UnitError};
pub use crate::reader::{ByteRegion, Cursor};
pub use crate::report::{CollectingSink, LineSink, RangeSizeReporter, ReportOptions, ReportSink, ReportSummary};
pub use crate::types::{range_size, Address, AddressSize, RangeEntry, ResolvedRange};
