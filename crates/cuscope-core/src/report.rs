//! # Range Size Reporting
//!
//! Sums the address ranges of every compile unit that declares a
//! `DW_AT_ranges` list and hands `(path, size)` pairs to a [`ReportSink`].
//!
//! Failures are isolated per unit: a unit whose list cannot be resolved is
//! reported through [`ReportSink::unit_failed`] and the run moves on, unless
//! [`ReportOptions::fail_fast`] is set.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::io;
//! use std::sync::atomic::AtomicBool;
//!
//! use cuscope_core::container::Container;
//! use cuscope_core::report::{LineSink, RangeSizeReporter, ReportOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let container = Container::from_path("/path/to/binary")?;
//! let mut sink = LineSink::new(io::stdout(), io::stderr());
//! let reporter = RangeSizeReporter::new(ReportOptions::default());
//! let summary = reporter.report_container(&container, &mut sink, &AtomicBool::new(false))?;
//! eprintln!("{} unit(s) reported", summary.reported);
//! # Ok(())
//! # }
//! ```

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::container::Container;
use crate::dwarf::DwarfInfo;
use crate::error::{CuscopeError, CuscopeResult, UnitError};
use crate::types::range_size;

/// Informational line for a container without `.debug_info`
pub const NO_DWARF_NOTE: &str = "file has no DWARF info";

/// Informational line for a container without any range list section
pub const NO_RANGES_NOTE: &str = "file has no .debug_ranges section";

/// Receives the results of a report run
pub trait ReportSink
{
    /// A unit's total range size
    fn record(&mut self, path: &str, size: u64) -> io::Result<()>;

    /// A unit that could not be decoded or whose ranges could not be resolved
    fn unit_failed(&mut self, error: &UnitError) -> io::Result<()>;

    /// An informational message about the file as a whole
    fn note(&mut self, message: &str) -> io::Result<()>;
}

/// Writes `<path> <size>` lines to one writer and failures to another
pub struct LineSink<W, E>
{
    out: W,
    err: E,
}

impl<W: Write, E: Write> LineSink<W, E>
{
    pub fn new(out: W, err: E) -> Self
    {
        Self { out, err }
    }

    pub fn into_inner(self) -> (W, E)
    {
        (self.out, self.err)
    }
}

impl<W: Write, E: Write> ReportSink for LineSink<W, E>
{
    fn record(&mut self, path: &str, size: u64) -> io::Result<()>
    {
        writeln!(self.out, "{path} {size}")
    }

    fn unit_failed(&mut self, error: &UnitError) -> io::Result<()>
    {
        writeln!(self.err, "error: {error}")
    }

    fn note(&mut self, message: &str) -> io::Result<()>
    {
        writeln!(self.out, "  {message}")
    }
}

/// One event seen by a [`CollectingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent
{
    Record
    {
        path: String,
        size: u64,
    },
    Failed(UnitError),
    Note(String),
}

/// Keeps every event in memory, in the order it arrived
#[derive(Debug, Clone, Default)]
pub struct CollectingSink
{
    events: Vec<ReportEvent>,
}

impl CollectingSink
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn events(&self) -> &[ReportEvent]
    {
        &self.events
    }

    /// The recorded `(path, size)` pairs
    pub fn records(&self) -> Vec<(&str, u64)>
    {
        self.events
            .iter()
            .filter_map(|event| match event {
                ReportEvent::Record { path, size } => Some((path.as_str(), *size)),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<&UnitError>
    {
        self.events
            .iter()
            .filter_map(|event| match event {
                ReportEvent::Failed(error) => Some(error),
                _ => None,
            })
            .collect()
    }

    pub fn notes(&self) -> Vec<&str>
    {
        self.events
            .iter()
            .filter_map(|event| match event {
                ReportEvent::Note(message) => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Send the collected events to another sink, in order
    ///
    /// ## Errors
    ///
    /// Stops at the first error from `sink`.
    pub fn replay(&self, sink: &mut impl ReportSink) -> io::Result<()>
    {
        for event in &self.events {
            match event {
                ReportEvent::Record { path, size } => sink.record(path, *size)?,
                ReportEvent::Failed(error) => sink.unit_failed(error)?,
                ReportEvent::Note(message) => sink.note(message)?,
            }
        }
        Ok(())
    }
}

impl ReportSink for CollectingSink
{
    fn record(&mut self, path: &str, size: u64) -> io::Result<()>
    {
        self.events.push(ReportEvent::Record {
            path: path.to_string(),
            size,
        });
        Ok(())
    }

    fn unit_failed(&mut self, error: &UnitError) -> io::Result<()>
    {
        self.events.push(ReportEvent::Failed(error.clone()));
        Ok(())
    }

    fn note(&mut self, message: &str) -> io::Result<()>
    {
        self.events.push(ReportEvent::Note(message.to_string()));
        Ok(())
    }
}

/// Options for a report run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportOptions
{
    /// Stop at the first failing unit instead of reporting it and moving on
    pub fail_fast: bool,
}

/// Counts from one report run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSummary
{
    /// Units whose size was recorded
    pub reported: usize,
    /// Units that are not compile units or have no `DW_AT_ranges`
    pub skipped: usize,
    /// Units handed to `unit_failed`
    pub failed: usize,
    /// True if the run stopped because the cancel flag was set
    pub cancelled: bool,
}

/// Computes per-unit range sizes
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeSizeReporter
{
    options: ReportOptions,
}

impl RangeSizeReporter
{
    pub fn new(options: ReportOptions) -> Self
    {
        Self { options }
    }

    pub fn options(&self) -> ReportOptions
    {
        self.options
    }

    fn fail(&self, error: UnitError, sink: &mut impl ReportSink, summary: &mut ReportSummary) -> CuscopeResult<()>
    {
        if self.options.fail_fast {
            return Err(CuscopeError::Unit(error));
        }
        sink.unit_failed(&error)?;
        summary.failed += 1;
        Ok(())
    }

    /// Report every qualifying unit of `dwarf`, in section order
    ///
    /// `cancel` is checked before each unit.
    ///
    /// ## Errors
    ///
    /// `Io` if the sink fails, and the first unit error when `fail_fast` is
    /// set.
    pub fn run(&self, dwarf: &DwarfInfo, sink: &mut impl ReportSink, cancel: &AtomicBool) -> CuscopeResult<ReportSummary>
    {
        let mut summary = ReportSummary::default();

        for unit in dwarf.units() {
            if cancel.load(Ordering::Relaxed) {
                info!("report cancelled");
                summary.cancelled = true;
                break;
            }

            let unit = match unit {
                Ok(unit) => unit,
                Err(err) => {
                    self.fail(err, sink, &mut summary)?;
                    continue;
                }
            };

            if unit.tag() != gimli::DW_TAG_compile_unit {
                debug!(offset = unit.offset(), tag = %unit.tag(), "skipping unit: not a compile unit");
                summary.skipped += 1;
                continue;
            }

            match unit.ranges() {
                Ok(Some(ranges)) => {
                    let path = unit.full_path();
                    let size = range_size(&ranges);
                    debug!(offset = unit.offset(), %path, size, ranges = ranges.len(), "unit range size");
                    sink.record(&path, size)?;
                    summary.reported += 1;
                }
                Ok(None) => {
                    debug!(offset = unit.offset(), "skipping unit: no DW_AT_ranges");
                    summary.skipped += 1;
                }
                Err(err) => {
                    warn!(offset = unit.offset(), error = %err, "failed to resolve unit ranges");
                    self.fail(UnitError::new(unit.offset(), err), sink, &mut summary)?;
                }
            }
        }

        Ok(summary)
    }

    /// Report a whole container
    ///
    /// A container without `.debug_info`, or without any range list section,
    /// produces a single note and an empty summary.
    ///
    /// ## Errors
    ///
    /// As [`RangeSizeReporter::run`].
    pub fn report_container(
        &self,
        container: &Container,
        sink: &mut impl ReportSink,
        cancel: &AtomicBool,
    ) -> CuscopeResult<ReportSummary>
    {
        if !container.has_debug_info() {
            sink.note(NO_DWARF_NOTE)?;
            return Ok(ReportSummary::default());
        }

        let dwarf = container.dwarf()?;
        if !dwarf.has_range_sections() {
            sink.note(NO_RANGES_NOTE)?;
            return Ok(ReportSummary::default());
        }

        self.run(dwarf, sink, cancel)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::error::DwarfError;

    #[test]
    fn test_line_sink_formats()
    {
        let mut sink = LineSink::new(Vec::new(), Vec::new());
        sink.record("src/main.c", 32).unwrap();
        sink.note(NO_RANGES_NOTE).unwrap();
        sink.unit_failed(&UnitError::new(0x2a, DwarfError::UnterminatedRangeList(0x10)))
            .unwrap();

        let (out, err) = sink.into_inner();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "src/main.c 32\n  file has no .debug_ranges section\n"
        );
        assert_eq!(
            String::from_utf8(err).unwrap(),
            "error: Unit at offset 0x2a: Range list at offset 0x10 is not terminated\n"
        );
    }

    #[test]
    fn test_collecting_sink_replays_in_order()
    {
        let mut collected = CollectingSink::new();
        collected.record("a.c", 1).unwrap();
        collected.note("hello").unwrap();
        collected.record("b.c", 2).unwrap();
        assert_eq!(collected.records(), vec![("a.c", 1), ("b.c", 2)]);
        assert_eq!(collected.notes(), vec!["hello"]);
        assert!(collected.failures().is_empty());

        let mut lines = LineSink::new(Vec::new(), Vec::new());
        collected.replay(&mut lines).unwrap();
        let (out, _) = lines.into_inner();
        assert_eq!(String::from_utf8(out).unwrap(), "a.c 1\n  hello\nb.c 2\n");
    }

    #[test]
    fn test_cancelled_run_reports_nothing()
    {
        use crate::dwarf::DwarfSections;
        use crate::reader::ByteRegion;

        // One minimal v4 unit; never decoded because the flag is already set.
        let mut info = 7u32.to_le_bytes().to_vec();
        info.extend_from_slice(&[4, 0, 0, 0, 0, 0, 8]);
        let dwarf = DwarfInfo::new(DwarfSections::new(ByteRegion::from_vec(info)), gimli::RunTimeEndian::Little);

        let mut sink = CollectingSink::new();
        let summary = RangeSizeReporter::default()
            .run(&dwarf, &mut sink, &AtomicBool::new(true))
            .unwrap();
        assert!(summary.cancelled);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_fail_fast_returns_first_unit_error()
    {
        use crate::dwarf::DwarfSections;
        use crate::reader::ByteRegion;

        // A header with no .debug_abbrev to resolve against.
        let mut info = 8u32.to_le_bytes().to_vec();
        info.extend_from_slice(&[4, 0, 0, 0, 0, 0, 8, 1]);
        let dwarf = DwarfInfo::new(DwarfSections::new(ByteRegion::from_vec(info)), gimli::RunTimeEndian::Little);
        let cancel = AtomicBool::new(false);

        let mut sink = CollectingSink::new();
        let summary = RangeSizeReporter::default().run(&dwarf, &mut sink, &cancel).unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(
            sink.failures()[0].source,
            DwarfError::MissingSection(".debug_abbrev")
        );

        let strict = RangeSizeReporter::new(ReportOptions { fail_fast: true });
        let err = strict.run(&dwarf, &mut CollectingSink::new(), &cancel).unwrap_err();
        assert!(matches!(err, CuscopeError::Unit(UnitError { unit_offset: 0, .. })));
    }
}
