use std::error::Error;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use cuscope_core::container::Container;
use cuscope_core::error::{CuscopeResult, UnitError};
use cuscope_core::report::{CollectingSink, LineSink, RangeSizeReporter, ReportOptions, ReportSink, ReportSummary};
use cuscope_utils::{debug, info, init_logging_with, warn, LogFormat, LogLevel, LoggingConfig};
use tokio::sync::Semaphore;

/// Report the address-range size of DWARF compile units.
#[derive(Parser, Debug)]
#[command(name = "cuscope")]
#[command(version)]
#[command(about = "Report the address-range size of every DWARF compile unit that uses a range list", long_about = None)]
struct Cli
{
    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log output format (overrides CUSCOPE_LOG_FORMAT)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Print the total range size of each compile unit with DW_AT_ranges
    Ranges
    {
        /// Object files to inspect
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Number of files processed concurrently
        #[arg(short, long, default_value_t = default_jobs())]
        jobs: usize,
        /// Stop a file at its first failing unit
        #[arg(long, default_value_t = false)]
        fail_fast: bool,
    },
    /// List every unit with its version, address size, tag and path
    Units
    {
        /// Object files to inspect
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Number of files processed concurrently
        #[arg(short, long, default_value_t = default_jobs())]
        jobs: usize,
    },
    /// List the sections of an object file
    Sections
    {
        /// Object file to inspect
        file: PathBuf,
    },
}

type FileResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Result of reporting one file
struct RangesReport
{
    events: CollectingSink,
    outcome: CuscopeResult<ReportSummary>,
}

fn default_jobs() -> usize
{
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

fn main()
{
    let cli = Cli::parse();

    let config = match LoggingConfig::from_env() {
        Ok(config) => config.with_overrides(cli.log_level, cli.log_format),
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };
    let _guard = match init_logging_with(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    if let Err(e) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::Relaxed)) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    match runtime.block_on(run_command(cli.command, cancel)) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

/// Run a subcommand; returns false if any file could not be processed
async fn run_command(command: Commands, cancel: Arc<AtomicBool>) -> Result<bool, Box<dyn Error>>
{
    match command {
        Commands::Ranges { files, jobs, fail_fast } => {
            let reporter = RangeSizeReporter::new(ReportOptions { fail_fast });
            let results = for_each_file(&files, jobs, &cancel, move |path, cancel| {
                let container = Container::from_path(path)?;
                let mut events = CollectingSink::new();
                let outcome = reporter.report_container(&container, &mut events, cancel);
                Ok(RangesReport { events, outcome })
            })
            .await;
            print_ranges(&files, results)
        }
        Commands::Units { files, jobs } => {
            let results = for_each_file(&files, jobs, &cancel, |path, cancel| list_units(path, cancel)).await;
            print_units(&files, results)
        }
        Commands::Sections { file } => {
            print_sections(&file)?;
            Ok(true)
        }
    }
}

/// Process files on the blocking pool, at most `jobs` at a time
///
/// Results come back in the order of `files`, whatever order the work
/// finishes in.
async fn for_each_file<T, F>(files: &[PathBuf], jobs: usize, cancel: &Arc<AtomicBool>, work: F) -> Vec<FileResult<T>>
where
    T: Send + 'static,
    F: Fn(&Path, &AtomicBool) -> FileResult<T> + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(jobs.max(1)));
    let work = Arc::new(work);

    let handles: Vec<_> = files
        .iter()
        .map(|path| {
            tokio::spawn(process_file(
                path.clone(),
                Arc::clone(&semaphore),
                Arc::clone(cancel),
                Arc::clone(&work),
            ))
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.unwrap_or_else(|e| Err(e.to_string().into())));
    }
    results
}

async fn process_file<T, F>(path: PathBuf, semaphore: Arc<Semaphore>, cancel: Arc<AtomicBool>, work: Arc<F>) -> FileResult<T>
where
    T: Send + 'static,
    F: Fn(&Path, &AtomicBool) -> FileResult<T> + Send + Sync + 'static,
{
    let _permit = semaphore.acquire_owned().await?;
    if cancel.load(Ordering::Relaxed) {
        return Err("cancelled".into());
    }

    debug!("Processing {}", path.display());
    tokio::task::spawn_blocking(move || (*work)(&path, &cancel)).await?
}

fn print_ranges(files: &[PathBuf], results: Vec<FileResult<RangesReport>>) -> Result<bool, Box<dyn Error>>
{
    let mut all_ok = true;
    for (path, result) in files.iter().zip(results) {
        println!("Processing file: {}", path.display());
        match result {
            Ok(report) => {
                let mut sink = LineSink::new(io::stdout(), io::stderr());
                report.events.replay(&mut sink)?;
                match report.outcome {
                    Ok(summary) => {
                        info!(
                            file = %path.display(),
                            reported = summary.reported,
                            skipped = summary.skipped,
                            failed = summary.failed,
                            "file reported"
                        );
                        if summary.cancelled {
                            eprintln!("{}: interrupted", path.display());
                            all_ok = false;
                        }
                    }
                    Err(e) => {
                        eprintln!("Error: {}: {}", path.display(), e);
                        all_ok = false;
                    }
                }
            }
            Err(e) => {
                eprintln!("Error: {}: {}", path.display(), e);
                all_ok = false;
            }
        }
    }
    Ok(all_ok)
}

fn list_units(path: &Path, cancel: &AtomicBool) -> FileResult<Vec<Result<String, UnitError>>>
{
    let container = Container::from_path(path)?;
    if !container.has_debug_info() {
        return Ok(Vec::new());
    }

    let mut lines = Vec::new();
    for unit in container.dwarf()?.units() {
        if cancel.load(Ordering::Relaxed) {
            return Err("cancelled".into());
        }
        lines.push(unit.map(|unit| {
            format!(
                "0x{:08x} v{} {} {} {}",
                unit.offset(),
                unit.version(),
                unit.address_size(),
                unit.tag(),
                unit.full_path()
            )
        }));
    }
    Ok(lines)
}

fn print_units(files: &[PathBuf], results: Vec<FileResult<Vec<Result<String, UnitError>>>>) -> Result<bool, Box<dyn Error>>
{
    let mut all_ok = true;
    let mut sink = LineSink::new(io::stdout(), io::stderr());
    for (path, result) in files.iter().zip(results) {
        println!("Processing file: {}", path.display());
        match result {
            Ok(lines) if lines.is_empty() => println!("  no units"),
            Ok(lines) => {
                for line in lines {
                    match line {
                        Ok(line) => println!("{}", line),
                        Err(e) => sink.unit_failed(&e)?,
                    }
                }
            }
            Err(e) => {
                eprintln!("Error: {}: {}", path.display(), e);
                all_ok = false;
            }
        }
    }
    Ok(all_ok)
}

fn print_sections(path: &Path) -> Result<(), Box<dyn Error>>
{
    let container = Container::from_path(path)?;
    println!(
        "{}: {:?} {:?}, {:?} endian, {}",
        path.display(),
        container.format(),
        container.architecture(),
        container.endian(),
        container.address_size()
    );
    for section in container.sections() {
        let offset = section
            .file_offset
            .map_or_else(|| "-".to_string(), |offset| format!("0x{:08x}", offset));
        println!(
            "  {:<24} {:>10} {:>10} {:>10}{}",
            section.name,
            offset,
            section.file_size,
            section.size,
            if section.compressed { " compressed" } else { "" }
        );
    }
    Ok(())
}
