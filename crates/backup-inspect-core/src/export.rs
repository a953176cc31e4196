//! Exporting one table of a backup chain as CSV.
//!
//! [`export_table`] ties the pipeline together: load and validate the chain,
//! locate the table as of the requested time, then scan its file groups in
//! key order through a merged iterator, a time-bounded fetcher and the
//! [`CsvSink`]. Groups are scanned one after the other and every opened
//! store handle is closed before the next group is read.
//!
//! The row cap lives in an [`ExportContext`] owned by the call, so
//! concurrent exports in one process do not interfere.

use std::io::Write;

use log::{debug, info};
use snafu::prelude::*;

use crate::{
    chain::{BackupChain, ChainError},
    entry::{EntryError, EntryFiles, TableEntry, evaluate_as_of, locate_table_entry},
    error::ErrorKind,
    fetch::{BackupKvFetcher, FetchError, RowFetcher},
    hlc::HlcTimestamp,
    keys::{Key, Span, StartKey},
    merge::MultiIterator,
    rowenc::RowDecoder,
    sst::{SstError, SstIterator},
    storage::{StorageConfig, StorageError, StorageUri},
};

pub mod sink;

pub use sink::{BATCH_ROWS, CsvSink, SinkError};

/// The only supported output format.
pub const CSV_FORMAT: &str = "csv";

/// Default NULL placeholder.
pub const DEFAULT_NULL_AS: &str = "null";

/// Errors produced by [`export_table`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ExportError {
    /// The output format is not supported.
    #[snafu(display("format {format} is not supported (only {CSV_FORMAT})"))]
    UnsupportedFormat {
        /// Requested format.
        format: String,
    },

    /// The chain could not be loaded.
    #[snafu(display("{source}"))]
    LoadChain {
        /// Underlying chain error.
        #[snafu(source(from(ChainError, Box::new)))]
        source: Box<ChainError>,
    },

    /// The table could not be located.
    #[snafu(display("{source}"))]
    Locate {
        /// Underlying locator error.
        #[snafu(source(from(EntryError, Box::new)))]
        source: Box<EntryError>,
    },

    /// A data file could not be read.
    #[snafu(display("failed to read {path} from {location}: {source}"))]
    ReadFile {
        /// File path within the backup.
        path: String,
        /// Backup location.
        location: String,
        /// Underlying storage error.
        #[snafu(source(from(StorageError, Box::new)))]
        source: Box<StorageError>,
    },

    /// A data file is not valid.
    #[snafu(display("failed to open {path} from {location}: {source}"))]
    OpenFile {
        /// File path within the backup.
        path: String,
        /// Backup location.
        location: String,
        /// Underlying file error.
        source: SstError,
    },

    /// Scanning a file group failed.
    #[snafu(display("failed to scan {span}: {source}"))]
    Scan {
        /// Group being scanned.
        span: Span,
        /// Underlying fetch error.
        source: FetchError,
    },

    /// Writing rows failed.
    #[snafu(display("{source}"))]
    Emit {
        /// Underlying sink error.
        source: SinkError,
    },

    /// The destination is not a file location.
    #[snafu(display("destination {destination} does not name a file"))]
    InvalidDestination {
        /// Requested destination.
        destination: String,
    },

    /// Writing the destination failed.
    #[snafu(display("failed to write {destination}: {source}"))]
    WriteDestination {
        /// Requested destination.
        destination: String,
        /// Underlying storage error.
        #[snafu(source(from(StorageError, Box::new)))]
        source: Box<StorageError>,
    },
}

impl ExportError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::UnsupportedFormat { .. } | ExportError::InvalidDestination { .. } => {
                ErrorKind::InvalidArgument
            }
            ExportError::LoadChain { source } => source.kind(),
            ExportError::Locate { source } => source.kind(),
            ExportError::ReadFile { source, .. } => source.kind(),
            ExportError::OpenFile { source, .. } => source.kind(),
            ExportError::Scan { source, .. } => source.kind(),
            ExportError::Emit { source } => source.kind(),
            ExportError::WriteDestination { source, .. } => source.kind(),
        }
    }
}

/// Knobs of one export.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportOptions {
    /// Fully qualified `database.schema.table`.
    pub table: String,
    /// Read time; `None` or empty means the end of the chain.
    pub as_of: Option<String>,
    /// Emit every revision instead of the state at `as_of`.
    pub with_revisions: bool,
    /// Stop after this many rows; `0` means no limit.
    pub max_rows: u64,
    /// Write to this location instead of the caller's stream.
    pub destination: Option<String>,
    /// Output format.
    pub format: String,
    /// Rendering of NULL fields.
    pub null_as: String,
    /// Key to start scanning from.
    pub start_key: Option<StartKey>,
}

impl ExportOptions {
    /// Defaults for exporting `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            as_of: None,
            with_revisions: false,
            max_rows: 0,
            destination: None,
            format: CSV_FORMAT.to_string(),
            null_as: DEFAULT_NULL_AS.to_string(),
            start_key: None,
        }
    }
}

/// Mutable state threaded through one export.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExportContext {
    max_rows: u64,
    emitted: u64,
}

impl ExportContext {
    /// Context enforcing `max_rows` (`0` for no limit).
    pub fn new(max_rows: u64) -> Self {
        Self {
            max_rows,
            emitted: 0,
        }
    }

    /// Rows emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// True once the cap is reached.
    pub fn limit_reached(&self) -> bool {
        self.max_rows > 0 && self.emitted >= self.max_rows
    }

    /// Count one emitted row.
    pub fn record_row(&mut self) {
        self.emitted += 1;
    }
}

/// Outcome of an export.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportSummary {
    /// Exported table.
    pub table: String,
    /// Read time used.
    pub as_of: HlcTimestamp,
    /// Rows written.
    pub rows: u64,
    /// Data files read.
    pub files_scanned: usize,
    /// Data files not read because of the start key or the row cap.
    pub files_skipped: usize,
    /// Message describing the revision window, set in revision mode.
    pub revision_notice: Option<String>,
    /// Destination written, if any.
    pub destination: Option<String>,
}

/// Export the table named in `opts` from the chain at `locations` (full
/// backup first).
///
/// Rows go to `out` unless `opts.destination` is set, in which case the
/// whole output is buffered and written to the destination in one call.
pub async fn export_table<S, W>(
    config: &StorageConfig,
    locations: &[S],
    opts: &ExportOptions,
    out: &mut W,
) -> Result<ExportSummary, ExportError>
where
    S: AsRef<str>,
    W: Write,
{
    ensure!(
        opts.format.eq_ignore_ascii_case(CSV_FORMAT),
        UnsupportedFormatSnafu {
            format: opts.format.clone(),
        }
    );

    // Validate the destination before doing any work.
    let destination = match &opts.destination {
        Some(dest) => {
            let uri = StorageUri::parse(dest).context(WriteDestinationSnafu {
                destination: dest.clone(),
            })?;
            let split = uri.split_file_name().context(InvalidDestinationSnafu {
                destination: dest.clone(),
            })?;
            Some(split)
        }
        None => None,
    };

    let chain = BackupChain::load(config, locations)
        .await
        .context(LoadChainSnafu)?;
    let as_of = evaluate_as_of(opts.as_of.as_deref(), &chain).context(LocateSnafu)?;
    let entry = locate_table_entry(&chain, &opts.table, as_of, opts.with_revisions)
        .context(LocateSnafu)?;

    let revision_notice = revision_notice(&entry, opts.with_revisions);

    let mut summary = ExportSummary {
        table: opts.table.clone(),
        as_of,
        rows: 0,
        files_scanned: 0,
        files_skipped: 0,
        revision_notice,
        destination: opts.destination.clone(),
    };

    match destination {
        None => {
            write_rows(config, &entry, opts, out, &mut summary).await?;
        }
        Some((dir, name)) => {
            let buf = write_rows(config, &entry, opts, Vec::new(), &mut summary).await?;
            let store = config.connect(&dir);
            store
                .write_file(&name, &buf)
                .await
                .context(WriteDestinationSnafu {
                    destination: format!("{dir}/{name}"),
                })?;
            store.close();
        }
    }

    info!(
        "exported {} rows of {} as of {as_of} ({} files read, {} skipped)",
        summary.rows, summary.table, summary.files_scanned, summary.files_skipped
    );
    Ok(summary)
}

fn revision_notice(entry: &TableEntry, with_revisions: bool) -> Option<String> {
    // An empty change time renders as the epoch: the window is unbounded below.
    let changed = entry.last_schema_change_time;
    with_revisions.then(|| {
        format!(
            "DETECTED SCHEMA CHANGE AT {}, ONLY SHOWING UPDATES IN RANGE [{}, {}]",
            changed.to_rfc3339(),
            changed.to_rfc3339(),
            entry.as_of.to_rfc3339()
        )
    })
}

/// Part of `group` at or after `start`, or `None` when nothing is left.
fn scan_span(group: &EntryFiles, start: Option<&Key>) -> Option<Span> {
    match start {
        Some(start) if *start >= group.span.end_key => None,
        Some(start) if *start > group.span.key => {
            Some(Span::new(start.clone(), group.span.end_key.clone()))
        }
        _ => Some(group.span.clone()),
    }
}

async fn open_group(
    config: &StorageConfig,
    entry: &TableEntry,
    group: &EntryFiles,
) -> Result<Vec<SstIterator>, ExportError> {
    let mut iters = Vec::with_capacity(group.files.len());
    for file in &group.files {
        let layer = &entry.chain.layers()[file.layer];
        let location = layer.uri.to_string();
        let store = config.connect(&layer.uri);
        let data = store
            .read_file(&file.path)
            .await
            .context(ReadFileSnafu {
                path: file.path.clone(),
                location: location.clone(),
            })?;
        store.close();

        let iter = SstIterator::new(file.path.clone(), data).context(OpenFileSnafu {
            path: file.path.clone(),
            location,
        })?;
        iters.push(iter);
    }
    Ok(iters)
}

async fn write_rows<W: Write>(
    config: &StorageConfig,
    entry: &TableEntry,
    opts: &ExportOptions,
    out: W,
    summary: &mut ExportSummary,
) -> Result<W, ExportError> {
    let decoder = RowDecoder::new(&entry.desc, opts.with_revisions);
    let mut sink = CsvSink::new(&decoder.output_fields(), &opts.null_as, out);
    let mut ctx = ExportContext::new(opts.max_rows);
    let start_key = opts.start_key.as_ref().map(|k| k.resolve(&entry.span));
    let start_time = if opts.with_revisions {
        entry.last_schema_change_time
    } else {
        HlcTimestamp::default()
    };

    for group in &entry.files {
        let span = match scan_span(group, start_key.as_ref()) {
            Some(span) if !ctx.limit_reached() => span,
            _ => {
                summary.files_skipped += group.files.len();
                continue;
            }
        };

        debug!("scanning {span} over {} files", group.files.len());
        let iters = open_group(config, entry, group).await?;
        summary.files_scanned += iters.len();

        let kvs = BackupKvFetcher::new(
            MultiIterator::new(iters),
            span,
            start_time,
            entry.as_of,
            opts.with_revisions,
        );
        for row in RowFetcher::new(kvs, decoder.clone()) {
            let row = row.context(ScanSnafu {
                span: group.span.clone(),
            })?;
            sink.push(&row).context(EmitSnafu)?;
            ctx.record_row();
            if ctx.limit_reached() {
                debug!("row limit {} reached", opts.max_rows);
                break;
            }
        }
        sink.flush().context(EmitSnafu)?;
    }

    summary.rows = ctx.emitted();
    sink.finish().context(EmitSnafu)
}
