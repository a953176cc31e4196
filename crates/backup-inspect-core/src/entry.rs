//! Locating a table inside a backup chain.
//!
//! Given a validated [`BackupChain`], a `database.schema.table` name and a
//! read time, [`locate_table_entry`] decides which layers are relevant,
//! resolves the table's schema as of that time and lists the data files
//! holding its rows, grouped so that every group can be scanned on its own.

use std::collections::BTreeMap;

use log::{debug, info};
use snafu::{Backtrace, prelude::*};

use crate::{
    catalog::{Descriptor, DescriptorId, LookupError, TableDescriptor, lookup_table},
    chain::BackupChain,
    error::ErrorKind,
    hlc::{HlcTimestamp, TimeParseError, parse_read_time},
    keys::{Key, Span},
    manifest::BackupManifest,
};

/// Errors produced while locating a table.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EntryError {
    /// The read time could not be parsed.
    #[snafu(display("invalid read time: {source}"))]
    ReadTime {
        /// Underlying parse error.
        source: TimeParseError,
    },

    /// The table could not be found in the schema at the read time.
    #[snafu(display("{source}"))]
    Lookup {
        /// Underlying lookup error.
        source: LookupError,
    },

    /// No layer of the chain covers the read time.
    #[snafu(display(
        "supplied backups do not cover requested time {as_of} (chain covers ({start}, {end}])"
    ))]
    OutsideChain {
        /// Requested time.
        as_of: HlcTimestamp,
        /// Chain start.
        start: HlcTimestamp,
        /// Chain end.
        end: HlcTimestamp,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// The read time falls inside a layer that only kept the latest values.
    #[snafu(display(
        "invalid read time {as_of}: backup {location} was not taken with revision history; \
         nearest earlier backup end time is {nearest}"
    ))]
    NotAnEndTime {
        /// Requested time.
        as_of: HlcTimestamp,
        /// Layer containing the time.
        location: String,
        /// End time of the previous layer.
        nearest: HlcTimestamp,
    },

    /// Revision history was requested but a layer did not retain it.
    #[snafu(display(
        "revision history requested but backup {location} was not taken with revision history"
    ))]
    RevisionsNotRetained {
        /// Offending layer.
        location: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// The newest layer does not cover the table's key span.
    #[snafu(display("table {table} ({span}) is not covered by backup {location}"))]
    NotCovered {
        /// Qualified table name.
        table: String,
        /// Table span.
        span: Span,
        /// Newest layer used.
        location: String,
    },
}

impl EntryError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EntryError::ReadTime { source } => source.kind(),
            EntryError::Lookup { source } => source.kind(),
            EntryError::OutsideChain { .. } | EntryError::NotAnEndTime { .. } => {
                ErrorKind::InvalidTimeRange
            }
            EntryError::RevisionsNotRetained { .. } => ErrorKind::InvalidArgument,
            EntryError::NotCovered { .. } => ErrorKind::NotFound,
        }
    }
}

/// A data file of the chain, tagged with the layer it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryFile {
    /// Index of the owning layer in [`TableEntry::chain`].
    pub layer: usize,
    /// Path relative to the layer's location.
    pub path: String,
    /// Keys the file covers.
    pub span: Span,
}

/// Files overlapping one sub-span of the table, oldest layer first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryFiles {
    /// Sub-span scanned with these files.
    pub span: Span,
    /// Files to merge.
    pub files: Vec<EntryFile>,
}

/// Everything needed to read one table out of a chain.
#[derive(Clone, Debug)]
pub struct TableEntry {
    /// Table schema at the read time.
    pub desc: TableDescriptor,
    /// Primary index span of the table.
    pub span: Span,
    /// File groups in key order.
    pub files: Vec<EntryFiles>,
    /// The chain, truncated after the layer covering the read time.
    pub chain: BackupChain,
    /// Read time.
    pub as_of: HlcTimestamp,
    /// Start of the window in which the table kept its current columns.
    /// Empty when no earlier revision is known.
    pub last_schema_change_time: HlcTimestamp,
}

impl TableEntry {
    /// Total number of data files across groups.
    pub fn file_count(&self) -> usize {
        self.files.iter().map(|g| g.files.len()).sum()
    }
}

/// Turn the user's `--as-of` value into a timestamp.
///
/// An absent or empty value means the end of the chain. Whether the
/// resulting time is actually covered by the chain is checked by
/// [`locate_table_entry`], so the default goes through the same check as an
/// explicit time.
pub fn evaluate_as_of(value: Option<&str>, chain: &BackupChain) -> Result<HlcTimestamp, EntryError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(chain.end_time()),
        Some(v) => parse_read_time(v).context(ReadTimeSnafu),
    }
}

/// The catalog of `manifest` as of `as_of`.
///
/// Manifests with descriptor history are replayed up to `as_of`; others only
/// know the catalog at their end time.
pub fn descriptors_at_time(manifest: &BackupManifest, as_of: HlcTimestamp) -> Vec<Descriptor> {
    if manifest.descriptor_changes.is_empty() {
        return manifest.descriptors.clone();
    }

    let mut by_id: BTreeMap<DescriptorId, Descriptor> = BTreeMap::new();
    for rev in &manifest.descriptor_changes {
        if rev.time > as_of {
            break;
        }
        match &rev.desc {
            Some(desc) => {
                by_id.insert(rev.id, desc.clone());
            }
            None => {
                by_id.remove(&rev.id);
            }
        }
    }
    by_id.into_values().collect()
}

/// Time since which `table` has had its current public columns.
///
/// Walks descriptor revisions newest first, ignoring those at or after
/// `as_of`, and stops at the first revision whose columns differ.
pub fn last_schema_change_time(
    chain: &BackupChain,
    table: &TableDescriptor,
    as_of: HlcTimestamp,
) -> HlcTimestamp {
    let mut last = HlcTimestamp::default();
    let revisions = chain
        .layers()
        .iter()
        .rev()
        .flat_map(|layer| layer.manifest.descriptor_changes.iter().rev());

    for rev in revisions {
        if rev.time >= as_of || rev.id != table.id {
            continue;
        }
        let same = rev
            .desc
            .as_ref()
            .and_then(Descriptor::as_table)
            .is_some_and(|t| t.same_public_columns(table));
        if !same {
            break;
        }
        last = rev.time;
    }
    last
}

/// Index of the first layer with `start < as_of <= end`.
fn covering_layer(chain: &BackupChain, as_of: HlcTimestamp) -> Option<usize> {
    chain
        .layers()
        .iter()
        .position(|l| l.manifest.start_time < as_of && as_of <= l.manifest.end_time)
}

/// Split `span` at every file boundary inside it and collect the files
/// overlapping each piece.
fn group_files(chain: &BackupChain, span: &Span) -> Vec<EntryFiles> {
    let mut bounds: Vec<Key> = vec![span.key.clone(), span.end_key.clone()];
    for layer in chain.layers() {
        for file in &layer.manifest.files {
            for bound in [&file.span.key, &file.span.end_key] {
                if span.key < *bound && *bound < span.end_key {
                    bounds.push(bound.clone());
                }
            }
        }
    }
    bounds.sort();
    bounds.dedup();

    bounds
        .windows(2)
        .filter_map(|pair| {
            let piece = Span::new(pair[0].clone(), pair[1].clone());
            let files: Vec<EntryFile> = chain
                .layers()
                .iter()
                .enumerate()
                .flat_map(|(layer, l)| {
                    l.manifest
                        .files
                        .iter()
                        .map(move |f| (layer, f))
                })
                .filter(|(_, f)| f.span.overlaps(&piece))
                .map(|(layer, f)| EntryFile {
                    layer,
                    path: f.path.clone(),
                    span: f.span.clone(),
                })
                .collect();
            (!files.is_empty()).then_some(EntryFiles { span: piece, files })
        })
        .collect()
}

/// Find `table_name` in `chain` as of `as_of`.
///
/// The chain is truncated after the first layer covering `as_of`. A time
/// strictly inside a layer needs that layer to carry revision history, and
/// `with_revisions` needs every layer of the chain to carry it.
pub fn locate_table_entry(
    chain: &BackupChain,
    table_name: &str,
    as_of: HlcTimestamp,
    with_revisions: bool,
) -> Result<TableEntry, EntryError> {
    let layer_idx = covering_layer(chain, as_of).context(OutsideChainSnafu {
        as_of,
        start: chain.layers()[0].manifest.start_time,
        end: chain.end_time(),
    })?;

    let layer = &chain.layers()[layer_idx];
    if as_of != layer.manifest.end_time && !layer.manifest.has_revision_history() {
        return NotAnEndTimeSnafu {
            as_of,
            location: layer.uri.to_string(),
            nearest: layer.manifest.start_time,
        }
        .fail();
    }

    if with_revisions
        && let Some(plain) = chain
            .layers()
            .iter()
            .find(|l| !l.manifest.has_revision_history())
    {
        return RevisionsNotRetainedSnafu {
            location: plain.uri.to_string(),
        }
        .fail();
    }

    let chain = chain.truncated(layer_idx);
    let newest = chain.last();
    let descs = descriptors_at_time(&newest.manifest, as_of);
    let desc = lookup_table(&descs, table_name)
        .context(LookupSnafu)?
        .clone();

    let span = desc.primary_index_span();
    ensure!(
        span.covered_by(&newest.manifest.spans),
        NotCoveredSnafu {
            table: table_name,
            span: span.clone(),
            location: newest.uri.to_string(),
        }
    );

    let files = group_files(&chain, &span);
    let last_schema_change_time = last_schema_change_time(&chain, &desc, as_of);

    for group in &files {
        debug!("{}: {} files", group.span, group.files.len());
    }
    info!(
        "located {table_name} (id {}) as of {as_of}: {} layers, {} file groups",
        desc.id,
        chain.len(),
        files.len()
    );

    Ok(TableEntry {
        desc,
        span,
        files,
        chain,
        as_of,
        last_schema_change_time,
    })
}
