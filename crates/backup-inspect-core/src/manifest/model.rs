//! Manifest data model.
//!
//! A manifest is the JSON document at the root of every backup. It records
//! the time range the backup covers, the key spans it backed up, the data
//! files holding those spans and the schema catalog at its end time. Backups
//! taken with revision history additionally carry every descriptor revision
//! inside the covered time range.
//!
//! These are pure data types; reading them from storage lives in
//! [`crate::manifest::store`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    catalog::{Descriptor, DescriptorId},
    hlc::HlcTimestamp,
    keys::Span,
};

/// Current manifest format version.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Which versions of each key a backup retained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MvccFilter {
    /// Only the newest version of each key as of the end time.
    #[default]
    Latest,
    /// Every version written inside `(start_time, end_time]`.
    All,
}

/// Size statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryCounts {
    /// Logical bytes.
    #[serde(default)]
    pub data_size: u64,
    /// Row count.
    #[serde(default)]
    pub rows: u64,
    /// Secondary index entry count.
    #[serde(default)]
    pub index_entries: u64,
}

/// One data file of a backup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFile {
    /// Path relative to the backup directory.
    pub path: String,
    /// Keys the file holds.
    pub span: Span,
    /// Statistics for the file.
    #[serde(default)]
    pub entry_counts: EntryCounts,
}

/// One historical version of a descriptor.
///
/// `desc == None` records that the descriptor was dropped at `time`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorRevision {
    /// Descriptor id.
    pub id: DescriptorId,
    /// Time the revision took effect.
    pub time: HlcTimestamp,
    /// The descriptor as of `time`.
    #[serde(default)]
    pub desc: Option<Descriptor>,
}

/// Metadata of one full or incremental backup.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Exclusive lower bound; empty for full backups.
    #[serde(default)]
    pub start_time: HlcTimestamp,
    /// Inclusive upper bound.
    pub end_time: HlcTimestamp,
    /// Manifest format version.
    #[serde(default)]
    pub format_version: u32,
    /// Cluster the backup was taken from.
    #[serde(default)]
    pub cluster_id: Uuid,
    /// Node that coordinated the backup.
    #[serde(default)]
    pub node_id: u32,
    /// Build of the database that wrote the backup.
    #[serde(default)]
    pub build_info: String,
    /// Which versions were retained.
    #[serde(default)]
    pub mvcc_filter: MvccFilter,
    /// Key spans covered by the backup.
    #[serde(default)]
    pub spans: Vec<Span>,
    /// Data files, in key order.
    #[serde(default)]
    pub files: Vec<BackupFile>,
    /// Catalog as of `end_time`.
    #[serde(default)]
    pub descriptors: Vec<Descriptor>,
    /// Descriptor revisions in time order (revision-history backups only).
    #[serde(default)]
    pub descriptor_changes: Vec<DescriptorRevision>,
    /// Totals across all files.
    #[serde(default)]
    pub entry_counts: EntryCounts,
}

impl BackupManifest {
    /// True when the backup retained every revision in its time range.
    pub fn has_revision_history(&self) -> bool {
        self.mvcc_filter == MvccFilter::All
    }

    /// True for a full backup (no lower time bound).
    pub fn is_full(&self) -> bool {
        self.start_time.is_empty()
    }

    /// Drop the file list and descriptor history, keeping the header fields.
    pub fn into_summary(mut self) -> Self {
        self.files = Vec::new();
        self.descriptor_changes = Vec::new();
        self
    }
}
