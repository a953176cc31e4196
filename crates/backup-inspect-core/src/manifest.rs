//! Backup manifests.
//!
//! - [`model`]: the manifest document.
//! - [`store`]: reading it from a backup location.
//! - [`display`]: the summary printed by `show`.

pub mod display;
pub mod model;
pub mod store;

pub use display::{format_ibytes, render_manifest_summary};
pub use model::{
    BackupFile, BackupManifest, DescriptorRevision, EntryCounts, MANIFEST_FORMAT_VERSION,
    MvccFilter,
};
pub use store::{ManifestError, read_manifest, read_manifest_at, read_manifest_summary};
