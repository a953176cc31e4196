//! Reading manifests from storage.

use log::debug;
use snafu::{Backtrace, prelude::*};

use crate::{
    error::ErrorKind,
    manifest::model::BackupManifest,
    storage::{
        ExternalStore, StorageConfig, StorageError, StorageUri,
        layout::{BACKUP_MANIFEST_NAME, LEGACY_MANIFEST_NAME},
    },
};

/// Errors produced while loading a manifest.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ManifestError {
    /// Neither the current nor the legacy manifest file exists.
    #[snafu(display("no backup manifest found at {location}"))]
    Missing {
        /// Backup location that was probed.
        location: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// Storage access failed.
    #[snafu(display("failed to read backup manifest at {location}: {source}"))]
    Storage {
        /// Backup location.
        location: String,
        /// Underlying storage error.
        #[snafu(source(from(StorageError, Box::new)))]
        source: Box<StorageError>,
    },

    /// The manifest is not valid JSON for the model.
    #[snafu(display("failed to decode backup manifest at {location}: {source}"))]
    Decode {
        /// Backup location.
        location: String,
        /// JSON error.
        source: serde_json::Error,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// The manifest could not be rendered.
    #[snafu(display("failed to render backup manifest: {source}"))]
    Render {
        /// JSON error.
        source: serde_json::Error,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },
}

impl ManifestError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ManifestError::Missing { .. } => ErrorKind::NotFound,
            ManifestError::Storage { source, .. } => source.kind(),
            ManifestError::Decode { .. } | ManifestError::Render { .. } => {
                ErrorKind::DecodeFailure
            }
        }
    }
}

/// Read the manifest at the root of `store`.
///
/// `BACKUP_MANIFEST` is preferred; the legacy `BACKUP` name is read when the
/// current one is absent.
pub async fn read_manifest(store: &ExternalStore) -> Result<BackupManifest, ManifestError> {
    let location = store.uri().to_string();

    for name in [BACKUP_MANIFEST_NAME, LEGACY_MANIFEST_NAME] {
        match store.read_file(name).await {
            Ok(bytes) => {
                debug!("read {name} from {location} ({} bytes)", bytes.len());
                return serde_json::from_slice(&bytes).context(DecodeSnafu {
                    location: location.clone(),
                });
            }
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e).context(StorageSnafu { location }),
        }
    }

    MissingSnafu { location }.fail()
}

/// Read a manifest without its file list and descriptor history.
pub async fn read_manifest_summary(store: &ExternalStore) -> Result<BackupManifest, ManifestError> {
    read_manifest(store).await.map(BackupManifest::into_summary)
}

/// Parse `location`, open it, and read its manifest.
///
/// Bare paths are treated as `nodelocal://self/<path>`.
pub async fn read_manifest_at(
    config: &StorageConfig,
    location: &str,
) -> Result<(StorageUri, BackupManifest), ManifestError> {
    let uri = StorageUri::parse(location).context(StorageSnafu { location })?;
    let store = config.connect(&uri);
    let manifest = read_manifest(&store).await;
    store.close();
    Ok((uri, manifest?))
}
