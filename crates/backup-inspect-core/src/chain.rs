//! Backup chain discovery and validation.
//!
//! A chain is a full backup followed by zero or more incremental backups,
//! each starting where the previous one ended. Incrementals have been stored
//! under two conventions over time:
//!
//! - [`IncrementalConvention::AlongsideFull`]: directly inside the full
//!   backup's directory (older versions);
//! - [`IncrementalConvention::IncrementalsSubdir`]: under
//!   `<collection>/incrementals/<full backup subdir>`.
//!
//! Discovery probes every convention independently and merges the results,
//! so adding a convention only means adding a variant.

use log::{debug, info, warn};
use snafu::{Backtrace, prelude::*};

use crate::{
    error::ErrorKind,
    hlc::HlcTimestamp,
    manifest::{BackupManifest, ManifestError, read_manifest, read_manifest_at},
    storage::{
        ExternalStore, StorageConfig, StorageError, StorageUri, clean_url_path,
        layout::{
            BACKUP_MANIFEST_NAME, DEFAULT_INCREMENTALS_SUBDIR, LEGACY_MANIFEST_NAME,
            collection_and_subdir, is_full_backup_dir, is_incremental_backup_dir,
        },
    },
};

/// Errors produced while resolving a chain.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChainError {
    /// A location could not be parsed or listed.
    #[snafu(display("failed to access {location}: {source}"))]
    ChainStorage {
        /// Location being accessed.
        location: String,
        /// Underlying storage error.
        #[snafu(source(from(StorageError, Box::new)))]
        source: Box<StorageError>,
    },

    /// A manifest of the chain could not be read.
    #[snafu(display("failed to load backup {location}: {source}"))]
    LoadManifest {
        /// Backup location.
        location: String,
        /// Underlying manifest error.
        #[snafu(source(from(ManifestError, Box::new)))]
        source: Box<ManifestError>,
    },

    /// No backups were supplied.
    #[snafu(display("backup chain is empty"))]
    EmptyChain {
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// The first backup is an incremental.
    #[snafu(display("backup {location} starts at {start} and is not a full backup"))]
    NotFullBackup {
        /// Backup location.
        location: String,
        /// Its start time.
        start: HlcTimestamp,
    },

    /// Two adjacent backups do not share a boundary.
    #[snafu(display(
        "backups are not contiguous: {previous} ends at {previous_end} but {location} starts at {start}"
    ))]
    Gap {
        /// Earlier backup.
        previous: String,
        /// Its end time.
        previous_end: HlcTimestamp,
        /// Later backup.
        location: String,
        /// Its start time.
        start: HlcTimestamp,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },
}

impl ChainError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChainError::ChainStorage { source, .. } => source.kind(),
            ChainError::LoadManifest { source, .. } => source.kind(),
            ChainError::EmptyChain { .. } => ErrorKind::NotFound,
            ChainError::NotFullBackup { .. } | ChainError::Gap { .. } => {
                ErrorKind::ChainIntegrityFailure
            }
        }
    }
}

/// A place incremental backups may live relative to their full backup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IncrementalConvention {
    /// Inside the full backup's own directory.
    AlongsideFull,
    /// Under the collection's `incrementals` subdirectory.
    IncrementalsSubdir,
}

impl IncrementalConvention {
    /// Every convention, oldest first.
    pub const ALL: [IncrementalConvention; 2] = [
        IncrementalConvention::AlongsideFull,
        IncrementalConvention::IncrementalsSubdir,
    ];

    /// Directory probed for this convention, given the collection URI and
    /// the full backup's subdirectory within it.
    pub fn root(&self, collection: &StorageUri, subdir: &str) -> StorageUri {
        match self {
            IncrementalConvention::AlongsideFull => collection.join([subdir]),
            IncrementalConvention::IncrementalsSubdir => {
                collection.join([DEFAULT_INCREMENTALS_SUBDIR, subdir])
            }
        }
    }
}

/// One discovered incremental backup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriorBackup {
    /// Convention it was found under.
    pub convention: IncrementalConvention,
    /// Directory name relative to the probed root (`20220210/212843.96`).
    pub name: String,
    /// Full location of the backup.
    pub uri: StorageUri,
}

/// The locations making up one chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainLocations {
    /// The full backup.
    pub full: StorageUri,
    /// Incrementals in chronological order.
    pub incrementals: Vec<PriorBackup>,
}

impl ChainLocations {
    /// Every location, full backup first.
    pub fn uris(&self) -> impl Iterator<Item = &StorageUri> {
        std::iter::once(&self.full).chain(self.incrementals.iter().map(|b| &b.uri))
    }
}

/// List the incremental backup directories below the root of `store`.
///
/// A directory counts when it matches the incremental naming pattern and
/// holds a manifest (current or legacy name). Unless `omit_manifest` is set,
/// each manifest is also parsed so unreadable backups fail here.
pub async fn list_prior_backups(
    store: &ExternalStore,
    omit_manifest: bool,
) -> Result<Vec<String>, ChainError> {
    let files = store.list_files("").await.context(ChainStorageSnafu {
        location: store.uri().to_string(),
    })?;

    let mut dirs: Vec<String> = files
        .iter()
        .filter_map(|f| f.rsplit_once('/'))
        .filter(|(_, name)| *name == BACKUP_MANIFEST_NAME || *name == LEGACY_MANIFEST_NAME)
        .map(|(dir, _)| dir.to_string())
        .filter(|dir| is_incremental_backup_dir(dir))
        .collect();
    dirs.sort();
    dirs.dedup();

    if !omit_manifest {
        for dir in &dirs {
            let sub = store.sub_store(dir);
            read_manifest(&sub).await.context(LoadManifestSnafu {
                location: sub.uri().to_string(),
            })?;
        }
    }

    Ok(dirs)
}

/// Find the full backup and every incremental for `location`.
///
/// `location` may name the full backup or the same path under the
/// `incrementals` subdirectory; both yield the same result.
pub async fn discover_incrementals(
    config: &StorageConfig,
    location: &str,
) -> Result<ChainLocations, ChainError> {
    let uri = StorageUri::parse(location).context(ChainStorageSnafu { location })?;
    let (collection_path, subdir) = collection_and_subdir(uri.path());
    let collection = uri.with_path(&collection_path);
    let full = collection.join([subdir.as_str()]);

    let mut incrementals = Vec::new();
    for convention in IncrementalConvention::ALL {
        let root = convention.root(&collection, &subdir);
        let store = config.connect(&root);
        let found = list_prior_backups(&store, true).await;
        store.close();
        let found = found?;

        if found.is_empty() {
            debug!("no incrementals under {root} ({convention:?})");
        }
        incrementals.extend(found.into_iter().map(|name| PriorBackup {
            convention,
            uri: root.join([name.as_str()]),
            name,
        }));
    }

    let conventions_used = IncrementalConvention::ALL
        .iter()
        .filter(|c| incrementals.iter().any(|b| b.convention == **c))
        .count();
    if conventions_used > 1 {
        warn!("incrementals for {full} are split across {conventions_used} directory layouts");
    }

    // Directory names encode the backup time, so name order is time order.
    incrementals.sort_by(|a, b| a.name.cmp(&b.name));

    info!("{full}: found {} incremental backups", incrementals.len());
    Ok(ChainLocations { full, incrementals })
}

/// One backup of a chain.
#[derive(Clone, Debug)]
pub struct BackupLayer {
    /// Where the backup lives.
    pub uri: StorageUri,
    /// Its manifest.
    pub manifest: BackupManifest,
}

/// A validated, time-contiguous chain of backups, full backup first.
#[derive(Clone, Debug)]
pub struct BackupChain {
    layers: Vec<BackupLayer>,
}

impl BackupChain {
    /// Validate `layers` and build a chain.
    ///
    /// The first layer must be a full backup and every later layer must start
    /// exactly where the previous one ended.
    pub fn new(layers: Vec<BackupLayer>) -> Result<Self, ChainError> {
        let first = layers.first().context(EmptyChainSnafu)?;
        ensure!(
            first.manifest.is_full(),
            NotFullBackupSnafu {
                location: first.uri.to_string(),
                start: first.manifest.start_time,
            }
        );

        for pair in layers.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            ensure!(
                prev.manifest.end_time == next.manifest.start_time,
                GapSnafu {
                    previous: prev.uri.to_string(),
                    previous_end: prev.manifest.end_time,
                    location: next.uri.to_string(),
                    start: next.manifest.start_time,
                }
            );
        }

        Ok(Self { layers })
    }

    /// Read the manifests at `locations` (full backup first) and validate
    /// them as a chain.
    pub async fn load<S: AsRef<str>>(
        config: &StorageConfig,
        locations: &[S],
    ) -> Result<Self, ChainError> {
        let mut layers = Vec::with_capacity(locations.len());
        for location in locations {
            let location = location.as_ref();
            let (uri, manifest) = read_manifest_at(config, location)
                .await
                .context(LoadManifestSnafu { location })?;
            layers.push(BackupLayer { uri, manifest });
        }
        Self::new(layers)
    }

    /// Layers, full backup first.
    pub fn layers(&self) -> &[BackupLayer] {
        &self.layers
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Always false for a validated chain.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// The newest layer.
    pub fn last(&self) -> &BackupLayer {
        // `new` rejects empty chains.
        &self.layers[self.layers.len() - 1]
    }

    /// End time of the newest layer.
    pub fn end_time(&self) -> HlcTimestamp {
        self.last().manifest.end_time
    }

    /// The chain up to and including layer `index`.
    pub fn truncated(&self, index: usize) -> BackupChain {
        BackupChain {
            layers: self.layers[..=index.min(self.layers.len() - 1)].to_vec(),
        }
    }
}

/// Discover, read and validate the chain for `location`.
pub async fn resolve_chain(
    config: &StorageConfig,
    location: &str,
) -> Result<BackupChain, ChainError> {
    let locations = discover_incrementals(config, location).await?;
    let specs: Vec<String> = locations.uris().map(ToString::to_string).collect();
    BackupChain::load(config, &specs).await
}

/// List the full backups of a collection as `/YYYY/MM/DD-HHMMSS.ff` paths.
pub async fn list_full_backups(
    config: &StorageConfig,
    collection: &str,
) -> Result<Vec<String>, ChainError> {
    let store = config
        .connect_str(collection)
        .context(ChainStorageSnafu {
            location: collection,
        })?;
    let files = store.list_files("").await.context(ChainStorageSnafu {
        location: collection,
    })?;
    store.close();

    let incrementals_prefix = format!("{DEFAULT_INCREMENTALS_SUBDIR}/");
    let mut backups: Vec<String> = files
        .iter()
        .filter(|f| !f.starts_with(&incrementals_prefix))
        .filter_map(|f| f.rsplit_once('/'))
        .filter(|(_, name)| *name == BACKUP_MANIFEST_NAME || *name == LEGACY_MANIFEST_NAME)
        .map(|(dir, _)| dir)
        .filter(|dir| is_full_backup_dir(dir))
        .map(clean_url_path)
        .collect();
    backups.sort();
    backups.dedup();
    Ok(backups)
}
