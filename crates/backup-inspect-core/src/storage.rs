//! Storage access for backup locations.
//!
//! This module maps user-facing backup locations (bare paths,
//! `nodelocal://self/...`, `file:///...`) onto a concrete backend and exposes
//! the small set of operations the inspector needs:
//!
//! - reading whole objects (manifests and data files),
//! - listing the files below a prefix (incremental discovery),
//! - writing an export destination atomically.
//!
//! Only the local filesystem backend exists today. Every operation matches on
//! [`StorageLocation`] so another backend (for example object storage) can be
//! introduced without touching the chain or export logic.

use std::{
    io,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use log::debug;
use snafu::prelude::*;
use tokio::{fs, io::AsyncWriteExt};

mod error;
pub mod layout;
pub mod uri;

pub use error::{BackendError, StorageError};
pub(crate) use error::{InvalidUriSnafu, NotFoundSnafu, OtherIoSnafu};
pub use uri::{Scheme, StorageUri, clean_url_path, join_url_path};

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Directory that `nodelocal://self` URIs resolve under when nothing else is
/// configured.
pub const DEFAULT_EXTERNAL_IO_DIR: &str = "data/extern";

/// Resolved physical location of a store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageLocation {
    /// A directory on the local filesystem.
    Local(PathBuf),
    // Future:
    // S3 { bucket: String, prefix: String },
}

impl StorageLocation {
    /// Creates a new `StorageLocation` for a local filesystem path.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        StorageLocation::Local(root.into())
    }
}

/// Storage settings supplied by the embedding application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageConfig {
    /// Root directory for `nodelocal://self` URIs.
    pub external_io_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            external_io_dir: PathBuf::from(DEFAULT_EXTERNAL_IO_DIR),
        }
    }
}

impl StorageConfig {
    /// Configuration rooted at `external_io_dir`.
    pub fn new(external_io_dir: impl Into<PathBuf>) -> Self {
        Self {
            external_io_dir: external_io_dir.into(),
        }
    }

    /// Physical location addressed by `uri`.
    pub fn resolve(&self, uri: &StorageUri) -> StorageLocation {
        match uri.scheme() {
            Scheme::NodeLocal => {
                StorageLocation::Local(join_url_segments(&self.external_io_dir, uri.path()))
            }
            Scheme::File => StorageLocation::Local(PathBuf::from(uri.path())),
        }
    }

    /// Open a store handle for a parsed URI.
    pub fn connect(&self, uri: &StorageUri) -> ExternalStore {
        let location = self.resolve(uri);
        debug!("opened store {uri} at {location:?}");
        ExternalStore {
            uri: uri.clone(),
            location,
        }
    }

    /// Parse `spec` and open a store handle for it.
    pub fn connect_str(&self, spec: &str) -> StorageResult<ExternalStore> {
        let uri = StorageUri::parse(spec)?;
        Ok(self.connect(&uri))
    }
}

/// Append the segments of a cleaned URL path to a filesystem root.
fn join_url_segments(root: &Path, url_path: &str) -> PathBuf {
    clean_url_path(url_path)
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(root.to_path_buf(), |acc, seg| acc.join(seg))
}

/// An open handle on a storage location.
///
/// Paths passed to the methods are relative to the handle's root and use `/`
/// as separator regardless of platform.
#[derive(Clone, Debug)]
pub struct ExternalStore {
    uri: StorageUri,
    location: StorageLocation,
}

impl ExternalStore {
    /// The URI this handle was opened for.
    pub fn uri(&self) -> &StorageUri {
        &self.uri
    }

    /// The resolved physical location.
    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    /// Handle rooted at `rel` below this one.
    pub fn sub_store(&self, rel: &str) -> ExternalStore {
        ExternalStore {
            uri: self.uri.join([rel]),
            location: StorageLocation::Local(self.join_local(rel)),
        }
    }

    fn join_local(&self, rel: &str) -> PathBuf {
        match &self.location {
            StorageLocation::Local(root) => join_url_segments(root, rel),
        }
    }

    /// Read the full contents of `rel`.
    ///
    /// A missing file yields [`StorageError::NotFound`]; any other problem
    /// yields [`StorageError::OtherIo`].
    pub async fn read_file(&self, rel: &str) -> StorageResult<Bytes> {
        match &self.location {
            StorageLocation::Local(_) => {
                let abs = self.join_local(rel);
                let path_str = abs.display().to_string();

                match fs::read(&abs).await {
                    Ok(bytes) => Ok(Bytes::from(bytes)),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        Err(BackendError::Local(e)).context(NotFoundSnafu { path: path_str })
                    }
                    Err(e) => Err(BackendError::Local(e)).context(OtherIoSnafu { path: path_str }),
                }
            }
        }
    }

    /// True when `rel` names an existing regular file.
    pub async fn exists(&self, rel: &str) -> StorageResult<bool> {
        match &self.location {
            StorageLocation::Local(_) => {
                let abs = self.join_local(rel);
                match fs::metadata(&abs).await {
                    Ok(meta) => Ok(meta.is_file()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                    Err(e) => Err(BackendError::Local(e)).context(OtherIoSnafu {
                        path: abs.display().to_string(),
                    }),
                }
            }
        }
    }

    /// Write `contents` to `rel` with write-then-rename semantics.
    ///
    /// Parent directories are created as needed and an existing file is
    /// replaced.
    pub async fn write_file(&self, rel: &str, contents: &[u8]) -> StorageResult<()> {
        match &self.location {
            StorageLocation::Local(_) => {
                let abs = self.join_local(rel);
                write_atomic_local(&abs, contents).await
            }
        }
    }

    /// List every regular file below `prefix`, recursively.
    ///
    /// Returned paths are relative to the handle root, `/`-separated and
    /// sorted. A missing prefix lists as empty.
    pub async fn list_files(&self, prefix: &str) -> StorageResult<Vec<String>> {
        match &self.location {
            StorageLocation::Local(root) => {
                let start = self.join_local(prefix);
                let mut out = Vec::new();
                let mut pending = vec![start];

                while let Some(dir) = pending.pop() {
                    let mut entries = match fs::read_dir(&dir).await {
                        Ok(rd) => rd,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                        Err(e) => {
                            return Err(BackendError::Local(e)).context(OtherIoSnafu {
                                path: dir.display().to_string(),
                            });
                        }
                    };

                    while let Some(entry) = entries
                        .next_entry()
                        .await
                        .map_err(BackendError::Local)
                        .context(OtherIoSnafu {
                            path: dir.display().to_string(),
                        })?
                    {
                        let path = entry.path();
                        let file_type = entry
                            .file_type()
                            .await
                            .map_err(BackendError::Local)
                            .context(OtherIoSnafu {
                                path: path.display().to_string(),
                            })?;

                        if file_type.is_dir() {
                            pending.push(path);
                        } else if file_type.is_file()
                            && let Ok(rel) = path.strip_prefix(root)
                        {
                            let parts: Vec<String> = rel
                                .components()
                                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                                .collect();
                            out.push(parts.join("/"));
                        }
                    }
                }

                out.sort();
                Ok(out)
            }
        }
    }

    /// Release the handle.
    pub fn close(self) {
        debug!("closed store {}", self.uri);
    }
}

async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: parent.display().to_string(),
            })?;
    }
    Ok(())
}

/// Guard that removes a temporary file on drop unless disarmed.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn write_atomic_local(abs: &Path, contents: &[u8]) -> StorageResult<()> {
    create_parent_dir(abs).await?;

    let mut tmp_name = abs.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = abs.with_file_name(tmp_name);
    let mut guard = TempFileGuard::new(tmp_path.clone());
    let tmp_str = tmp_path.display().to_string();

    {
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: tmp_str.clone(),
            })?;

        file.write_all(contents)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: tmp_str.clone(),
            })?;

        file.sync_all()
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu { path: tmp_str })?;
    }

    fs::rename(&tmp_path, abs)
        .await
        .map_err(BackendError::Local)
        .context(OtherIoSnafu {
            path: abs.display().to_string(),
        })?;

    guard.disarm();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn store_at(tmp: &TempDir, spec: &str) -> Result<ExternalStore, StorageError> {
        StorageConfig::new(tmp.path()).connect_str(spec)
    }

    #[test]
    fn nodelocal_resolves_under_external_io_dir() -> TestResult {
        let config = StorageConfig::new("/srv/extern");
        let uri = StorageUri::parse("nodelocal://self/coll/full")?;
        assert_eq!(
            config.resolve(&uri),
            StorageLocation::local("/srv/extern/coll/full")
        );

        let uri = StorageUri::parse("file:///var/backups")?;
        assert_eq!(config.resolve(&uri), StorageLocation::local("/var/backups"));
        Ok(())
    }

    #[test]
    fn default_external_io_dir() {
        assert_eq!(
            StorageConfig::default().external_io_dir,
            PathBuf::from(DEFAULT_EXTERNAL_IO_DIR)
        );
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() -> TestResult {
        let tmp = TempDir::new()?;
        let store = store_at(&tmp, "out")?;

        store.write_file("nested/file.csv", b"1,2\n").await?;
        let bytes = store.read_file("nested/file.csv").await?;
        assert_eq!(&bytes[..], b"1,2\n");
        assert!(store.exists("nested/file.csv").await?);
        assert!(!tmp.path().join("out/nested/file.csv.tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn write_replaces_existing_file() -> TestResult {
        let tmp = TempDir::new()?;
        let store = store_at(&tmp, "out")?;

        store.write_file("f", b"original").await?;
        store.write_file("f", b"updated").await?;
        assert_eq!(&store.read_file("f").await?[..], b"updated");
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_not_found() -> TestResult {
        let tmp = TempDir::new()?;
        let store = store_at(&tmp, "nothing")?;

        let err = store
            .read_file("BACKUP_MANIFEST")
            .await
            .expect_err("expected NotFound");
        assert!(err.is_not_found());
        assert_eq!(err.kind(), crate::error::ErrorKind::StorageFailure);
        assert!(!store.exists("BACKUP_MANIFEST").await?);
        Ok(())
    }

    #[tokio::test]
    async fn list_files_is_recursive_and_sorted() -> TestResult {
        let tmp = TempDir::new()?;
        let store = store_at(&tmp, "coll")?;

        store.write_file("b/2/x", b"").await?;
        store.write_file("a/1", b"").await?;
        store.write_file("b/1", b"").await?;

        assert_eq!(store.list_files("").await?, vec!["a/1", "b/1", "b/2/x"]);
        assert_eq!(store.list_files("b").await?, vec!["b/1", "b/2/x"]);
        assert!(store.list_files("missing").await?.is_empty());
        store.close();
        Ok(())
    }
}
