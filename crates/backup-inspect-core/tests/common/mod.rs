//! Fixture builder shared by the integration tests.
//!
//! Backups are written synchronously with `std::fs` under a temporary
//! external IO directory, using the crate's own row encoder and data file
//! writer so the tests exercise real on-disk formats.
#![allow(dead_code, missing_docs)]

use std::path::{Path, PathBuf};

use backup_inspect_core::{
    catalog::{
        ColumnDescriptor, ColumnType, DatabaseDescriptor, Descriptor, DescriptorId,
        IndexDescriptor, PUBLIC_SCHEMA_ID, TableDescriptor,
    },
    hlc::HlcTimestamp,
    keys::{Key, Span},
    manifest::{BackupFile, BackupManifest, EntryCounts, MANIFEST_FORMAT_VERSION, MvccFilter},
    rowenc::{Datum, encode_row},
    sst::SstWriter,
    storage::{StorageConfig, layout::BACKUP_MANIFEST_NAME},
};
use tempfile::TempDir;

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub const DB_ID: DescriptorId = DescriptorId(50);
pub const TABLE_ID: DescriptorId = DescriptorId(52);
pub const TABLE_NAME: &str = "d.public.kv";

/// Full backup subdirectory used by most tests.
pub const FULL_SUBDIR: &str = "2022/02/10-000000.00";

pub fn ts(wall: i64) -> HlcTimestamp {
    HlcTimestamp::from_wall(wall)
}

fn column(id: u32, name: &str, ty: ColumnType) -> ColumnDescriptor {
    ColumnDescriptor {
        id,
        name: name.to_string(),
        ty,
        nullable: id != 1,
        hidden: false,
    }
}

/// `kv (id INT PRIMARY KEY, v STRING, n INT)`.
pub fn kv_table() -> TableDescriptor {
    TableDescriptor {
        id: TABLE_ID,
        name: "kv".to_string(),
        parent_id: DB_ID,
        parent_schema_id: PUBLIC_SCHEMA_ID,
        version: 1,
        columns: vec![
            column(1, "id", ColumnType::Int),
            column(2, "v", ColumnType::String),
            column(3, "n", ColumnType::Int),
        ],
        primary_index: IndexDescriptor {
            id: 1,
            name: "kv_pkey".to_string(),
            key_column_ids: vec![1],
        },
    }
}

pub fn catalog(table: &TableDescriptor) -> Vec<Descriptor> {
    vec![
        Descriptor::Database(DatabaseDescriptor {
            id: DB_ID,
            name: "d".to_string(),
        }),
        Descriptor::Table(table.clone()),
    ]
}

/// One version of a `kv` row.
#[derive(Clone, Copy, Debug)]
pub enum Version<'a> {
    /// Write `(id, value, wall)`; `value == None` stores NULL.
    Put {
        id: i64,
        wall: i64,
        value: Option<&'a str>,
    },
    /// Delete row `id`.
    Delete { id: i64, wall: i64 },
}

impl Version<'_> {
    fn id(&self) -> i64 {
        match self {
            Version::Put { id, .. } | Version::Delete { id, .. } => *id,
        }
    }

    fn wall(&self) -> i64 {
        match self {
            Version::Put { wall, .. } | Version::Delete { wall, .. } => *wall,
        }
    }
}

pub fn put(id: i64, wall: i64, value: &str) -> Version<'_> {
    Version::Put {
        id,
        wall,
        value: Some(value),
    }
}

pub fn put_null(id: i64, wall: i64) -> Version<'static> {
    Version::Put {
        id,
        wall,
        value: None,
    }
}

pub fn del(id: i64, wall: i64) -> Version<'static> {
    Version::Delete { id, wall }
}

/// Primary index key of row `id`.
pub fn row_key(id: i64) -> TestResult<Key> {
    let (key, _) = encode_row(&kv_table(), &[Datum::Int(id), Datum::Null, Datum::Null])?;
    Ok(key)
}

/// Encode `versions` of `kv` rows into a data file. Order does not matter.
pub fn sst(versions: &[Version<'_>]) -> TestResult<Vec<u8>> {
    let table = kv_table();
    let mut encoded = Vec::with_capacity(versions.len());
    for v in versions {
        let value = match v {
            Version::Put { id, wall, value } => {
                let row = [
                    Datum::Int(*id),
                    value.map_or(Datum::Null, |s| Datum::String(s.to_string())),
                    Datum::Int(*wall),
                ];
                encode_row(&table, &row)?.1
            }
            Version::Delete { .. } => Vec::new(),
        };
        encoded.push((row_key(v.id())?.into_bytes(), ts(v.wall()), value));
    }
    // Key ascending, newest first.
    encoded.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut w = SstWriter::new();
    for (key, at, value) in &encoded {
        w.put(key, *at, value)?;
    }
    Ok(w.finish())
}

/// Primary index span of `kv`, cut at the keys of rows `ids`.
pub fn partition(ids: &[i64]) -> TestResult<Vec<Span>> {
    let span = kv_table().primary_index_span();
    let mut bounds = vec![span.key];
    for id in ids {
        bounds.push(row_key(*id)?);
    }
    bounds.push(span.end_key);
    Ok(bounds
        .windows(2)
        .map(|w| Span::new(w[0].clone(), w[1].clone()))
        .collect())
}

/// Manifest of a backup of `kv` covering `(start, end]`.
pub fn manifest(start: i64, end: i64, files: &[(&str, Span)], revisions: bool) -> BackupManifest {
    let table = kv_table();
    BackupManifest {
        start_time: ts(start),
        end_time: ts(end),
        format_version: MANIFEST_FORMAT_VERSION,
        node_id: 1,
        build_info: "v22.1.0".to_string(),
        mvcc_filter: if revisions {
            MvccFilter::All
        } else {
            MvccFilter::Latest
        },
        spans: vec![table.primary_index_span()],
        files: files
            .iter()
            .map(|(path, span)| BackupFile {
                path: path.to_string(),
                span: span.clone(),
                entry_counts: EntryCounts::default(),
            })
            .collect(),
        descriptors: catalog(&table),
        ..Default::default()
    }
}

/// An external IO directory holding test backups.
pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> TestResult<Self> {
        Ok(Self {
            dir: TempDir::new()?,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> StorageConfig {
        StorageConfig::new(self.dir.path())
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        rel.split('/')
            .filter(|s| !s.is_empty())
            .fold(self.dir.path().to_path_buf(), |acc, s| acc.join(s))
    }

    pub fn write(&self, rel: &str, contents: &[u8]) -> TestResult {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Write a backup at `rel`: its manifest and each `(path, contents)`.
    pub fn write_backup(
        &self,
        rel: &str,
        manifest: &BackupManifest,
        files: &[(&str, Vec<u8>)],
    ) -> TestResult {
        self.write(
            &format!("{rel}/{BACKUP_MANIFEST_NAME}"),
            &serde_json::to_vec_pretty(manifest)?,
        )?;
        for (path, contents) in files {
            self.write(&format!("{rel}/{path}"), contents)?;
        }
        Ok(())
    }

    pub fn read_to_string(&self, rel: &str) -> TestResult<String> {
        Ok(std::fs::read_to_string(self.path(rel))?)
    }
}
