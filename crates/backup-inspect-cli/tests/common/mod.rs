#![allow(dead_code)]

use std::path::Path;

use backup_inspect_core::{
    catalog::{
        ColumnDescriptor, ColumnType, DatabaseDescriptor, Descriptor, DescriptorId,
        IndexDescriptor, PUBLIC_SCHEMA_ID, TableDescriptor,
    },
    hlc::HlcTimestamp,
    manifest::{BackupFile, BackupManifest, EntryCounts, MANIFEST_FORMAT_VERSION, MvccFilter},
    rowenc::{Datum, encode_row},
    sst::SstWriter,
    storage::layout::BACKUP_MANIFEST_NAME,
};

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub const FULL: &str = "coll/2022/02/10-000000.00";
pub const INC: &str = "coll/incrementals/2022/02/10-000000.00/20220210/010000.00";

/// `people (id INT PRIMARY KEY, name STRING)` in database `shop`.
pub fn people() -> TableDescriptor {
    let column = |id, name: &str, ty| ColumnDescriptor {
        id,
        name: name.to_string(),
        ty,
        nullable: id != 1,
        hidden: false,
    };
    TableDescriptor {
        id: DescriptorId(104),
        name: "people".to_string(),
        parent_id: DescriptorId(100),
        parent_schema_id: PUBLIC_SCHEMA_ID,
        version: 1,
        columns: vec![
            column(1, "id", ColumnType::Int),
            column(2, "name", ColumnType::String),
        ],
        primary_index: IndexDescriptor {
            id: 1,
            name: "people_pkey".to_string(),
            key_column_ids: vec![1],
        },
    }
}

/// Data file with `puts` of `(id, name, wall)` and `deletes` of `(id, wall)`.
pub fn data_file(puts: &[(i64, Option<&str>, i64)], deletes: &[(i64, i64)]) -> TestResult<Vec<u8>> {
    let table = people();
    let mut encoded = Vec::new();
    for (id, name, wall) in puts {
        let (key, value) = encode_row(
            &table,
            &[Datum::Int(*id), name.map_or(Datum::Null, |n| Datum::String(n.to_string()))],
        )?;
        encoded.push((key.into_bytes(), HlcTimestamp::from_wall(*wall), value));
    }
    for (id, wall) in deletes {
        let (key, _) = encode_row(&table, &[Datum::Int(*id), Datum::Null])?;
        encoded.push((key.into_bytes(), HlcTimestamp::from_wall(*wall), Vec::new()));
    }
    // Key ascending, newest first.
    encoded.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut w = SstWriter::new();
    for (key, ts, value) in &encoded {
        w.put(key, *ts, value)?;
    }
    Ok(w.finish())
}

fn manifest(start: i64, end: i64) -> BackupManifest {
    let table = people();
    let span = table.primary_index_span();
    BackupManifest {
        start_time: HlcTimestamp::from_wall(start),
        end_time: HlcTimestamp::from_wall(end),
        format_version: MANIFEST_FORMAT_VERSION,
        node_id: 1,
        build_info: "v22.1.0".to_string(),
        mvcc_filter: MvccFilter::Latest,
        spans: vec![span.clone()],
        files: vec![BackupFile {
            path: "data/1.sst".to_string(),
            span,
            entry_counts: EntryCounts::default(),
        }],
        descriptors: vec![
            Descriptor::Database(DatabaseDescriptor {
                id: DescriptorId(100),
                name: "shop".to_string(),
            }),
            Descriptor::Table(table),
        ],
        ..Default::default()
    }
}

fn write(root: &Path, rel: &str, contents: &[u8]) -> TestResult {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}

fn write_backup(root: &Path, rel: &str, manifest: &BackupManifest, data: &[u8]) -> TestResult {
    write(
        root,
        &format!("{rel}/{BACKUP_MANIFEST_NAME}"),
        &serde_json::to_vec_pretty(manifest)?,
    )?;
    write(root, &format!("{rel}/data/1.sst"), data)
}

/// 2022-02-10T00:00:00Z.
pub const T0: i64 = 1_644_451_200_000_000_000;
/// One hour later.
pub const T1: i64 = T0 + 3_600_000_000_000;

/// Full backup `(0, T0]` plus one incremental `(T0, T1]`, under `root`.
///
/// The full backup holds alice, bob (NULL name) and carol; the incremental
/// renames alice to alicia and deletes carol.
pub fn write_collection(root: &Path) -> TestResult {
    write_backup(
        root,
        FULL,
        &manifest(0, T0),
        &data_file(&[(1, Some("alice"), 10), (2, None, 20), (3, Some("carol"), 30)], &[])?,
    )?;
    write_backup(
        root,
        INC,
        &manifest(T0, T1),
        &data_file(&[(1, Some("alicia"), T0 + 10)], &[(3, T0 + 20)])?,
    )
}
