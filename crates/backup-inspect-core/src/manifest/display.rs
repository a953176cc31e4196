//! Human-readable manifest summary rendered by the `show` command.

use std::collections::BTreeMap;

use chrono::SecondsFormat;
use serde::Serialize;
use snafu::prelude::*;

use crate::{
    catalog::{DescriptorId, resolve_names, sort_by_dependency_depth},
    hlc::HlcTimestamp,
    manifest::{
        model::{BackupFile, BackupManifest},
        store::{ManifestError, RenderSnafu},
    },
};

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct FileSummary {
    path: String,
    span: String,
    data_size: String,
    index_entries: u64,
    rows: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ManifestSummary {
    start_time: String,
    end_time: String,
    data_size: String,
    rows: u64,
    index_entries: u64,
    format_version: u32,
    #[serde(rename = "ClusterID")]
    cluster_id: String,
    #[serde(rename = "NodeID")]
    node_id: u32,
    build_info: String,
    files: Vec<FileSummary>,
    spans: String,
    database_descriptors: BTreeMap<DescriptorId, String>,
    table_descriptors: BTreeMap<DescriptorId, String>,
    type_descriptors: BTreeMap<DescriptorId, String>,
    schema_descriptors: BTreeMap<DescriptorId, String>,
}

/// Format a byte count with binary (IEC) units, e.g. `82 B`, `1.2 KiB`,
/// `20 MiB`.
pub fn format_ibytes(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if value < 10.0 {
        format!("{value:.1} {}", UNITS[unit])
    } else {
        format!("{value:.0} {}", UNITS[unit])
    }
}

fn rfc3339(ts: &HlcTimestamp) -> String {
    ts.to_datetime().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn file_summary(file: &BackupFile) -> FileSummary {
    FileSummary {
        path: file.path.clone(),
        span: file.span.to_string(),
        data_size: format_ibytes(file.entry_counts.data_size),
        index_entries: file.entry_counts.index_entries,
        rows: file.entry_counts.rows,
    }
}

/// Render `manifest` as tab-indented JSON.
///
/// The whole document is built in memory first, so a failure never leaves a
/// partially written object behind.
pub fn render_manifest_summary(manifest: &BackupManifest) -> Result<String, ManifestError> {
    let mut descs = manifest.descriptors.clone();
    sort_by_dependency_depth(&mut descs);
    let names = resolve_names(&descs);

    let spans = manifest
        .spans
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ");

    let summary = ManifestSummary {
        start_time: rfc3339(&manifest.start_time),
        end_time: rfc3339(&manifest.end_time),
        data_size: format_ibytes(manifest.entry_counts.data_size),
        rows: manifest.entry_counts.rows,
        index_entries: manifest.entry_counts.index_entries,
        format_version: manifest.format_version,
        cluster_id: manifest.cluster_id.to_string(),
        node_id: manifest.node_id,
        build_info: manifest.build_info.clone(),
        files: manifest.files.iter().map(file_summary).collect(),
        spans: format!("[{spans}]"),
        database_descriptors: names.databases,
        table_descriptors: names.tables,
        type_descriptors: names.types,
        schema_descriptors: names.schemas,
    };

    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    summary.serialize(&mut ser).context(RenderSnafu)?;

    Ok(String::from_utf8_lossy(&out).into_owned())
}
