//! Tabular rendering for the listing commands.

use backup_inspect_core::{hlc::HlcTimestamp, manifest::BackupManifest, storage::StorageUri};
use tabled::{builder::Builder, settings::Style};

/// Placeholder for the start time of a full backup.
const OPEN_START: &str = "-";

fn render(columns: &[&str], rows: Vec<Vec<String>>) -> String {
    let mut builder = Builder::default();
    builder.push_record(columns.iter().map(|c| c.to_string()));
    for row in rows {
        builder.push_record(row);
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

/// One `./<path>` row per full backup.
pub fn backups_table(paths: &[String]) -> String {
    let rows = paths.iter().map(|p| vec![format!(".{p}")]).collect();
    render(&["path"], rows)
}

fn time(ts: &HlcTimestamp) -> String {
    ts.to_rfc3339()
}

/// `(path, start time, end time)` per backup of a chain, full backup first.
pub fn incrementals_table(layers: &[(StorageUri, BackupManifest)]) -> String {
    let rows = layers
        .iter()
        .enumerate()
        .map(|(i, (uri, manifest))| {
            let start = if i == 0 {
                OPEN_START.to_string()
            } else {
                time(&manifest.start_time)
            };
            vec![uri.path().to_string(), start, time(&manifest.end_time)]
        })
        .collect();
    render(&["path", "start time", "end time"], rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backups_are_relative_to_collection() {
        let out = backups_table(&["/2022/02/10-212843.96".to_string()]);
        assert!(out.contains("./2022/02/10-212843.96"));
        assert!(out.contains("path"));
    }

    #[test]
    fn full_backup_start_is_dashed() -> Result<(), Box<dyn std::error::Error>> {
        let full = BackupManifest {
            end_time: HlcTimestamp::from_wall(1_644_528_523_000_000_000),
            ..Default::default()
        };
        let inc = BackupManifest {
            start_time: full.end_time,
            end_time: HlcTimestamp::from_wall(1_644_528_583_000_000_000),
            ..Default::default()
        };
        let out = incrementals_table(&[
            (StorageUri::parse("coll/2022/02/10-212843.96")?, full),
            (
                StorageUri::parse("coll/incrementals/2022/02/10-212843.96/20220210/212943.00")?,
                inc,
            ),
        ]);

        let lines: Vec<&str> = out.lines().collect();
        let full_row = lines
            .iter()
            .find(|l| l.contains("/coll/2022/02/10-212843.96 "))
            .ok_or("full backup row missing")?;
        assert!(full_row.contains(" - "), "{out}");
        assert!(full_row.contains("2022-02-10T21:28:43Z"), "{out}");
        assert_eq!(out.matches("2022-02-10T21:28:43Z").count(), 2, "{out}");
        assert!(out.contains("2022-02-10T21:29:43Z"), "{out}");
        Ok(())
    }
}
