//! On-disk layout helpers for backup collections.
//!
//! This module centralizes the *relative* path conventions the backup
//! facility uses:
//! - manifest file names (`BACKUP_MANIFEST`, legacy `BACKUP`)
//! - full backup directories inside a collection (`YYYY/MM/DD-HHMMSS.ff`)
//! - incremental backup directories (`YYYYMMDD/HHMMSS.ff`), stored either next
//!   to the full backup or under the `incrementals/` subdirectory
//!
//! Functions here are pure string helpers; callers join them with a storage
//! URI or an [`crate::storage::ExternalStore`] before doing IO.

use chrono::{DateTime, Timelike, Utc};

use crate::storage::uri::{URL_SEPARATOR, clean_url_path};

/// Name of the manifest written at the root of every backup.
pub const BACKUP_MANIFEST_NAME: &str = "BACKUP_MANIFEST";

/// Manifest name used by older versions of the backup facility.
pub const LEGACY_MANIFEST_NAME: &str = "BACKUP";

/// Subdirectory that newer versions place incremental backups under.
pub const DEFAULT_INCREMENTALS_SUBDIR: &str = "incrementals";

fn all_digits(s: &str, len: Option<usize>) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) && len.is_none_or(|n| s.len() == n)
}

/// `<digits>.<2 digits>`
fn is_time_with_centis(s: &str, int_len: Option<usize>) -> bool {
    match s.split_once('.') {
        Some((int, frac)) => all_digits(int, int_len) && all_digits(frac, Some(2)),
        None => false,
    }
}

/// True for a relative directory shaped like an incremental backup
/// (`20220210/212843.96`).
pub fn is_incremental_backup_dir(rel_dir: &str) -> bool {
    let segs: Vec<&str> = rel_dir
        .split(URL_SEPARATOR)
        .filter(|s| !s.is_empty())
        .collect();
    matches!(segs.as_slice(), [day, time] if all_digits(day, None) && is_time_with_centis(time, None))
}

/// True for a relative directory shaped like a full backup inside a
/// collection (`2022/02/10-212843.96`).
pub fn is_full_backup_dir(rel_dir: &str) -> bool {
    let segs: Vec<&str> = rel_dir
        .split(URL_SEPARATOR)
        .filter(|s| !s.is_empty())
        .collect();
    match segs.as_slice() {
        [year, month, last] => {
            let Some((day, time)) = last.split_once('-') else {
                return false;
            };
            all_digits(year, Some(4))
                && all_digits(month, Some(2))
                && all_digits(day, Some(2))
                && is_time_with_centis(time, Some(6))
        }
        _ => false,
    }
}

fn centis(ts: &DateTime<Utc>) -> u32 {
    ts.nanosecond() / 10_000_000
}

/// Directory name for a full backup taken at `ts`: `/YYYY/MM/DD-HHMMSS.ff`.
pub fn full_backup_dir_name(ts: &DateTime<Utc>) -> String {
    format!("/{}.{:02}", ts.format("%Y/%m/%d-%H%M%S"), centis(ts))
}

/// Directory name for an incremental backup taken at `ts`: `/YYYYMMDD/HHMMSS.ff`.
pub fn incremental_dir_name(ts: &DateTime<Utc>) -> String {
    format!("/{}.{:02}", ts.format("%Y%m%d/%H%M%S"), centis(ts))
}

/// Split a backup path into its collection and the date-based full backup
/// subdirectory.
///
/// Both `/coll/2022/02/10-212843.96` and
/// `/coll/incrementals/2022/02/10-212843.96` yield
/// `("/coll", "/2022/02/10-212843.96")`. A path without a trailing
/// date-based subdirectory is returned whole with an empty subdir (minus any
/// trailing `incrementals` segment).
pub fn collection_and_subdir(path: &str) -> (String, String) {
    let cleaned = clean_url_path(path);
    let segs: Vec<&str> = cleaned
        .split(URL_SEPARATOR)
        .filter(|s| !s.is_empty())
        .collect();

    let (base, subdir) = if segs.len() >= 3 && is_full_backup_dir(&segs[segs.len() - 3..].join("/"))
    {
        let split = segs.len() - 3;
        (
            format!("/{}", segs[..split].join("/")),
            format!("/{}", segs[split..].join("/")),
        )
    } else {
        (cleaned.clone(), String::new())
    };

    let collection = strip_incrementals_suffix(&base);
    (collection, subdir)
}

/// Remove one trailing `/incrementals` segment, if present.
pub fn strip_incrementals_suffix(path: &str) -> String {
    let cleaned = clean_url_path(path);
    let suffix = format!("{URL_SEPARATOR}{DEFAULT_INCREMENTALS_SUBDIR}");
    match cleaned.strip_suffix(&suffix) {
        Some("") => "/".to_string(),
        Some(rest) => rest.to_string(),
        None => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn incremental_dir_pattern() {
        assert!(is_incremental_backup_dir("20220210/212843.96"));
        assert!(is_incremental_backup_dir("/20220210/212843.96/"));
        assert!(!is_incremental_backup_dir("20220210/212843"));
        assert!(!is_incremental_backup_dir("2022/02/10-212843.96"));
        assert!(!is_incremental_backup_dir("data/212843.96"));
    }

    #[test]
    fn full_backup_dir_pattern() {
        assert!(is_full_backup_dir("2022/02/10-212843.96"));
        assert!(!is_full_backup_dir("22/02/10-212843.96"));
        assert!(!is_full_backup_dir("2022/02/10-2128.96"));
        assert!(!is_full_backup_dir("20220210/212843.96"));
    }

    #[test]
    fn dir_names_follow_patterns() {
        let ts = Utc
            .with_ymd_and_hms(2022, 2, 10, 21, 28, 43)
            .single()
            .unwrap()
            + chrono::Duration::milliseconds(960);
        let full = full_backup_dir_name(&ts);
        let inc = incremental_dir_name(&ts);
        assert_eq!(full, "/2022/02/10-212843.96");
        assert_eq!(inc, "/20220210/212843.96");
        assert!(is_full_backup_dir(&full));
        assert!(is_incremental_backup_dir(&inc));
    }

    #[test]
    fn collection_and_subdir_normalizes_incrementals_form() {
        let a = collection_and_subdir("/coll/2022/02/10-212843.96");
        let b = collection_and_subdir("/coll/incrementals/2022/02/10-212843.96");
        assert_eq!(a, ("/coll".to_string(), "/2022/02/10-212843.96".to_string()));
        assert_eq!(a, b);
    }

    #[test]
    fn collection_without_date_subdir() {
        assert_eq!(
            collection_and_subdir("/backups/full"),
            ("/backups/full".to_string(), String::new())
        );
        assert_eq!(
            collection_and_subdir("/backups/full/incrementals"),
            ("/backups/full".to_string(), String::new())
        );
    }
}
