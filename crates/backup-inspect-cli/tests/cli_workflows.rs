//! End-to-end tests for the `bkinspect` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

mod common;

use common::{FULL, INC, TestResult, write_collection};

const TABLE: &str = "shop.public.people";

fn cli(root: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("bkinspect"));
    cmd.arg("--external-io-dir").arg(root.path());
    cmd
}

fn collection() -> TestResult<TempDir> {
    let tmp = TempDir::new()?;
    write_collection(tmp.path())?;
    Ok(tmp)
}

#[test]
fn show_prints_manifest_summary() -> TestResult {
    let tmp = collection()?;
    cli(&tmp)
        .args(["show", FULL])
        .assert()
        .success()
        .stdout(contains("\"FormatVersion\": 1"))
        .stdout(contains("\"shop.public.people\""))
        .stdout(contains("\"EndTime\": \"2022-02-10T00:00:00Z\""));
    Ok(())
}

#[test]
fn show_missing_backup_fails() -> TestResult {
    let tmp = TempDir::new()?;
    cli(&tmp)
        .args(["show", "nowhere"])
        .assert()
        .failure()
        .stderr(contains("Fetching backup manifest at nowhere"));
    Ok(())
}

#[test]
fn list_backups_prints_relative_paths() -> TestResult {
    let tmp = collection()?;
    cli(&tmp)
        .args(["list-backups", "coll"])
        .assert()
        .success()
        .stdout(contains("./2022/02/10-000000.00"))
        .stdout(contains("incrementals").not());
    Ok(())
}

#[test]
fn list_incremental_accepts_both_paths() -> TestResult {
    let tmp = collection()?;
    let direct = cli(&tmp)
        .args(["list-incremental", FULL])
        .assert()
        .success()
        .stdout(contains("start time"))
        .stdout(contains(format!("/{INC}")))
        .stdout(contains("2022-02-10T01:00:00Z"))
        .get_output()
        .stdout
        .clone();

    let via_subdir = cli(&tmp)
        .args(["list-incremental", "coll/incrementals/2022/02/10-000000.00"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(direct, via_subdir);
    Ok(())
}

#[test]
fn export_writes_latest_rows() -> TestResult {
    let tmp = collection()?;
    cli(&tmp)
        .args(["export", FULL, INC, "--table", TABLE])
        .assert()
        .success()
        .stdout("1,alicia\n2,null\n");
    Ok(())
}

#[test]
fn export_as_of_full_backup_end() -> TestResult {
    let tmp = collection()?;
    cli(&tmp)
        .args(["export", FULL, INC, "--table", TABLE])
        .args(["--as-of", "2022-02-10T00:00:00Z"])
        .assert()
        .success()
        .stdout("1,alice\n2,null\n3,carol\n");

    cli(&tmp)
        .args(["export", FULL, INC, "--table", TABLE])
        .args(["--up-to", "2022-02-10 00:00:00"])
        .assert()
        .success()
        .stdout("1,alice\n2,null\n3,carol\n");
    Ok(())
}

#[test]
fn export_between_backups_needs_revision_history() -> TestResult {
    let tmp = collection()?;
    cli(&tmp)
        .args(["export", FULL, INC, "--table", TABLE])
        .args(["--as-of", "2022-02-10T00:30:00Z"])
        .assert()
        .failure()
        .stderr(contains("Exporting table shop.public.people"));
    Ok(())
}

#[test]
fn export_knobs() -> TestResult {
    let tmp = collection()?;
    cli(&tmp)
        .args(["export", FULL, INC, "--table", TABLE, "--nullas", "N/A"])
        .assert()
        .success()
        .stdout("1,alicia\n2,N/A\n");

    cli(&tmp)
        .args(["export", FULL, INC, "--table", TABLE, "--max-rows", "1"])
        .assert()
        .success()
        .stdout("1,alicia\n");

    cli(&tmp)
        .args(["export", FULL, "--table", TABLE])
        // Int key 2, appended to the table's index prefix.
        .args(["--start-key", "bytekey:\\x12\\x80\\0\\0\\0\\0\\0\\0\\x02"])
        .assert()
        .success()
        .stdout("2,null\n3,carol\n");
    Ok(())
}

#[test]
fn export_to_destination() -> TestResult {
    let tmp = collection()?;
    cli(&tmp)
        .args(["export", FULL, INC, "--table", TABLE])
        .args(["--destination", "out/people.csv"])
        .assert()
        .success()
        .stdout("")
        .stderr(contains("Wrote 2 rows"));

    let written = std::fs::read_to_string(tmp.path().join("out").join("people.csv"))?;
    assert_eq!(written, "1,alicia\n2,null\n");
    Ok(())
}

#[test]
fn export_rejects_bad_arguments() -> TestResult {
    let tmp = collection()?;
    cli(&tmp)
        .args(["export", FULL, "--table", TABLE, "--format", "json"])
        .assert()
        .failure()
        .stderr(contains("not supported"));

    cli(&tmp)
        .args(["export", FULL, "--table", TABLE, "--start-key", "deadbeef"])
        .assert()
        .failure()
        .stderr(contains("Invalid --start-key"));

    cli(&tmp)
        .args(["export", FULL, "--table", "shop.public.nope"])
        .assert()
        .failure()
        .stderr(contains("Exporting table shop.public.nope"));

    cli(&tmp)
        .args(["export", "--table", TABLE])
        .assert()
        .failure();
    Ok(())
}

#[test]
fn export_help_documents_every_flag() -> TestResult {
    let tmp = TempDir::new()?;
    cli(&tmp)
        .args(["export", "--help"])
        .assert()
        .success()
        .stdout(contains("--format <FORMAT>"))
        .stdout(contains("Output format (only csv)"))
        .stdout(contains("Rendering of NULL fields"));
    Ok(())
}

#[test]
fn list_incremental_reads_escaped_locations() -> TestResult {
    let tmp = collection()?;
    cli(&tmp)
        .args(["list-incremental", "nodelocal://self/co%6Cl/2022/02/10-000000.00?AUTH=implicit"])
        .assert()
        .success()
        .stdout(contains(format!("/{FULL}")))
        .stdout(contains(format!("/{INC}")));
    Ok(())
}
