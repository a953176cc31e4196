//! CLI tool for inspecting and exporting SQL backups.

mod error;
mod output;

use std::io::{BufWriter, Write};
use std::path::PathBuf;

use backup_inspect_core::{
    chain::{discover_incrementals, list_full_backups},
    export::{CSV_FORMAT, DEFAULT_NULL_AS, ExportOptions, export_table},
    keys::StartKey,
    manifest::{read_manifest_at, read_manifest_summary, render_manifest_summary},
    storage::StorageConfig,
};
use clap::{Parser, Subcommand};
use log::debug;
use snafu::ResultExt;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::{
    error::{
        CliResult, ExportSnafu, FetchManifestSnafu, InvalidStartKeySnafu, ListBackupsSnafu,
        ListIncrementalsSnafu, RenderManifestSnafu, WriteOutputSnafu,
    },
    output::{backups_table, incrementals_table},
};

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a summary of one backup's manifest
    Show {
        /// Backup location (bare path or nodelocal://self/..., file://...)
        path: String,
    },

    /// List the full backups of a collection
    ListBackups {
        /// Collection location
        collection: String,
    },

    /// List a full backup and its incremental backups
    ListIncremental {
        /// Full backup location, or the same path under incrementals/
        path: String,
    },

    /// Export one table's rows as CSV
    Export {
        /// Backup locations, full backup first
        #[arg(required = true)]
        paths: Vec<String>,

        /// Fully qualified table name, e.g. db.public.t
        #[arg(long)]
        table: String,

        /// Read time (timestamp or decimal); defaults to the end of the chain
        #[arg(long = "as-of", visible_alias = "up-to")]
        as_of: Option<String>,

        /// Emit every revision up to --as-of instead of the state at it
        #[arg(long, default_value_t = false)]
        with_revisions: bool,

        /// Stop after this many rows (0 for no limit)
        #[arg(long, default_value_t = 0)]
        max_rows: u64,

        /// Write the output to this location instead of stdout
        #[arg(long)]
        destination: Option<String>,

        /// Output format (only csv)
        #[arg(long, default_value = CSV_FORMAT)]
        format: String,

        /// Rendering of NULL fields
        #[arg(long = "nullas", default_value = DEFAULT_NULL_AS)]
        null_as: String,

        /// Key to start from: hex:<hex>, raw:<escaped> or bytekey:<escaped suffix>
        #[arg(long)]
        start_key: Option<String>,
    },
}

#[derive(Debug, Parser)]
#[command(name = "bkinspect")]
struct Cli {
    /// Directory that nodelocal://self and bare paths resolve under
    #[arg(long, global = true, default_value = "data/extern")]
    external_io_dir: PathBuf,

    /// Log progress to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "off" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber may already be installed; keep it.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

async fn cmd_show(config: &StorageConfig, path: &str) -> CliResult<()> {
    let (_, manifest) = read_manifest_at(config, path)
        .await
        .context(FetchManifestSnafu { path })?;
    let summary = render_manifest_summary(&manifest).context(RenderManifestSnafu { path })?;
    println!("{summary}");
    Ok(())
}

async fn cmd_list_backups(config: &StorageConfig, collection: &str) -> CliResult<()> {
    let backups = list_full_backups(config, collection)
        .await
        .context(ListBackupsSnafu { path: collection })?;
    println!("{}", backups_table(&backups));
    Ok(())
}

async fn cmd_list_incremental(config: &StorageConfig, path: &str) -> CliResult<()> {
    let locations = discover_incrementals(config, path)
        .await
        .context(ListIncrementalsSnafu { path })?;

    let mut layers = Vec::new();
    for uri in locations.uris() {
        let store = config.connect(uri);
        let manifest = read_manifest_summary(&store).await;
        store.close();
        let manifest = manifest.context(FetchManifestSnafu {
            path: uri.to_string(),
        })?;
        layers.push((uri.clone(), manifest));
    }

    println!("{}", incrementals_table(&layers));
    Ok(())
}

async fn cmd_export(config: &StorageConfig, paths: &[String], opts: ExportOptions) -> CliResult<()> {
    let mut out = BufWriter::new(std::io::stdout());
    let summary = export_table(config, paths, &opts, &mut out)
        .await
        .context(ExportSnafu {
            table: opts.table.clone(),
        })?;
    out.flush().context(WriteOutputSnafu)?;

    if let Some(notice) = &summary.revision_notice {
        eprintln!("{notice}");
    }
    if let Some(dest) = &summary.destination {
        eprintln!("Wrote {} rows to {dest}", summary.rows);
    }
    Ok(())
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = StorageConfig::new(cli.external_io_dir.clone());
    debug!("external IO dir: {}", cli.external_io_dir.display());

    match cli.cmd {
        Command::Show { path } => cmd_show(&config, &path).await,

        Command::ListBackups { collection } => cmd_list_backups(&config, &collection).await,

        Command::ListIncremental { path } => cmd_list_incremental(&config, &path).await,

        Command::Export {
            paths,
            table,
            as_of,
            with_revisions,
            max_rows,
            destination,
            format,
            null_as,
            start_key,
        } => {
            let start_key = start_key
                .map(|value| StartKey::parse(&value).context(InvalidStartKeySnafu { value: &value }))
                .transpose()?;
            let opts = ExportOptions {
                as_of,
                with_revisions,
                max_rows,
                destination,
                format,
                null_as,
                start_key,
                ..ExportOptions::new(table)
            };
            cmd_export(&config, &paths, opts).await
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        debug!("failed with {:?}", e.kind());
        eprintln!("{e}");
        std::process::exit(1);
    }
}
