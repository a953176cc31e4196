use backup_inspect_core::{
    chain::ChainError, error::ErrorKind, export::ExportError, keys::KeyParseError,
    manifest::ManifestError,
};

use snafu::Snafu;

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("Fetching backup manifest at {path}: {source}"))]
    FetchManifest {
        path: String,
        #[snafu(source(from(ManifestError, Box::new)))]
        source: Box<ManifestError>,
    },

    #[snafu(display("Rendering backup manifest at {path}: {source}"))]
    RenderManifest {
        path: String,
        #[snafu(source(from(ManifestError, Box::new)))]
        source: Box<ManifestError>,
    },

    #[snafu(display("Listing full backups in collection {path}: {source}"))]
    ListBackups {
        path: String,
        #[snafu(source(from(ChainError, Box::new)))]
        source: Box<ChainError>,
    },

    #[snafu(display("Listing incremental backups of {path}: {source}"))]
    ListIncrementals {
        path: String,
        #[snafu(source(from(ChainError, Box::new)))]
        source: Box<ChainError>,
    },

    #[snafu(display("Invalid --start-key '{value}': {source}"))]
    InvalidStartKey {
        value: String,
        source: KeyParseError,
    },

    #[snafu(display("Exporting table {table}: {source}"))]
    Export {
        table: String,
        #[snafu(source(from(ExportError, Box::new)))]
        source: Box<ExportError>,
    },

    #[snafu(display("Writing to stdout: {source}"))]
    WriteOutput { source: std::io::Error },
}

impl CliError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CliError::FetchManifest { source, .. } | CliError::RenderManifest { source, .. } => {
                source.kind()
            }
            CliError::ListBackups { source, .. } | CliError::ListIncrementals { source, .. } => {
                source.kind()
            }
            CliError::InvalidStartKey { source, .. } => source.kind(),
            CliError::Export { source, .. } => source.kind(),
            CliError::WriteOutput { .. } => ErrorKind::StorageFailure,
        }
    }
}
