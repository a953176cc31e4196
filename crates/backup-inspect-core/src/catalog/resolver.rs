//! Lookup of a table by its `database.schema.table` name.

use snafu::prelude::*;

use crate::{
    catalog::descriptor::{
        Descriptor, DescriptorId, PUBLIC_SCHEMA_ID, PUBLIC_SCHEMA_NAME, TableDescriptor,
    },
    error::ErrorKind,
};

/// Errors produced by name lookup.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LookupError {
    /// The name does not have exactly three parts.
    #[snafu(display(
        "table name should be specified in format databaseName.schemaName.tableName, got {name:?}"
    ))]
    MalformedName {
        /// The rejected name.
        name: String,
    },

    /// No table with that name exists in the descriptor set.
    #[snafu(display("table {name} not found"))]
    TableNotFound {
        /// The requested name.
        name: String,
    },
}

impl LookupError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LookupError::MalformedName { .. } => ErrorKind::InvalidArgument,
            LookupError::TableNotFound { .. } => ErrorKind::NotFound,
        }
    }
}

/// A `database.schema.table` triple.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualifiedName {
    /// Database part.
    pub database: String,
    /// Schema part.
    pub schema: String,
    /// Table part.
    pub table: String,
}

impl QualifiedName {
    /// Split a dotted name; exactly three non-empty parts are required.
    pub fn parse(name: &str) -> Result<Self, LookupError> {
        let parts: Vec<&str> = name.split('.').collect();
        match parts.as_slice() {
            [db, schema, table] if !db.is_empty() && !schema.is_empty() && !table.is_empty() => {
                Ok(Self {
                    database: db.to_string(),
                    schema: schema.to_string(),
                    table: table.to_string(),
                })
            }
            _ => MalformedNameSnafu { name }.fail(),
        }
    }
}

fn schema_id(descs: &[Descriptor], db_id: DescriptorId, schema: &str) -> Option<DescriptorId> {
    let explicit = descs.iter().find_map(|d| match d {
        Descriptor::Schema(s) if s.parent_id == db_id && s.name.eq_ignore_ascii_case(schema) => {
            Some(s.id)
        }
        _ => None,
    });
    explicit.or_else(|| schema.eq_ignore_ascii_case(PUBLIC_SCHEMA_NAME).then_some(PUBLIC_SCHEMA_ID))
}

/// Find the table called `name` among `descs`.
///
/// Name parts compare case-insensitively. The `public` schema matches either
/// an explicit schema descriptor or the well-known public schema id.
pub fn lookup_table<'a>(
    descs: &'a [Descriptor],
    name: &str,
) -> Result<&'a TableDescriptor, LookupError> {
    let qualified = QualifiedName::parse(name)?;

    let found = descs
        .iter()
        .filter_map(|d| match d {
            Descriptor::Database(db) if db.name.eq_ignore_ascii_case(&qualified.database) => {
                Some(db.id)
            }
            _ => None,
        })
        .find_map(|db_id| {
            let schema_id = schema_id(descs, db_id, &qualified.schema)?;
            descs.iter().filter_map(Descriptor::as_table).find(|t| {
                t.parent_id == db_id
                    && t.parent_schema_id == schema_id
                    && t.name.eq_ignore_ascii_case(&qualified.table)
            })
        });

    found.context(TableNotFoundSnafu { name })
}
