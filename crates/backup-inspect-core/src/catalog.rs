//! Schema catalog stored in backup manifests.
//!
//! - [`descriptor`]: the descriptor data model (databases, schemas, types,
//!   tables and their columns).
//! - [`names`]: qualified-name rendering for manifest summaries.
//! - [`resolver`]: `database.schema.table` lookup used to pick the exported
//!   table.

pub mod descriptor;
pub mod names;
pub mod resolver;

pub use descriptor::{
    ColumnDescriptor, ColumnType, DatabaseDescriptor, Descriptor, DescriptorId, DescriptorKind,
    IndexDescriptor, PUBLIC_SCHEMA_ID, PUBLIC_SCHEMA_NAME, SchemaDescriptor, TableDescriptor,
    TypeDescriptor,
};
pub use names::{DescriptorNames, resolve_names, sort_by_dependency_depth};
pub use resolver::{LookupError, QualifiedName, lookup_table};
