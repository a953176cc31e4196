//! Schema-object descriptors recorded in backup manifests.
//!
//! Descriptors are stored as `kind`-tagged JSON objects. Every descriptor
//! carries an id and a parent id; schemas hang off a database, tables and
//! types hang off both a database (`parent_id`) and a schema
//! (`parent_schema_id`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::keys::{Key, Span, table_index_prefix};

/// Identifier of a descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptorId(pub u32);

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Well-known id of the `public` schema present in every database.
///
/// Older manifests do not carry an explicit descriptor for it.
pub const PUBLIC_SCHEMA_ID: DescriptorId = DescriptorId(29);

/// Name of the default schema.
pub const PUBLIC_SCHEMA_NAME: &str = "public";

/// Kind tag of a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DescriptorKind {
    /// A database.
    Database,
    /// A schema within a database.
    Schema,
    /// A user-defined type.
    Type,
    /// A table.
    Table,
}

impl DescriptorKind {
    /// Depth in the parent graph: databases first, then schemas, then leaves.
    pub fn depth(&self) -> u8 {
        match self {
            DescriptorKind::Database => 0,
            DescriptorKind::Schema => 1,
            DescriptorKind::Type | DescriptorKind::Table => 2,
        }
    }
}

/// A database descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseDescriptor {
    /// Descriptor id.
    pub id: DescriptorId,
    /// Database name.
    pub name: String,
}

/// A schema descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    /// Descriptor id.
    pub id: DescriptorId,
    /// Schema name.
    pub name: String,
    /// Owning database.
    pub parent_id: DescriptorId,
}

/// A user-defined type descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Descriptor id.
    pub id: DescriptorId,
    /// Type name.
    pub name: String,
    /// Owning database.
    pub parent_id: DescriptorId,
    /// Owning schema.
    pub parent_schema_id: DescriptorId,
}

/// Column value types understood by the row codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// 64-bit float.
    Float,
    /// Arbitrary-precision decimal, kept in its textual form.
    Decimal,
    /// UTF-8 string.
    String,
    /// Byte string.
    Bytes,
    /// UTC timestamp with microsecond precision.
    Timestamp,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnType::Bool => "bool",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Decimal => "decimal",
            ColumnType::String => "string",
            ColumnType::Bytes => "bytes",
            ColumnType::Timestamp => "timestamp",
        };
        f.write_str(s)
    }
}

fn default_true() -> bool {
    true
}

/// One column of a table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column id, stable across renames.
    pub id: u32,
    /// Column name.
    pub name: String,
    /// Value type.
    #[serde(rename = "type")]
    pub ty: ColumnType,
    /// Whether NULL is allowed.
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Hidden columns are stored but not exported.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
}

/// The primary index of a table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Index id within the table.
    pub id: u32,
    /// Index name.
    pub name: String,
    /// Columns making up the key, in key order.
    pub key_column_ids: Vec<u32>,
}

/// A table descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Descriptor id.
    pub id: DescriptorId,
    /// Table name.
    pub name: String,
    /// Owning database.
    pub parent_id: DescriptorId,
    /// Owning schema.
    pub parent_schema_id: DescriptorId,
    /// Schema version, bumped on every change.
    #[serde(default)]
    pub version: u64,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDescriptor>,
    /// The primary index.
    pub primary_index: IndexDescriptor,
}

impl TableDescriptor {
    /// Columns visible to readers, in declaration order.
    pub fn public_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| !c.hidden)
    }

    /// Look up a column by id.
    pub fn column(&self, id: u32) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.id == id)
    }

    /// Key prefix of the primary index.
    pub fn primary_index_prefix(&self) -> Key {
        table_index_prefix(self.id.0, self.primary_index.id)
    }

    /// Key span holding every row of the table.
    pub fn primary_index_span(&self) -> Span {
        let prefix = self.primary_index_prefix();
        let end = prefix.prefix_end();
        Span::new(prefix, end)
    }

    /// True when both descriptors expose the same public columns.
    pub fn same_public_columns(&self, other: &TableDescriptor) -> bool {
        self.public_columns().eq(other.public_columns())
    }
}

/// Any descriptor stored in a manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Descriptor {
    /// A database.
    Database(DatabaseDescriptor),
    /// A schema.
    Schema(SchemaDescriptor),
    /// A user-defined type.
    Type(TypeDescriptor),
    /// A table.
    Table(TableDescriptor),
}

impl Descriptor {
    /// Descriptor id.
    pub fn id(&self) -> DescriptorId {
        match self {
            Descriptor::Database(d) => d.id,
            Descriptor::Schema(d) => d.id,
            Descriptor::Type(d) => d.id,
            Descriptor::Table(d) => d.id,
        }
    }

    /// Unqualified name.
    pub fn name(&self) -> &str {
        match self {
            Descriptor::Database(d) => &d.name,
            Descriptor::Schema(d) => &d.name,
            Descriptor::Type(d) => &d.name,
            Descriptor::Table(d) => &d.name,
        }
    }

    /// Kind tag.
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Descriptor::Database(_) => DescriptorKind::Database,
            Descriptor::Schema(_) => DescriptorKind::Schema,
            Descriptor::Type(_) => DescriptorKind::Type,
            Descriptor::Table(_) => DescriptorKind::Table,
        }
    }

    /// The table descriptor, if this is one.
    pub fn as_table(&self) -> Option<&TableDescriptor> {
        match self {
            Descriptor::Table(t) => Some(t),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_are_kind_tagged() -> Result<(), Box<dyn std::error::Error>> {
        let json = r#"[
            {"kind":"database","id":100,"name":"d"},
            {"kind":"table","id":104,"name":"t","parent_id":100,"parent_schema_id":29,
             "columns":[{"id":1,"name":"id","type":"int","nullable":false},
                        {"id":2,"name":"v","type":"string"}],
             "primary_index":{"id":1,"name":"t_pkey","key_column_ids":[1]}}
        ]"#;
        let descs: Vec<Descriptor> = serde_json::from_str(json)?;
        assert_eq!(descs[0].kind(), DescriptorKind::Database);
        let table = descs[1].as_table().ok_or("expected table")?;
        assert_eq!(table.parent_schema_id, PUBLIC_SCHEMA_ID);
        assert!(table.columns[1].nullable);
        assert_eq!(table.columns[1].ty, ColumnType::String);
        Ok(())
    }

    #[test]
    fn primary_index_span_covers_prefix() {
        let table = TableDescriptor {
            id: DescriptorId(104),
            name: "t".into(),
            parent_id: DescriptorId(100),
            parent_schema_id: PUBLIC_SCHEMA_ID,
            version: 1,
            columns: vec![],
            primary_index: IndexDescriptor {
                id: 1,
                name: "t_pkey".into(),
                key_column_ids: vec![],
            },
        };
        let span = table.primary_index_span();
        assert_eq!(span.key.pretty(), "/Table/104/1");
        assert_eq!(span.end_key.pretty(), "/Table/104/2");
        assert!(span.contains_key(&table.primary_index_prefix().with_suffix(&[0xff; 4]).into_bytes()));
    }
}
