//! Fully-qualified names for the descriptors of a manifest.
//!
//! Resolution is a single pass in iteration order. Parents must be visited
//! before their children (databases, then schemas, then tables and types);
//! use [`sort_by_dependency_depth`] first when the source order does not
//! guarantee that. A child whose parent has not been seen resolves against an
//! empty parent name.

use std::collections::BTreeMap;

use log::debug;

use crate::catalog::descriptor::{
    Descriptor, DescriptorId, PUBLIC_SCHEMA_ID, PUBLIC_SCHEMA_NAME,
};

/// Qualified names keyed by descriptor id, one map per kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DescriptorNames {
    /// `db`
    pub databases: BTreeMap<DescriptorId, String>,
    /// `db.schema` (plus the bare pre-seeded `public` entry).
    pub schemas: BTreeMap<DescriptorId, String>,
    /// `db.schema.table`
    pub tables: BTreeMap<DescriptorId, String>,
    /// `db.schema.type`
    pub types: BTreeMap<DescriptorId, String>,
}

/// Stable sort placing databases first, schemas second, tables and types last.
pub fn sort_by_dependency_depth(descs: &mut [Descriptor]) {
    descs.sort_by_key(|d| d.kind().depth());
}

/// Resolve qualified names for `descs`, which must be in dependency order.
pub fn resolve_names(descs: &[Descriptor]) -> DescriptorNames {
    let mut names = DescriptorNames::default();
    names
        .schemas
        .insert(PUBLIC_SCHEMA_ID, PUBLIC_SCHEMA_NAME.to_string());

    for desc in descs {
        match desc {
            Descriptor::Database(db) => {
                names.databases.insert(db.id, db.name.clone());
            }
            Descriptor::Schema(schema) => {
                let db = lookup(&names.databases, schema.parent_id);
                names
                    .schemas
                    .insert(schema.id, format!("{db}.{}", schema.name));
            }
            Descriptor::Type(ty) => {
                let qualified = qualify(&names, ty.parent_id, ty.parent_schema_id, &ty.name);
                names.types.insert(ty.id, qualified);
            }
            Descriptor::Table(table) => {
                let qualified =
                    qualify(&names, table.parent_id, table.parent_schema_id, &table.name);
                names.tables.insert(table.id, qualified);
            }
        }
    }

    debug!(
        "resolved {} databases, {} schemas, {} tables, {} types",
        names.databases.len(),
        names.schemas.len(),
        names.tables.len(),
        names.types.len()
    );
    names
}

fn lookup(map: &BTreeMap<DescriptorId, String>, id: DescriptorId) -> &str {
    map.get(&id).map(String::as_str).unwrap_or_default()
}

fn qualify(
    names: &DescriptorNames,
    db_id: DescriptorId,
    schema_id: DescriptorId,
    name: &str,
) -> String {
    let schema = lookup(&names.schemas, schema_id);
    if schema == PUBLIC_SCHEMA_NAME {
        let db = lookup(&names.databases, db_id);
        format!("{db}.{schema}.{name}")
    } else {
        format!("{schema}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::descriptor::{
        DatabaseDescriptor, IndexDescriptor, SchemaDescriptor, TableDescriptor, TypeDescriptor,
    };

    fn table(id: u32, name: &str, db: u32, schema: DescriptorId) -> Descriptor {
        Descriptor::Table(TableDescriptor {
            id: DescriptorId(id),
            name: name.into(),
            parent_id: DescriptorId(db),
            parent_schema_id: schema,
            version: 1,
            columns: vec![],
            primary_index: IndexDescriptor {
                id: 1,
                name: "pk".into(),
                key_column_ids: vec![],
            },
        })
    }

    fn database(id: u32, name: &str) -> Descriptor {
        Descriptor::Database(DatabaseDescriptor {
            id: DescriptorId(id),
            name: name.into(),
        })
    }

    #[test]
    fn preseeded_public_schema_gets_database_prefix() {
        let descs = vec![
            database(100, "d"),
            Descriptor::Schema(SchemaDescriptor {
                id: PUBLIC_SCHEMA_ID,
                name: "public".into(),
                parent_id: DescriptorId(100),
            }),
            table(104, "t", 100, PUBLIC_SCHEMA_ID),
        ];
        let names = resolve_names(&descs);
        assert_eq!(names.databases[&DescriptorId(100)], "d");
        assert_eq!(names.schemas[&PUBLIC_SCHEMA_ID], "d.public");
        assert_eq!(names.tables[&DescriptorId(104)], "d.public.t");
    }

    #[test]
    fn legacy_manifest_without_public_schema_descriptor() {
        let descs = vec![database(100, "d"), table(104, "t", 100, PUBLIC_SCHEMA_ID)];
        let names = resolve_names(&descs);
        assert_eq!(names.schemas[&PUBLIC_SCHEMA_ID], "public");
        assert_eq!(names.tables[&DescriptorId(104)], "d.public.t");
    }

    #[test]
    fn user_schema_and_type_are_qualified() {
        let descs = vec![
            database(100, "d"),
            Descriptor::Schema(SchemaDescriptor {
                id: DescriptorId(105),
                name: "sc".into(),
                parent_id: DescriptorId(100),
            }),
            Descriptor::Type(TypeDescriptor {
                id: DescriptorId(106),
                name: "status".into(),
                parent_id: DescriptorId(100),
                parent_schema_id: DescriptorId(105),
            }),
            table(107, "t2", 100, DescriptorId(105)),
        ];
        let names = resolve_names(&descs);
        assert_eq!(names.schemas[&DescriptorId(105)], "d.sc");
        assert_eq!(names.types[&DescriptorId(106)], "d.sc.status");
        assert_eq!(names.tables[&DescriptorId(107)], "d.sc.t2");
    }

    #[test]
    fn sorting_puts_parents_first() {
        let mut descs = vec![
            table(104, "t", 100, PUBLIC_SCHEMA_ID),
            Descriptor::Schema(SchemaDescriptor {
                id: DescriptorId(105),
                name: "sc".into(),
                parent_id: DescriptorId(100),
            }),
            database(100, "d"),
        ];
        sort_by_dependency_depth(&mut descs);
        let ids: Vec<u32> = descs.iter().map(|d| d.id().0).collect();
        assert_eq!(ids, vec![100, 105, 104]);

        let names = resolve_names(&descs);
        assert_eq!(names.tables[&DescriptorId(104)], "d.public.t");
    }
}
