//! Schema graph model
//!
//! In-memory representation of the source database schema: tables,
//! columns, primary keys, unique constraints, and foreign keys indexed in
//! both directions. Built once per run by the introspector (or restored
//! from the cache) and shared read-only with every downstream component.

pub mod cache;
pub mod introspect;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Qualified table name. Ordering is (schema, name), which downstream
/// components rely on for deterministic iteration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Column metadata as reported by the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// 1-based position within the table; insert column lists follow it.
    pub ordinal: i32,
    /// Readable type from information_schema (e.g. `integer`, `ARRAY`).
    pub data_type: String,
    /// Underlying type name (e.g. `int4`, `_int4`, `jsonb`), used for casts.
    pub udt_name: String,
    pub nullable: bool,
    pub default_expression: Option<String>,
    /// True for declared identity columns and sequence-backed defaults.
    pub is_identity: bool,
}

/// Foreign key constraint. Column lists are ordered and of equal length;
/// composite keys are supported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub from_table: TableRef,
    pub from_columns: Vec<String>,
    pub to_table: TableRef,
    pub to_columns: Vec<String>,
    pub on_delete: String,
}

impl ForeignKey {
    /// A constraint whose two ends are the same table.
    pub fn is_self_referencing(&self) -> bool {
        self.from_table == self.to_table
    }
}

/// Table metadata with both FK directions materialised
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub table_ref: TableRef,
    /// Columns in ordinal order.
    pub columns: Vec<Column>,
    /// Primary key column names in constraint order.
    pub primary_key: Vec<String>,
    /// Non-PK unique constraints, one column list per constraint.
    pub unique_sets: Vec<Vec<String>>,
    /// FKs declared on this table.
    pub outgoing: Vec<ForeignKey>,
    /// FKs declared elsewhere that reference this table.
    pub incoming: Vec<ForeignKey>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Single-column primary key, eligible for `IN (...)` batching.
    pub fn has_scalar_pk(&self) -> bool {
        self.primary_key.len() == 1
    }

    /// True when every PK column is auto-generated, which makes the table
    /// eligible for PK remapping.
    pub fn pk_is_identity_only(&self) -> bool {
        !self.primary_key.is_empty()
            && self.primary_key.iter().all(|pk| {
                self.column(pk).map(|c| c.is_identity).unwrap_or(false)
            })
    }
}

/// The schema graph: every introspected table, keyed by qualified name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaGraph {
    #[serde(with = "tables_as_seq")]
    pub tables: BTreeMap<TableRef, Table>,
}

/// `BTreeMap<TableRef, Table>` can't serialize to JSON directly because
/// `TableRef` isn't a string, so JSON's object-key requirement rejects it.
/// Encode/decode as a sequence of pairs instead; `BTreeMap`'s `Ord` on
/// `TableRef` keeps reinsertion order identical to the original map.
mod tables_as_seq {
    use super::{Table, TableRef};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<TableRef, Table>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        map.iter().collect::<Vec<_>>().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<TableRef, Table>, D::Error> {
        let pairs = Vec::<(TableRef, Table)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

impl SchemaGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table_ref: &TableRef) -> Option<&Table> {
        self.tables.get(table_ref)
    }

    pub fn insert(&mut self, table: Table) {
        self.tables.insert(table.table_ref.clone(), table);
    }

    pub fn table_refs(&self) -> impl Iterator<Item = &TableRef> {
        self.tables.keys()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Content checksum over table, column, and FK identity.
    ///
    /// BTreeMap iteration is already sorted, so equal graphs hash equally
    /// regardless of introspection order. The cache stores this next to
    /// the serialized graph and treats a mismatch as corruption.
    pub fn compute_checksum(&self) -> String {
        let mut hasher = Sha256::new();

        for (table_ref, table) in &self.tables {
            hasher.update(table_ref.to_string().as_bytes());
            for col in &table.columns {
                hasher.update(
                    format!("{}.{}:{}:{}", table_ref, col.name, col.data_type, col.nullable)
                        .as_bytes(),
                );
            }
            for fk in &table.outgoing {
                hasher.update(format!("FK:{}:{}->{}", fk.name, fk.from_table, fk.to_table).as_bytes());
            }
        }

        format!("{:x}", hasher.finalize())
    }
}
