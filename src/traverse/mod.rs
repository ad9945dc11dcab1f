//! Traversal types
//!
//! Record-level identity and data model used by the traversal engine.
//! Raw column values travel in PostgreSQL text representation; formatting
//! decisions are made later, from declared catalog types, never from the
//! values themselves.

pub mod engine;
pub mod source;

use crate::error::{CarveError, Result};
use crate::schema::{SchemaGraph, TableRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// A column value in PostgreSQL text representation; `None` is SQL NULL.
pub type RawValue = Option<String>;

/// One fetched row: column name -> raw value.
pub type RawRow = HashMap<String, RawValue>;

/// Primary-key tuple in the table's PK column order. PK columns are
/// non-null by definition.
pub type PkTuple = Vec<String>;

/// Uniquely names a row: (table, primary-key tuple).
///
/// Equality, hashing, and ordering are element-wise; ordering (table
/// ascending, then PK tuple lexicographic) is what the sorter uses for
/// deterministic tie-breaking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordIdentifier {
    pub table_ref: TableRef,
    pub pk: PkTuple,
}

impl RecordIdentifier {
    pub fn new(table_ref: TableRef, pk: PkTuple) -> Self {
        Self { table_ref, pk }
    }
}

impl fmt::Display for RecordIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.table_ref, self.pk.join(","))
    }
}

/// A collected row with its resolved outgoing dependencies.
///
/// Mutated only to add dependencies until traversal closes, then read-only
/// for the sorter and the writer.
#[derive(Debug, Clone)]
pub struct RecordData {
    pub id: RecordIdentifier,
    pub values: RawRow,
    pub dependencies: BTreeSet<RecordIdentifier>,
}

impl RecordData {
    pub fn new(id: RecordIdentifier, values: RawRow) -> Self {
        Self {
            id,
            values,
            dependencies: BTreeSet::new(),
        }
    }
}

/// Scoping predicate restricting which rows of one table are admitted.
/// Bounds are inclusive and must be of a date/time type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeframeFilter {
    pub table_ref: TableRef,
    pub column: String,
    pub lower: String,
    pub upper: String,
}

impl TimeframeFilter {
    /// Check the filter against the schema graph before traversal: the
    /// column must exist and be of a date/time type.
    pub fn validate(&self, graph: &SchemaGraph) -> Result<()> {
        let table = graph.require(&self.table_ref)?;

        let column = table.column(&self.column).ok_or_else(|| {
            CarveError::InvalidFilter(format!(
                "column {} does not exist on {}",
                self.column, self.table_ref
            ))
        })?;

        let data_type = column.data_type.to_ascii_lowercase();
        if !(data_type.contains("timestamp") || data_type.contains("date") || data_type.contains("time")) {
            return Err(CarveError::InvalidFilter(format!(
                "column {}.{} has type {}, expected a date/time type",
                self.table_ref, self.column, column.data_type
            )));
        }

        Ok(())
    }
}

/// How self-referencing FK edges are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraversalMode {
    /// Self-referencing edges are followed from seeds only. The default:
    /// the user wants "this record and its dependencies", not its whole
    /// hierarchy of siblings.
    #[default]
    Strict,
    /// All FK edges are followed uniformly.
    Wide,
}

/// User-supplied traversal starting point.
#[derive(Debug, Clone)]
pub enum Seed {
    /// Explicit rows of one table, by primary key.
    Rows {
        table_ref: TableRef,
        pks: Vec<PkTuple>,
    },
    /// Every row of one table inside a timeframe window.
    Timeframe(TimeframeFilter),
}

impl Seed {
    pub fn table_ref(&self) -> &TableRef {
        match self {
            Seed::Rows { table_ref, .. } => table_ref,
            Seed::Timeframe(filter) => &filter.table_ref,
        }
    }
}
