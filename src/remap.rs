//! Primary-key remapper
//!
//! When remapping is enabled, rows of tables whose primary key is a
//! single auto-generated column give up their source PK values: the
//! target database assigns new ones at replay time, captured into
//! script-local variables. Every referencing column is rewritten to use
//! the captured variable instead of the literal.
//!
//! Composite primary keys are never remapped: a non-identity component
//! means the row's identity is already portable, and a multi-column
//! identity PK has no single value to capture.

use crate::error::{CarveError, Result};
use crate::schema::{SchemaGraph, Table};
use crate::traverse::RecordIdentifier;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Mapping from remapped record to its placeholder variable name.
#[derive(Debug, Default)]
pub struct PkMap {
    entries: BTreeMap<RecordIdentifier, String>,
}

impl PkMap {
    pub fn get(&self, id: &RecordIdentifier) -> Option<&str> {
        self.entries.get(id).map(String::as_str)
    }

    pub fn contains(&self, id: &RecordIdentifier) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RecordIdentifier, &str)> {
        self.entries.iter().map(|(id, token)| (id, token.as_str()))
    }
}

/// A table is remappable when its PK is one identity column.
pub fn table_is_remappable(table: &Table) -> bool {
    table.primary_key.len() == 1 && table.pk_is_identity_only()
}

/// Build the PK map over the sorted record stream.
///
/// Placeholder tokens are allocated in emission order, so the same input
/// always yields the same variable names. A remappable record flagged by
/// the sorter as cycle-involved is fatal: its placeholder value would
/// depend on a row that in turn needs this row's identity first.
pub fn build_pk_map(
    order: &[RecordIdentifier],
    cyclic: &BTreeSet<RecordIdentifier>,
    graph: &SchemaGraph,
) -> Result<PkMap> {
    let mut map = PkMap::default();
    let mut counter: usize = 0;

    for id in order {
        let Some(table) = graph.get(&id.table_ref) else {
            continue;
        };
        if !table_is_remappable(table) {
            continue;
        }
        if cyclic.contains(id) {
            return Err(CarveError::CycleDetected(format!(
                "record {} participates in a dependency cycle; primary-key remapping requires an acyclic record graph",
                id
            )));
        }

        counter += 1;
        map.entries.insert(
            id.clone(),
            format!("v_{}_{}", sanitize(&id.table_ref.name), counter),
        );
    }

    debug!(remapped = map.len(), "primary-key map built");
    Ok(map)
}

/// Table names become variable-name fragments; anything outside
/// [A-Za-z0-9_] is folded to '_'.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
