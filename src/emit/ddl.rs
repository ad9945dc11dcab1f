//! DDL generator
//!
//! Emits idempotent schema creation for the carved subset: database,
//! schemas, then tables in topological order of outgoing-FK dependency.
//! Constraints that participate in table-level cycles (self-references
//! included) are deferred to guarded `ALTER TABLE ... ADD CONSTRAINT`
//! statements after all tables exist.

use crate::emit::literal::{qualified_table, quote_ident, quote_string};
use crate::schema::{Column, ForeignKey, SchemaGraph, Table, TableRef};
use std::collections::{BTreeMap, BTreeSet};

/// Generates the DDL prelude for the replay script.
pub struct DdlGenerator;

impl DdlGenerator {
    /// Render DDL for `tables` (a subset of the graph), optionally
    /// starting with `CREATE DATABASE`.
    pub fn generate(
        graph: &SchemaGraph,
        tables: &BTreeSet<TableRef>,
        database: Option<&str>,
    ) -> Vec<String> {
        let mut statements = Vec::new();

        if let Some(db) = database {
            // CREATE DATABASE does not accept IF NOT EXISTS; emitted
            // unconditionally, failure acceptable to the replay author.
            statements.push(format!("CREATE DATABASE {};", quote_ident(db)));
        }

        let schemas: BTreeSet<&str> = tables.iter().map(|t| t.schema.as_str()).collect();
        for schema in schemas {
            statements.push(format!("CREATE SCHEMA IF NOT EXISTS {};", quote_ident(schema)));
        }

        let order = table_order(graph, tables);
        let emitted: BTreeMap<&TableRef, usize> =
            order.iter().enumerate().map(|(i, t)| (*t, i)).collect();

        let mut deferred: Vec<&ForeignKey> = Vec::new();

        for (position, table_ref) in order.iter().enumerate() {
            let Some(table) = graph.get(table_ref) else {
                continue;
            };

            let mut inline_fks = Vec::new();
            for fk in &table.outgoing {
                if !tables.contains(&fk.to_table) {
                    continue;
                }
                let target_ready = emitted
                    .get(&fk.to_table)
                    .map(|&target_pos| target_pos < position)
                    .unwrap_or(false);
                if target_ready && !fk.is_self_referencing() {
                    inline_fks.push(fk);
                } else {
                    deferred.push(fk);
                }
            }

            statements.push(Self::create_table_sql(table, &inline_fks));
        }

        for fk in deferred {
            statements.push(Self::add_constraint_sql(fk));
        }

        statements
    }

    fn create_table_sql(table: &Table, inline_fks: &[&ForeignKey]) -> String {
        let mut parts: Vec<String> = table.columns.iter().map(Self::column_sql).collect();

        if !table.primary_key.is_empty() {
            let cols: Vec<String> = table.primary_key.iter().map(|c| quote_ident(c)).collect();
            parts.push(format!("    PRIMARY KEY ({})", cols.join(", ")));
        }

        for unique in &table.unique_sets {
            let cols: Vec<String> = unique.iter().map(|c| quote_ident(c)).collect();
            parts.push(format!("    UNIQUE ({})", cols.join(", ")));
        }

        for fk in inline_fks {
            parts.push(format!("    {}", Self::fk_clause(fk)));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
            qualified_table(&table.table_ref),
            parts.join(",\n")
        )
    }

    fn column_sql(column: &Column) -> String {
        let mut def = format!("    {} {}", quote_ident(&column.name), column_type(column));

        if !column.nullable {
            def.push_str(" NOT NULL");
        }

        if column.is_identity {
            // Allows both explicit replayed values and target-assigned
            // ones; the source's backing sequence is not recreated.
            def.push_str(" GENERATED BY DEFAULT AS IDENTITY");
        } else if let Some(ref default) = column.default_expression {
            def.push_str(&format!(" DEFAULT {}", default));
        }

        def
    }

    fn fk_clause(fk: &ForeignKey) -> String {
        let from: Vec<String> = fk.from_columns.iter().map(|c| quote_ident(c)).collect();
        let to: Vec<String> = fk.to_columns.iter().map(|c| quote_ident(c)).collect();
        format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} DEFERRABLE",
            quote_ident(&fk.name),
            from.join(", "),
            qualified_table(&fk.to_table),
            to.join(", "),
            fk.on_delete
        )
    }

    /// ALTER TABLE has no IF NOT EXISTS for constraints; guard through
    /// pg_constraint to keep the statement idempotent.
    fn add_constraint_sql(fk: &ForeignKey) -> String {
        format!(
            "DO $$ BEGIN IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = {}) THEN ALTER TABLE {} ADD {}; END IF; END $$;",
            quote_string(&fk.name),
            qualified_table(&fk.from_table),
            Self::fk_clause(fk)
        )
    }
}

/// Render a column's type from catalog metadata.
pub(crate) fn column_type(column: &Column) -> String {
    match column.data_type.as_str() {
        "ARRAY" => format!("{}[]", column.udt_name.strip_prefix('_').unwrap_or(&column.udt_name)),
        "USER-DEFINED" => quote_ident(&column.udt_name),
        other => other.to_string(),
    }
}

/// Kahn order over the table subset; cycles are broken by forcing the
/// smallest remaining table (its unsatisfied FKs end up deferred).
fn table_order<'a>(graph: &'a SchemaGraph, tables: &'a BTreeSet<TableRef>) -> Vec<&'a TableRef> {
    let mut in_degree: BTreeMap<&TableRef, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&TableRef, Vec<&TableRef>> = BTreeMap::new();

    for table_ref in tables {
        let mut degree = 0;
        if let Some(table) = graph.get(table_ref) {
            for fk in &table.outgoing {
                if fk.is_self_referencing() || !tables.contains(&fk.to_table) {
                    continue;
                }
                if let Some(target) = tables.get(&fk.to_table) {
                    degree += 1;
                    dependents.entry(target).or_default().push(table_ref);
                }
            }
        }
        in_degree.insert(table_ref, degree);
    }

    let mut ready: BTreeSet<&TableRef> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(t, _)| *t)
        .collect();
    let mut blocked: BTreeSet<&TableRef> = in_degree
        .iter()
        .filter(|(_, d)| **d > 0)
        .map(|(t, _)| *t)
        .collect();

    let mut order = Vec::with_capacity(tables.len());
    while order.len() < tables.len() {
        let table_ref = match ready.iter().next().copied() {
            Some(t) => {
                ready.remove(t);
                t
            }
            None => {
                let t = *blocked.iter().next().expect("tables remain");
                blocked.remove(t);
                t
            }
        };

        if let Some(deps) = dependents.get(table_ref) {
            for dependent in deps {
                if let Some(degree) = in_degree.get_mut(*dependent) {
                    if *degree > 0 {
                        *degree -= 1;
                        if *degree == 0 && blocked.remove(*dependent) {
                            ready.insert(*dependent);
                        }
                    }
                }
            }
        }

        order.push(table_ref);
    }

    order
}
