//! Replay writer
//!
//! Turns the sorted record stream into one replayable SQL script:
//! literal formatting by declared type, explicit column lists in ordinal
//! order, conflict-skip semantics, transaction framing, and the
//! procedural block that performs PK resolution at replay time when
//! remapping is on.

use crate::emit::ddl::column_type;
use crate::emit::literal::{format_literal, qualified_table, quote_ident};
use crate::error::{CarveError, Result};
use crate::order::SortedRecords;
use crate::remap::PkMap;
use crate::schema::{SchemaGraph, Table};
use crate::traverse::engine::resolve_target_identifier;
use crate::traverse::{RecordData, RecordIdentifier};
use std::collections::{BTreeMap, HashMap};

/// Renders the replay script. Borrows the schema graph and the records;
/// retains nothing.
pub struct ReplayWriter<'a> {
    graph: &'a SchemaGraph,
}

impl<'a> ReplayWriter<'a> {
    pub fn new(graph: &'a SchemaGraph) -> Self {
        Self { graph }
    }

    /// Render the full script: `BEGIN;`, optional DDL prelude, the insert
    /// stream (procedural when `pk_map` has entries), `COMMIT;`.
    pub fn render(
        &self,
        records: &BTreeMap<RecordIdentifier, RecordData>,
        sorted: &SortedRecords,
        pk_map: Option<&PkMap>,
        ddl: &[String],
    ) -> Result<String> {
        let mut lines: Vec<String> = Vec::new();
        lines.push("BEGIN;".to_string());
        lines.extend(ddl.iter().cloned());

        let remap_active = pk_map.map(|m| !m.is_empty()).unwrap_or(false);
        let first_cyclic = sorted
            .order
            .iter()
            .position(|id| sorted.cyclic.contains(id));

        if remap_active {
            let pk_map = pk_map.expect("remap_active implies pk_map");
            lines.push("DO $$".to_string());
            lines.push("DECLARE".to_string());
            for (id, token) in pk_map.iter() {
                let table = self.graph.require(&id.table_ref)?;
                let pk_column = table
                    .column(&table.primary_key[0])
                    .ok_or_else(|| CarveError::SchemaNotFound(format!("{}.{}", id.table_ref, table.primary_key[0])))?;
                lines.push(format!("    {} {};", token, column_type(pk_column)));
            }
            lines.push("BEGIN".to_string());

            for (position, id) in sorted.order.iter().enumerate() {
                if first_cyclic == Some(position) {
                    lines.push("    SET CONSTRAINTS ALL DEFERRED;".to_string());
                }
                let record = &records[id];
                let table = self.graph.require(&id.table_ref)?;
                for line in self.remapped_statements(table, record, pk_map)? {
                    lines.push(format!("    {}", line));
                }
            }

            lines.push("END".to_string());
            lines.push("$$;".to_string());
        } else {
            for (position, id) in sorted.order.iter().enumerate() {
                if first_cyclic == Some(position) {
                    lines.push("SET CONSTRAINTS ALL DEFERRED;".to_string());
                }
                let record = &records[id];
                let table = self.graph.require(&id.table_ref)?;
                lines.push(self.plain_insert(table, record));
            }
        }

        lines.push("COMMIT;".to_string());
        Ok(lines.join("\n") + "\n")
    }

    /// `INSERT ... ON CONFLICT (pk) DO NOTHING;` with every column and
    /// literal values.
    fn plain_insert(&self, table: &Table, record: &RecordData) -> String {
        let columns: Vec<String> = table.columns.iter().map(|c| quote_ident(&c.name)).collect();
        let values: Vec<String> = table
            .columns
            .iter()
            .map(|c| format_literal(c, record.values.get(&c.name).unwrap_or(&None)))
            .collect();

        let conflict = if table.primary_key.is_empty() {
            String::new()
        } else {
            let pk: Vec<String> = table.primary_key.iter().map(|c| quote_ident(c)).collect();
            format!(" ON CONFLICT ({}) DO NOTHING", pk.join(", "))
        };

        format!(
            "INSERT INTO {} ({}) VALUES ({}){};",
            qualified_table(&table.table_ref),
            columns.join(", "),
            values.join(", "),
            conflict
        )
    }

    /// Statements for one record inside the procedural block. Remapped
    /// tables drop their PK columns and capture the target-assigned value;
    /// everything else keeps the plain insert shape, with FK literals into
    /// remapped rows replaced by the captured variables.
    fn remapped_statements(
        &self,
        table: &Table,
        record: &RecordData,
        pk_map: &PkMap,
    ) -> Result<Vec<String>> {
        let tokens = self.column_tokens(table, record, pk_map);

        let Some(own_token) = pk_map.get(&record.id) else {
            let mut insert = self.plain_insert(table, record);
            if !tokens.is_empty() {
                insert = self.insert_with_tokens(table, record, &tokens, None);
            }
            return Ok(vec![insert]);
        };

        Ok(self.capturing_insert(table, record, &tokens, own_token))
    }

    /// Insert that lets the target assign the PK and captures it.
    fn capturing_insert(
        &self,
        table: &Table,
        record: &RecordData,
        tokens: &HashMap<String, String>,
        own_token: &str,
    ) -> Vec<String> {
        let pk_column = &table.primary_key[0];
        let body = self.insert_body(table, record, tokens, Some(pk_column));
        let returning = format!("RETURNING {} INTO {}", quote_ident(pk_column), own_token);

        match table.unique_sets.first() {
            Some(unique) => {
                let conflict_cols: Vec<String> = unique.iter().map(|c| quote_ident(c)).collect();
                let predicate: Vec<String> = unique
                    .iter()
                    .map(|c| {
                        let column = table.column(c).expect("unique column exists");
                        format!(
                            "{} = {}",
                            quote_ident(c),
                            self.value_expr(column, record, tokens)
                        )
                    })
                    .collect();

                vec![
                    format!(
                        "{} ON CONFLICT ({}) DO NOTHING {};",
                        body,
                        conflict_cols.join(", "),
                        returning
                    ),
                    format!("IF {} IS NULL THEN", own_token),
                    format!(
                        "    SELECT {} INTO {} FROM {} WHERE {};",
                        quote_ident(pk_column),
                        own_token,
                        qualified_table(&table.table_ref),
                        predicate.join(" AND ")
                    ),
                    "END IF;".to_string(),
                ]
            }
            None => vec![format!("{} {};", body, returning)],
        }
    }

    fn insert_with_tokens(
        &self,
        table: &Table,
        record: &RecordData,
        tokens: &HashMap<String, String>,
        skip_column: Option<&String>,
    ) -> String {
        let body = self.insert_body(table, record, tokens, skip_column);
        let conflict = if table.primary_key.is_empty() || skip_column.is_some() {
            String::new()
        } else {
            let pk: Vec<String> = table.primary_key.iter().map(|c| quote_ident(c)).collect();
            format!(" ON CONFLICT ({}) DO NOTHING", pk.join(", "))
        };
        format!("{}{};", body, conflict)
    }

    fn insert_body(
        &self,
        table: &Table,
        record: &RecordData,
        tokens: &HashMap<String, String>,
        skip_column: Option<&String>,
    ) -> String {
        let kept: Vec<_> = table
            .columns
            .iter()
            .filter(|c| Some(&c.name) != skip_column)
            .collect();

        let columns: Vec<String> = kept.iter().map(|c| quote_ident(&c.name)).collect();
        let values: Vec<String> = kept
            .iter()
            .map(|c| self.value_expr(c, record, tokens))
            .collect();

        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            qualified_table(&table.table_ref),
            columns.join(", "),
            values.join(", ")
        )
    }

    /// Captured variable where the column references a remapped row,
    /// literal otherwise.
    fn value_expr(
        &self,
        column: &crate::schema::Column,
        record: &RecordData,
        tokens: &HashMap<String, String>,
    ) -> String {
        if let Some(token) = tokens.get(&column.name) {
            return token.clone();
        }
        format_literal(column, record.values.get(&column.name).unwrap_or(&None))
    }

    /// FK columns of this record whose target row is remapped, mapped to
    /// the target's captured variable.
    fn column_tokens(
        &self,
        table: &Table,
        record: &RecordData,
        pk_map: &PkMap,
    ) -> HashMap<String, String> {
        let mut tokens = HashMap::new();

        for fk in &table.outgoing {
            // Remapping only covers scalar identity PKs.
            if fk.from_columns.len() != 1 {
                continue;
            }
            let column = &fk.from_columns[0];
            let Some(value) = record.values.get(column).cloned().flatten() else {
                continue;
            };
            let Some(target_table) = self.graph.get(&fk.to_table) else {
                continue;
            };
            let Some(target_id) = resolve_target_identifier(target_table, fk, &[value]) else {
                continue;
            };
            if let Some(token) = pk_map.get(&target_id) {
                tokens.entry(column.clone()).or_insert_with(|| token.to_string());
            }
        }

        tokens
    }
}
