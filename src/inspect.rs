//! Schema inspection output
//!
//! Text rendering for the non-dump modes: `--tables`, `--describe`, and
//! `--graph`. Plain stdout text, one fact per line.

use crate::error::Result;
use crate::schema::{SchemaGraph, TableRef};

/// `--tables`: every table with column and FK counts.
pub fn render_tables(graph: &SchemaGraph) -> String {
    let mut lines = Vec::with_capacity(graph.len());
    for (table_ref, table) in &graph.tables {
        lines.push(format!(
            "{}  ({} columns, {} outgoing fks, {} incoming fks)",
            table_ref,
            table.columns.len(),
            table.outgoing.len(),
            table.incoming.len()
        ));
    }
    lines.join("\n") + "\n"
}

/// `--describe T`: columns, keys, and constraints of one table.
pub fn render_describe(graph: &SchemaGraph, table_ref: &TableRef) -> Result<String> {
    let table = graph.require(table_ref)?;
    let mut lines = vec![format!("Table {}", table_ref)];

    lines.push("Columns:".to_string());
    for column in &table.columns {
        let mut attrs = Vec::new();
        if !column.nullable {
            attrs.push("not null".to_string());
        }
        if column.is_identity {
            attrs.push("identity".to_string());
        }
        if let Some(ref default) = column.default_expression {
            attrs.push(format!("default {}", default));
        }
        let suffix = if attrs.is_empty() {
            String::new()
        } else {
            format!("  [{}]", attrs.join(", "))
        };
        lines.push(format!("  {} {}{}", column.name, column.data_type, suffix));
    }

    if !table.primary_key.is_empty() {
        lines.push(format!("Primary key: ({})", table.primary_key.join(", ")));
    }
    for unique in &table.unique_sets {
        lines.push(format!("Unique: ({})", unique.join(", ")));
    }
    for fk in &table.outgoing {
        lines.push(format!(
            "References: ({}) -> {} ({})   [{}]",
            fk.from_columns.join(", "),
            fk.to_table,
            fk.to_columns.join(", "),
            fk.name
        ));
    }
    for fk in &table.incoming {
        lines.push(format!(
            "Referenced by: {} ({})   [{}]",
            fk.from_table,
            fk.from_columns.join(", "),
            fk.name
        ));
    }

    Ok(lines.join("\n") + "\n")
}

/// `--graph`: one line per foreign-key edge.
pub fn render_graph(graph: &SchemaGraph) -> String {
    let mut lines = Vec::new();
    for (table_ref, table) in &graph.tables {
        for fk in &table.outgoing {
            lines.push(format!(
                "{}.({}) -> {}.({})",
                table_ref,
                fk.from_columns.join(","),
                fk.to_table,
                fk.to_columns.join(",")
            ));
        }
    }
    if lines.is_empty() {
        "no foreign keys\n".to_string()
    } else {
        lines.join("\n") + "\n"
    }
}
