//! SQL literal and identifier formatting
//!
//! Values arrive in PostgreSQL text representation and are rendered as
//! literals according to the column's declared catalog type. Runtime
//! value shape is never inspected to pick a format.

use crate::schema::{Column, TableRef};

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."table"` form used by every emitted statement.
pub fn qualified_table(table_ref: &TableRef) -> String {
    format!("{}.{}", quote_ident(&table_ref.schema), quote_ident(&table_ref.name))
}

/// Single-quote a string value, doubling embedded single quotes.
pub fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Element type of an array column, derived from the catalog udt name
/// (`_int4` -> `int4`).
fn array_element_type(udt_name: &str) -> &str {
    udt_name.strip_prefix('_').unwrap_or(udt_name)
}

/// Render one value as a SQL literal for `column`'s declared type.
pub fn format_literal(column: &Column, value: &Option<String>) -> String {
    let Some(text) = value else {
        return "NULL".to_string();
    };

    match column.data_type.as_str() {
        "smallint" | "integer" | "bigint" | "numeric" | "real" | "double precision" | "oid" => {
            text.clone()
        }
        // money's text form carries currency punctuation.
        "money" => format!("{}::money", quote_string(text)),
        "boolean" => {
            if text == "t" || text == "true" {
                "TRUE".to_string()
            } else {
                "FALSE".to_string()
            }
        }
        // bytea text representation is already hex-prefixed (\x...)
        "bytea" => quote_string(text),
        "date" | "time without time zone" | "time with time zone"
        | "timestamp without time zone" | "timestamp with time zone" | "interval" => {
            quote_string(text)
        }
        "json" | "jsonb" => format!("{}::{}", quote_string(text), column.udt_name),
        "ARRAY" => format!(
            "{}::{}[]",
            quote_string(text),
            array_element_type(&column.udt_name)
        ),
        "USER-DEFINED" => format!("{}::{}", quote_string(text), quote_ident(&column.udt_name)),
        _ => quote_string(text),
    }
}
