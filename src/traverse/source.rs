//! Record fetching
//!
//! `RecordSource` is the seam between the traversal engine and the
//! database driver: the engine describes which rows it wants, the source
//! turns that into batched read-only SELECTs. Tests substitute an
//! in-memory implementation.
//!
//! All queries select every column cast to text, so raw values arrive in
//! PostgreSQL text representation regardless of client-side type
//! mappings. Results are ordered by primary key for deterministic
//! enqueue order.

use crate::emit::literal::{quote_ident, quote_string, qualified_table};
use crate::error::{CarveError, Result};
use crate::schema::Table;
use crate::traverse::{PkTuple, RawRow, TimeframeFilter};
use async_trait::async_trait;
use deadpool_postgres::Client;
use tracing::trace;

/// Source of raw rows for the traversal engine.
#[async_trait]
pub trait RecordSource {
    /// Fetch rows by primary key. Scalar PKs are batched into one query;
    /// composite PKs fall back to per-row selects. `filter` is only
    /// passed for seed fetches of a timeframe-filtered table.
    async fn fetch_by_pks(
        &self,
        table: &Table,
        pks: &[PkTuple],
        filter: Option<&TimeframeFilter>,
    ) -> Result<Vec<RawRow>>;

    /// Fetch rows of `table` whose `fk_columns` tuple matches any of
    /// `keys`, with an optional timeframe predicate. This drives
    /// incoming-edge discovery.
    async fn fetch_referencing(
        &self,
        table: &Table,
        fk_columns: &[String],
        keys: &[Vec<String>],
        filter: Option<&TimeframeFilter>,
    ) -> Result<Vec<RawRow>>;

    /// Fetch every row of `table` inside the timeframe window (timeframe
    /// seeds).
    async fn fetch_timeframe(&self, table: &Table, filter: &TimeframeFilter) -> Result<Vec<RawRow>>;
}

/// `SELECT "a"::text AS "a", ...` list over the table's columns in
/// ordinal order.
fn select_list(table: &Table) -> String {
    table
        .columns
        .iter()
        .map(|c| format!("{}::text AS {}", quote_ident(&c.name), quote_ident(&c.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn order_by_clause(table: &Table) -> String {
    if table.primary_key.is_empty() {
        String::new()
    } else {
        let cols: Vec<String> = table.primary_key.iter().map(|c| quote_ident(c)).collect();
        format!(" ORDER BY {}", cols.join(", "))
    }
}

fn timeframe_predicate(filter: &TimeframeFilter) -> String {
    format!(
        "{} BETWEEN {} AND {}",
        quote_ident(&filter.column),
        quote_string(&filter.lower),
        quote_string(&filter.upper)
    )
}

/// Tuple-equality predicate over a column list and one key.
fn tuple_predicate(columns: &[String], key: &[String]) -> String {
    columns
        .iter()
        .zip(key)
        .map(|(col, value)| format!("{} = {}", quote_ident(col), quote_string(value)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `IN (...)` membership over one column, or a row-value `IN` over a
/// composite column list.
fn membership_predicate(columns: &[String], keys: &[Vec<String>]) -> String {
    if columns.len() == 1 {
        let values: Vec<String> = keys.iter().map(|k| quote_string(&k[0])).collect();
        format!("{} IN ({})", quote_ident(&columns[0]), values.join(", "))
    } else {
        let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let tuples: Vec<String> = keys
            .iter()
            .map(|k| {
                let values: Vec<String> = k.iter().map(|v| quote_string(v)).collect();
                format!("({})", values.join(", "))
            })
            .collect();
        format!("({}) IN ({})", cols.join(", "), tuples.join(", "))
    }
}

pub(crate) fn build_pk_batch_query(
    table: &Table,
    pks: &[PkTuple],
    filter: Option<&TimeframeFilter>,
) -> String {
    let mut predicate = membership_predicate(&table.primary_key, pks);
    if let Some(f) = filter {
        predicate = format!("{} AND {}", predicate, timeframe_predicate(f));
    }

    format!(
        "SELECT {} FROM {} WHERE {}{}",
        select_list(table),
        qualified_table(&table.table_ref),
        predicate,
        order_by_clause(table)
    )
}

pub(crate) fn build_referencing_query(
    table: &Table,
    fk_columns: &[String],
    keys: &[Vec<String>],
    filter: Option<&TimeframeFilter>,
) -> String {
    let mut predicate = membership_predicate(fk_columns, keys);
    if let Some(f) = filter {
        predicate = format!("{} AND {}", predicate, timeframe_predicate(f));
    }

    format!(
        "SELECT {} FROM {} WHERE {}{}",
        select_list(table),
        qualified_table(&table.table_ref),
        predicate,
        order_by_clause(table)
    )
}

pub(crate) fn build_timeframe_query(table: &Table, filter: &TimeframeFilter) -> String {
    format!(
        "SELECT {} FROM {} WHERE {}{}",
        select_list(table),
        qualified_table(&table.table_ref),
        timeframe_predicate(filter),
        order_by_clause(table)
    )
}

/// Production source: one exclusively owned client, one in-flight query
/// at a time.
pub struct PgRecordSource {
    client: Client,
}

impl PgRecordSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn run_query(&self, table: &Table, sql: &str) -> Result<Vec<RawRow>> {
        trace!(table = %table.table_ref, sql, "fetch");

        let rows = self
            .client
            .query(sql, &[])
            .await
            .map_err(|e| CarveError::Fetch(format!("query against {} failed: {}", table.table_ref, e)))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = RawRow::new();
            for (idx, column) in table.columns.iter().enumerate() {
                let value: Option<String> = row
                    .try_get(idx)
                    .map_err(|e| CarveError::Fetch(format!("decode {}.{}: {}", table.table_ref, column.name, e)))?;
                values.insert(column.name.clone(), value);
            }
            out.push(values);
        }

        Ok(out)
    }
}

#[async_trait]
impl RecordSource for PgRecordSource {
    async fn fetch_by_pks(
        &self,
        table: &Table,
        pks: &[PkTuple],
        filter: Option<&TimeframeFilter>,
    ) -> Result<Vec<RawRow>> {
        if pks.is_empty() {
            return Ok(Vec::new());
        }

        if table.has_scalar_pk() {
            let sql = build_pk_batch_query(table, pks, filter);
            return self.run_query(table, &sql).await;
        }

        // Composite keys: per-row selects.
        let mut out = Vec::new();
        for pk in pks {
            let mut predicate = tuple_predicate(&table.primary_key, pk);
            if let Some(f) = filter {
                predicate = format!("{} AND {}", predicate, timeframe_predicate(f));
            }
            let sql = format!(
                "SELECT {} FROM {} WHERE {}",
                select_list(table),
                qualified_table(&table.table_ref),
                predicate
            );
            out.extend(self.run_query(table, &sql).await?);
        }
        Ok(out)
    }

    async fn fetch_referencing(
        &self,
        table: &Table,
        fk_columns: &[String],
        keys: &[Vec<String>],
        filter: Option<&TimeframeFilter>,
    ) -> Result<Vec<RawRow>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let sql = build_referencing_query(table, fk_columns, keys, filter);
        self.run_query(table, &sql).await
    }

    async fn fetch_timeframe(&self, table: &Table, filter: &TimeframeFilter) -> Result<Vec<RawRow>> {
        let sql = build_timeframe_query(table, filter);
        self.run_query(table, &sql).await
    }
}
