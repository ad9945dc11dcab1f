//! Schema introspection
//!
//! Builds the schema graph from a live PostgreSQL catalog. One pass over
//! `information_schema` per run: tables, columns, primary keys, unique
//! constraints, then every foreign-key constraint in the reachable
//! catalog so that incoming edges can be indexed on the referenced table.

use crate::error::{CarveError, Result};
use crate::schema::{Column, ForeignKey, SchemaGraph, Table, TableRef};
use deadpool_postgres::Client;
use std::collections::HashMap;
use tracing::debug;

/// Schema introspector for PostgreSQL
pub struct Introspector;

impl Introspector {
    /// Introspect every base table of `schema` and materialise the graph.
    ///
    /// Foreign keys are scanned across all user schemas, not just the
    /// requested one, and stored on both the constrained table (outgoing)
    /// and the referenced table (incoming). Any catalog failure aborts
    /// with `Introspection`; the graph is never partially populated.
    pub async fn introspect(client: &Client, schema: &str) -> Result<SchemaGraph> {
        let mut graph = SchemaGraph::new();

        for table_ref in Self::list_tables(client, schema).await? {
            graph.insert(Table {
                table_ref,
                columns: Vec::new(),
                primary_key: Vec::new(),
                unique_sets: Vec::new(),
                outgoing: Vec::new(),
                incoming: Vec::new(),
            });
        }

        Self::load_columns(client, schema, &mut graph).await?;
        Self::load_primary_keys(client, schema, &mut graph).await?;
        Self::load_unique_constraints(client, schema, &mut graph).await?;
        Self::load_foreign_keys(client, &mut graph).await?;

        debug!(
            tables = graph.len(),
            schema, "introspected schema graph"
        );

        Ok(graph)
    }

    /// List base tables of one schema.
    pub async fn list_tables(client: &Client, schema: &str) -> Result<Vec<TableRef>> {
        let query = r#"
            SELECT t.table_schema, t.table_name
            FROM information_schema.tables t
            WHERE t.table_schema = $1
              AND t.table_type = 'BASE TABLE'
            ORDER BY t.table_schema, t.table_name
        "#;

        let rows = client
            .query(query, &[&schema])
            .await
            .map_err(|e| CarveError::Introspection(format!("table listing failed: {}", e)))?;

        Ok(rows
            .iter()
            .map(|row| TableRef::new(row.get::<_, String>(0), row.get::<_, String>(1)))
            .collect())
    }

    async fn load_columns(client: &Client, schema: &str, graph: &mut SchemaGraph) -> Result<()> {
        let query = r#"
            SELECT
                c.table_schema,
                c.table_name,
                c.column_name,
                c.ordinal_position,
                c.data_type,
                c.udt_name,
                c.is_nullable,
                c.column_default,
                c.is_identity
            FROM information_schema.columns c
            WHERE c.table_schema = $1
            ORDER BY c.table_name, c.ordinal_position
        "#;

        let rows = client
            .query(query, &[&schema])
            .await
            .map_err(|e| CarveError::Introspection(format!("column query failed: {}", e)))?;

        for row in rows {
            let table_ref = TableRef::new(row.get::<_, String>(0), row.get::<_, String>(1));
            let default_expression: Option<String> = row.get(7);
            let declared_identity = row.get::<_, String>(8) == "YES";
            let sequence_backed = default_expression
                .as_deref()
                .map(|d| d.starts_with("nextval("))
                .unwrap_or(false);

            if let Some(table) = graph.tables.get_mut(&table_ref) {
                table.columns.push(Column {
                    name: row.get(2),
                    ordinal: row.get(3),
                    data_type: row.get(4),
                    udt_name: row.get(5),
                    nullable: row.get::<_, String>(6) == "YES",
                    default_expression,
                    is_identity: declared_identity || sequence_backed,
                });
            }
        }

        Ok(())
    }

    async fn load_primary_keys(
        client: &Client,
        schema: &str,
        graph: &mut SchemaGraph,
    ) -> Result<()> {
        let query = r#"
            SELECT
                tc.table_schema,
                tc.table_name,
                COALESCE(array_agg(kcu.column_name::text ORDER BY kcu.ordinal_position), ARRAY[]::text[]) as columns
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            WHERE tc.constraint_type = 'PRIMARY KEY'
                AND tc.table_schema = $1
            GROUP BY tc.table_schema, tc.table_name
        "#;

        let rows = client
            .query(query, &[&schema])
            .await
            .map_err(|e| CarveError::Introspection(format!("primary key query failed: {}", e)))?;

        for row in rows {
            let table_ref = TableRef::new(row.get::<_, String>(0), row.get::<_, String>(1));
            if let Some(table) = graph.tables.get_mut(&table_ref) {
                table.primary_key = row.try_get(2).unwrap_or_default();
            }
        }

        Ok(())
    }

    async fn load_unique_constraints(
        client: &Client,
        schema: &str,
        graph: &mut SchemaGraph,
    ) -> Result<()> {
        let query = r#"
            SELECT
                tc.table_schema,
                tc.table_name,
                tc.constraint_name,
                COALESCE(array_agg(kcu.column_name::text ORDER BY kcu.ordinal_position), ARRAY[]::text[]) as columns
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            WHERE tc.constraint_type = 'UNIQUE'
                AND tc.table_schema = $1
            GROUP BY tc.table_schema, tc.table_name, tc.constraint_name
            ORDER BY tc.constraint_name
        "#;

        let rows = client
            .query(query, &[&schema])
            .await
            .map_err(|e| CarveError::Introspection(format!("unique constraint query failed: {}", e)))?;

        for row in rows {
            let table_ref = TableRef::new(row.get::<_, String>(0), row.get::<_, String>(1));
            if let Some(table) = graph.tables.get_mut(&table_ref) {
                let columns: Vec<String> = row.try_get(3).unwrap_or_default();
                if !columns.is_empty() {
                    table.unique_sets.push(columns);
                }
            }
        }

        Ok(())
    }

    /// Load every FK constraint across user schemas and index it on both
    /// ends. The referenced side is resolved through
    /// `referential_constraints.unique_constraint_name` so composite keys
    /// keep their column pairing.
    async fn load_foreign_keys(client: &Client, graph: &mut SchemaGraph) -> Result<()> {
        let query = r#"
            SELECT
                tc.constraint_name,
                tc.table_schema as source_schema,
                tc.table_name as source_table,
                COALESCE(array_agg(kcu.column_name::text ORDER BY kcu.ordinal_position), ARRAY[]::text[]) as source_columns,
                ref_kcu.table_schema as referenced_schema,
                ref_kcu.table_name as referenced_table,
                COALESCE(array_agg(ref_kcu.column_name::text ORDER BY kcu.ordinal_position), ARRAY[]::text[]) as referenced_columns,
                rc.delete_rule as on_delete
            FROM information_schema.table_constraints tc
            JOIN information_schema.referential_constraints rc
                ON tc.constraint_name = rc.constraint_name
                AND tc.table_schema = rc.constraint_schema
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            JOIN information_schema.key_column_usage ref_kcu
                ON rc.unique_constraint_name = ref_kcu.constraint_name
                AND rc.unique_constraint_schema = ref_kcu.table_schema
                AND ref_kcu.ordinal_position = kcu.position_in_unique_constraint
            WHERE tc.constraint_type = 'FOREIGN KEY'
                AND tc.table_schema NOT IN ('pg_catalog', 'information_schema')
            GROUP BY
                tc.constraint_name,
                tc.table_schema,
                tc.table_name,
                ref_kcu.table_schema,
                ref_kcu.table_name,
                rc.delete_rule
            ORDER BY tc.table_schema, tc.table_name, tc.constraint_name
        "#;

        let rows = client
            .query(query, &[])
            .await
            .map_err(|e| CarveError::Introspection(format!("foreign key query failed: {}", e)))?;

        let mut foreign_keys = Vec::new();
        for row in rows {
            foreign_keys.push(ForeignKey {
                name: row.get(0),
                from_table: TableRef::new(row.get::<_, String>(1), row.get::<_, String>(2)),
                from_columns: row.try_get(3).unwrap_or_default(),
                to_table: TableRef::new(row.get::<_, String>(4), row.get::<_, String>(5)),
                to_columns: row.try_get(6).unwrap_or_default(),
                on_delete: row.get(7),
            });
        }

        Self::index_foreign_keys(graph, foreign_keys);
        Ok(())
    }

    /// Attach FKs to both the constrained and the referenced table.
    pub(crate) fn index_foreign_keys(graph: &mut SchemaGraph, foreign_keys: Vec<ForeignKey>) {
        let mut incoming: HashMap<TableRef, Vec<ForeignKey>> = HashMap::new();

        for fk in foreign_keys {
            incoming.entry(fk.to_table.clone()).or_default().push(fk.clone());
            if let Some(table) = graph.tables.get_mut(&fk.from_table) {
                table.outgoing.push(fk);
            }
        }

        for (table_ref, fks) in incoming {
            if let Some(table) = graph.tables.get_mut(&table_ref) {
                table.incoming = fks;
            }
        }
    }
}

impl SchemaGraph {
    /// Look a table up, failing with `SchemaNotFound` when absent.
    pub fn require(&self, table_ref: &TableRef) -> Result<&Table> {
        self.get(table_ref)
            .ok_or_else(|| CarveError::SchemaNotFound(table_ref.to_string()))
    }
}
