//! Shared test fixture: the reference commerce schema and an in-memory
//! record source the traversal engine can run against without a live
//! database.
//!
//! Schema: roles, users(role_id, manager_id->users), groups, user_groups,
//! categories(parent_id->categories), products(category_id),
//! orders(user_id), order_items(order_id, product_id), banks,
//! bank_accounts(user_id, bank_id), transactions(bank_account_id).

use async_trait::async_trait;
use pgcarve::error::Result;
use pgcarve::schema::{Column, ForeignKey, SchemaGraph, Table, TableRef};
use pgcarve::traverse::source::RecordSource;
use pgcarve::traverse::{PkTuple, RawRow, TimeframeFilter};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn t(name: &str) -> TableRef {
    TableRef::new("public", name)
}

fn identity_col(name: &str, ordinal: i32) -> Column {
    Column {
        name: name.to_string(),
        ordinal,
        data_type: "integer".to_string(),
        udt_name: "int4".to_string(),
        nullable: false,
        default_expression: Some(format!("nextval('{}_seq'::regclass)", name)),
        is_identity: true,
    }
}

fn int_col(name: &str, ordinal: i32, nullable: bool) -> Column {
    Column {
        name: name.to_string(),
        ordinal,
        data_type: "integer".to_string(),
        udt_name: "int4".to_string(),
        nullable,
        default_expression: None,
        is_identity: false,
    }
}

fn text_col(name: &str, ordinal: i32) -> Column {
    Column {
        name: name.to_string(),
        ordinal,
        data_type: "text".to_string(),
        udt_name: "text".to_string(),
        nullable: false,
        default_expression: None,
        is_identity: false,
    }
}

fn ts_col(name: &str, ordinal: i32) -> Column {
    Column {
        name: name.to_string(),
        ordinal,
        data_type: "timestamp without time zone".to_string(),
        udt_name: "timestamp".to_string(),
        nullable: false,
        default_expression: None,
        is_identity: false,
    }
}

fn fk(name: &str, from: &str, from_cols: &[&str], to: &str, to_cols: &[&str]) -> ForeignKey {
    ForeignKey {
        name: name.to_string(),
        from_table: t(from),
        from_columns: from_cols.iter().map(|c| c.to_string()).collect(),
        to_table: t(to),
        to_columns: to_cols.iter().map(|c| c.to_string()).collect(),
        on_delete: "NO ACTION".to_string(),
    }
}

/// The reference schema graph, FKs indexed in both directions.
pub fn fixture_graph() -> SchemaGraph {
    let foreign_keys = vec![
        fk("users_role_id_fkey", "users", &["role_id"], "roles", &["id"]),
        fk("users_manager_id_fkey", "users", &["manager_id"], "users", &["id"]),
        fk("user_groups_user_id_fkey", "user_groups", &["user_id"], "users", &["id"]),
        fk("user_groups_group_id_fkey", "user_groups", &["group_id"], "groups", &["id"]),
        fk("categories_parent_id_fkey", "categories", &["parent_id"], "categories", &["id"]),
        fk("products_category_id_fkey", "products", &["category_id"], "categories", &["id"]),
        fk("orders_user_id_fkey", "orders", &["user_id"], "users", &["id"]),
        fk("order_items_order_id_fkey", "order_items", &["order_id"], "orders", &["id"]),
        fk("order_items_product_id_fkey", "order_items", &["product_id"], "products", &["id"]),
        fk("bank_accounts_user_id_fkey", "bank_accounts", &["user_id"], "users", &["id"]),
        fk("bank_accounts_bank_id_fkey", "bank_accounts", &["bank_id"], "banks", &["id"]),
        fk(
            "transactions_bank_account_id_fkey",
            "transactions",
            &["bank_account_id"],
            "bank_accounts",
            &["id"],
        ),
    ];

    let mut tables = vec![
        table("roles", vec![identity_col("id", 1), text_col("label", 2)], vec![vec!["label".to_string()]]),
        table(
            "users",
            vec![
                identity_col("id", 1),
                int_col("role_id", 2, false),
                int_col("manager_id", 3, true),
                text_col("email", 4),
            ],
            vec![vec!["email".to_string()]],
        ),
        table("groups", vec![identity_col("id", 1), text_col("name", 2)], vec![]),
        table(
            "user_groups",
            vec![identity_col("id", 1), int_col("user_id", 2, false), int_col("group_id", 3, false)],
            vec![],
        ),
        table(
            "categories",
            vec![identity_col("id", 1), int_col("parent_id", 2, true), text_col("name", 3)],
            vec![],
        ),
        table(
            "products",
            vec![identity_col("id", 1), int_col("category_id", 2, false), text_col("name", 3)],
            vec![],
        ),
        table(
            "orders",
            vec![identity_col("id", 1), int_col("user_id", 2, false), ts_col("created_at", 3)],
            vec![],
        ),
        table(
            "order_items",
            vec![
                identity_col("id", 1),
                int_col("order_id", 2, false),
                int_col("product_id", 3, false),
                int_col("quantity", 4, false),
            ],
            vec![],
        ),
        table("banks", vec![identity_col("id", 1), text_col("name", 2)], vec![]),
        table(
            "bank_accounts",
            vec![identity_col("id", 1), int_col("user_id", 2, false), int_col("bank_id", 3, false)],
            vec![],
        ),
        table(
            "transactions",
            vec![
                identity_col("id", 1),
                int_col("bank_account_id", 2, false),
                ts_col("created_at", 3),
                text_col("amount", 4),
            ],
            vec![],
        ),
    ];

    for table in &mut tables {
        for fk in &foreign_keys {
            if fk.from_table == table.table_ref {
                table.outgoing.push(fk.clone());
            }
            if fk.to_table == table.table_ref {
                table.incoming.push(fk.clone());
            }
        }
    }

    let mut graph = SchemaGraph::new();
    for table in tables {
        graph.insert(table);
    }
    graph
}

fn table(name: &str, columns: Vec<Column>, unique_sets: Vec<Vec<String>>) -> Table {
    Table {
        table_ref: t(name),
        columns,
        primary_key: vec!["id".to_string()],
        unique_sets,
        outgoing: vec![],
        incoming: vec![],
    }
}

/// In-memory record source over fixture rows, with a query counter so
/// tests can assert the batching bound.
pub struct MemorySource {
    rows: HashMap<TableRef, Vec<RawRow>>,
    queries: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            rows: HashMap::new(),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn add_row(&mut self, table: &str, pairs: &[(&str, Option<&str>)]) {
        let row: RawRow = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(|s| s.to_string())))
            .collect();
        self.rows.entry(t(table)).or_default().push(row);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn table_rows(&self, table: &Table) -> Vec<RawRow> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.get(&table.table_ref).cloned().unwrap_or_default();
        // Deterministic pk order, like the production source's ORDER BY.
        rows.sort_by_key(|row| {
            table
                .primary_key
                .iter()
                .map(|c| row.get(c).cloned().flatten().unwrap_or_default())
                .collect::<Vec<_>>()
        });
        rows
    }

    fn in_window(row: &RawRow, filter: &TimeframeFilter) -> bool {
        match row.get(&filter.column).cloned().flatten() {
            Some(value) => value >= filter.lower && value <= filter.upper,
            None => false,
        }
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn fetch_by_pks(
        &self,
        table: &Table,
        pks: &[PkTuple],
        filter: Option<&TimeframeFilter>,
    ) -> Result<Vec<RawRow>> {
        Ok(self
            .table_rows(table)
            .into_iter()
            .filter(|row| {
                let pk: Option<PkTuple> = table
                    .primary_key
                    .iter()
                    .map(|c| row.get(c).cloned().flatten())
                    .collect();
                pk.map(|pk| pks.contains(&pk)).unwrap_or(false)
            })
            .filter(|row| filter.map(|f| Self::in_window(row, f)).unwrap_or(true))
            .collect())
    }

    async fn fetch_referencing(
        &self,
        table: &Table,
        fk_columns: &[String],
        keys: &[Vec<String>],
        filter: Option<&TimeframeFilter>,
    ) -> Result<Vec<RawRow>> {
        Ok(self
            .table_rows(table)
            .into_iter()
            .filter(|row| {
                let tuple: Option<Vec<String>> = fk_columns
                    .iter()
                    .map(|c| row.get(c).cloned().flatten())
                    .collect();
                tuple.map(|t| keys.contains(&t)).unwrap_or(false)
            })
            .filter(|row| filter.map(|f| Self::in_window(row, f)).unwrap_or(true))
            .collect())
    }

    async fn fetch_timeframe(&self, table: &Table, filter: &TimeframeFilter) -> Result<Vec<RawRow>> {
        Ok(self
            .table_rows(table)
            .into_iter()
            .filter(|row| Self::in_window(row, filter))
            .collect())
    }
}

/// Reference data set.
///
/// Management chain: 1 is the root, 2 reports to 1, users 3/4 report to
/// 2 (siblings), 5 reports to 1. User 3 has one order with one item
/// (product 5, category 1), one bank account with two 2023 and five 2024
/// transactions, and one group membership. Categories 10 and 11
/// reference each other.
pub fn fixture_source() -> MemorySource {
    let mut s = MemorySource::new();

    s.add_row("roles", &[("id", Some("1")), ("label", Some("lead"))]);
    s.add_row("roles", &[("id", Some("2")), ("label", Some("member"))]);
    s.add_row("roles", &[("id", Some("3")), ("label", Some("root"))]);
    s.add_row("roles", &[("id", Some("4")), ("label", Some("analyst"))]);
    s.add_row("roles", &[("id", Some("5")), ("label", Some("auditor"))]);

    // Each user has their own role, so role membership never smuggles a
    // sibling into a strict run.
    s.add_row("users", &[("id", Some("1")), ("role_id", Some("3")), ("manager_id", None), ("email", Some("root@example.com"))]);
    s.add_row("users", &[("id", Some("2")), ("role_id", Some("1")), ("manager_id", Some("1")), ("email", Some("lead@example.com"))]);
    s.add_row("users", &[("id", Some("3")), ("role_id", Some("2")), ("manager_id", Some("2")), ("email", Some("three@example.com"))]);
    s.add_row("users", &[("id", Some("4")), ("role_id", Some("4")), ("manager_id", Some("2")), ("email", Some("four@example.com"))]);
    s.add_row("users", &[("id", Some("5")), ("role_id", Some("5")), ("manager_id", Some("1")), ("email", Some("five@example.com"))]);

    s.add_row("groups", &[("id", Some("1")), ("name", Some("buyers"))]);
    s.add_row("groups", &[("id", Some("2")), ("name", Some("sellers"))]);
    s.add_row("user_groups", &[("id", Some("1")), ("user_id", Some("3")), ("group_id", Some("1"))]);
    s.add_row("user_groups", &[("id", Some("2")), ("user_id", Some("4")), ("group_id", Some("2"))]);

    s.add_row("categories", &[("id", Some("1")), ("parent_id", None), ("name", Some("books"))]);
    s.add_row("categories", &[("id", Some("10")), ("parent_id", Some("11")), ("name", Some("tools"))]);
    s.add_row("categories", &[("id", Some("11")), ("parent_id", Some("10")), ("name", Some("hardware"))]);

    s.add_row("products", &[("id", Some("5")), ("category_id", Some("1")), ("name", Some("atlas"))]);
    s.add_row("products", &[("id", Some("6")), ("category_id", Some("10")), ("name", Some("hammer"))]);

    s.add_row("orders", &[("id", Some("100")), ("user_id", Some("3")), ("created_at", Some("2024-02-01 09:00:00"))]);
    s.add_row("order_items", &[("id", Some("1000")), ("order_id", Some("100")), ("product_id", Some("5")), ("quantity", Some("2"))]);

    s.add_row("banks", &[("id", Some("1")), ("name", Some("First National"))]);
    s.add_row("bank_accounts", &[("id", Some("7")), ("user_id", Some("3")), ("bank_id", Some("1"))]);

    s.add_row("transactions", &[("id", Some("9001")), ("bank_account_id", Some("7")), ("created_at", Some("2023-03-01 10:00:00")), ("amount", Some("10.00"))]);
    s.add_row("transactions", &[("id", Some("9002")), ("bank_account_id", Some("7")), ("created_at", Some("2023-11-15 10:00:00")), ("amount", Some("20.00"))]);
    s.add_row("transactions", &[("id", Some("9003")), ("bank_account_id", Some("7")), ("created_at", Some("2024-01-10 10:00:00")), ("amount", Some("30.00"))]);
    s.add_row("transactions", &[("id", Some("9004")), ("bank_account_id", Some("7")), ("created_at", Some("2024-04-02 10:00:00")), ("amount", Some("40.00"))]);
    s.add_row("transactions", &[("id", Some("9005")), ("bank_account_id", Some("7")), ("created_at", Some("2024-06-20 10:00:00")), ("amount", Some("50.00"))]);
    s.add_row("transactions", &[("id", Some("9006")), ("bank_account_id", Some("7")), ("created_at", Some("2024-09-09 10:00:00")), ("amount", Some("60.00"))]);
    s.add_row("transactions", &[("id", Some("9007")), ("bank_account_id", Some("7")), ("created_at", Some("2024-12-30 10:00:00")), ("amount", Some("70.00"))]);

    s
}
