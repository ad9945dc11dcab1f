//! End-to-end traversal scenarios against the reference commerce fixture.
//!
//! Each scenario runs the full pipeline (traverse -> sort -> remap ->
//! render) over the in-memory source and checks the collected set, the
//! emission order, and the rendered stream.

mod common;

use common::{fixture_graph, fixture_source, t, MemorySource};
use pgcarve::emit::writer::ReplayWriter;
use pgcarve::error::CarveError;
use pgcarve::order::{sort_records, SortedRecords};
use pgcarve::remap::build_pk_map;
use pgcarve::schema::SchemaGraph;
use pgcarve::traverse::engine::{TraversalEngine, TraversalOutcome};
use pgcarve::traverse::{RecordIdentifier, Seed, TimeframeFilter, TraversalMode};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

fn seed_users_3() -> Vec<Seed> {
    vec![Seed::Rows {
        table_ref: t("users"),
        pks: vec![vec!["3".to_string()]],
    }]
}

async fn run(
    graph: &SchemaGraph,
    source: &MemorySource,
    mode: TraversalMode,
    filters: Vec<TimeframeFilter>,
    seeds: &[Seed],
) -> TraversalOutcome {
    TraversalEngine::new(graph, source, mode)
        .with_filters(filters)
        .run(seeds)
        .await
        .expect("traversal succeeds")
}

/// PKs collected for one table, sorted.
fn collected(outcome: &TraversalOutcome, table: &str) -> Vec<String> {
    let mut pks: Vec<String> = outcome
        .records
        .keys()
        .filter(|id| id.table_ref == t(table))
        .map(|id| id.pk.join(","))
        .collect();
    pks.sort();
    pks
}

/// Closure check: every dependency of every emitted record appears
/// earlier in the stream, unless the sorter flagged the record as
/// cycle-involved.
fn assert_closure(
    records: &BTreeMap<RecordIdentifier, pgcarve::traverse::RecordData>,
    sorted: &SortedRecords,
) {
    let position: BTreeMap<&RecordIdentifier, usize> =
        sorted.order.iter().enumerate().map(|(i, id)| (id, i)).collect();

    for (i, id) in sorted.order.iter().enumerate() {
        for dep in &records[id].dependencies {
            let dep_position = position
                .get(dep)
                .unwrap_or_else(|| panic!("{} depends on uncollected {}", id, dep));
            if *dep_position >= i {
                assert!(
                    sorted.cyclic.contains(id),
                    "{} emitted before its dependency {} without a cycle flag",
                    id,
                    dep
                );
            }
        }
    }
}

#[tokio::test]
async fn scenario_single_seed_strict() {
    let graph = fixture_graph();
    let source = fixture_source();

    let outcome = run(&graph, &source, TraversalMode::Strict, vec![], &seed_users_3()).await;

    // The seed, its manager, and the full dependent closure of the seed.
    assert_eq!(collected(&outcome, "users"), vec!["2", "3"]);
    assert_eq!(collected(&outcome, "roles"), vec!["1", "2"]);
    assert_eq!(collected(&outcome, "orders"), vec!["100"]);
    assert_eq!(collected(&outcome, "order_items"), vec!["1000"]);
    assert_eq!(collected(&outcome, "products"), vec!["5"]);
    assert_eq!(collected(&outcome, "categories"), vec!["1"]);
    assert_eq!(collected(&outcome, "banks"), vec!["1"]);
    assert_eq!(collected(&outcome, "bank_accounts"), vec!["7"]);
    assert_eq!(
        collected(&outcome, "transactions"),
        vec!["9001", "9002", "9003", "9004", "9005", "9006", "9007"]
    );
    assert_eq!(collected(&outcome, "user_groups"), vec!["1"]);
    assert_eq!(collected(&outcome, "groups"), vec!["1"]);

    // No sibling of user 3 (same manager) appears, and the manager's own
    // manager is not followed.
    assert!(!collected(&outcome, "users").contains(&"1".to_string()));
    assert!(!collected(&outcome, "users").contains(&"4".to_string()));

    let sorted = sort_records(&outcome.records);
    assert!(sorted.cyclic.is_empty());
    assert_closure(&outcome.records, &sorted);
}

#[tokio::test]
async fn scenario_single_seed_wide() {
    let graph = fixture_graph();
    let source = fixture_source();

    let outcome = run(&graph, &source, TraversalMode::Wide, vec![], &seed_users_3()).await;

    // Every user sharing manager 2 appears; the walk also climbs to the
    // root of the management chain and back down.
    let users = collected(&outcome, "users");
    assert!(users.contains(&"3".to_string()));
    assert!(users.contains(&"4".to_string()));
    assert_eq!(users, vec!["1", "2", "3", "4", "5"]);

    let sorted = sort_records(&outcome.records);
    assert_closure(&outcome.records, &sorted);

    // Batching keeps the fetch count in the same order as the record
    // count, not the edge count.
    assert!(source.query_count() < outcome.records.len() * 3);
}

#[tokio::test]
async fn scenario_timeframe_filter_on_related_table() {
    let graph = fixture_graph();
    let source = fixture_source();

    let filter = TimeframeFilter {
        table_ref: t("transactions"),
        column: "created_at".to_string(),
        lower: "2024-01-01".to_string(),
        upper: "2024-12-31".to_string(),
    };
    let outcome = run(
        &graph,
        &source,
        TraversalMode::Strict,
        vec![filter],
        &seed_users_3(),
    )
    .await;

    // Exactly the five 2024 transactions; every other dependency
    // unchanged from the unfiltered run.
    assert_eq!(
        collected(&outcome, "transactions"),
        vec!["9003", "9004", "9005", "9006", "9007"]
    );
    assert_eq!(collected(&outcome, "bank_accounts"), vec!["7"]);
    assert_eq!(collected(&outcome, "users"), vec!["2", "3"]);
    assert_eq!(collected(&outcome, "orders"), vec!["100"]);
}

#[tokio::test]
async fn scenario_invalid_filter_fails_before_traversal() {
    let graph = fixture_graph();
    let source = fixture_source();

    let filter = TimeframeFilter {
        table_ref: t("transactions"),
        column: "amount".to_string(),
        lower: "0".to_string(),
        upper: "100".to_string(),
    };
    let result = TraversalEngine::new(&graph, &source, TraversalMode::Strict)
        .with_filters(vec![filter])
        .run(&seed_users_3())
        .await;

    assert!(matches!(result, Err(CarveError::InvalidFilter(_))));
    // Nothing was fetched.
    assert_eq!(source.query_count(), 0);
}

#[tokio::test]
async fn scenario_multi_seed_deduplication() {
    let graph = fixture_graph();
    let source = fixture_source();

    let seeds = vec![Seed::Rows {
        table_ref: t("users"),
        pks: vec![
            vec!["3".to_string()],
            vec!["4".to_string()],
            vec!["5".to_string()],
        ],
    }];
    let outcome = run(&graph, &source, TraversalMode::Strict, vec![], &seeds).await;

    // Users 3 and 4 share manager 2; user 5 pulls manager 1.
    assert_eq!(collected(&outcome, "users"), vec!["1", "2", "3", "4", "5"]);

    let sorted = sort_records(&outcome.records);
    let script = ReplayWriter::new(&graph)
        .render(&outcome.records, &sorted, None, &[])
        .unwrap();

    // Shared records are emitted exactly once.
    assert_eq!(
        script
            .lines()
            .filter(|l| l.contains("INSERT INTO \"public\".\"users\"") && l.contains("(2, 1, 1,"))
            .count(),
        1
    );
    assert_eq!(
        script
            .lines()
            .filter(|l| l.contains("INSERT INTO \"public\".\"roles\"") && l.contains("(2, 'member')"))
            .count(),
        1
    );
}

#[tokio::test]
async fn scenario_cycle_handling() {
    let graph = fixture_graph();
    let source = fixture_source();

    // Product 6 lives in category 10, which cycles with category 11.
    let seeds = vec![Seed::Rows {
        table_ref: t("products"),
        pks: vec![vec!["6".to_string()]],
    }];
    let outcome = run(&graph, &source, TraversalMode::Wide, vec![], &seeds).await;

    assert_eq!(collected(&outcome, "categories"), vec!["10", "11"]);

    let sorted = sort_records(&outcome.records);
    assert_eq!(sorted.cyclic.len(), 1);
    assert_closure(&outcome.records, &sorted);

    // Without remapping, the cyclic rows ride inside a deferred
    // constraint region.
    let script = ReplayWriter::new(&graph)
        .render(&outcome.records, &sorted, None, &[])
        .unwrap();
    let deferred = script.find("SET CONSTRAINTS ALL DEFERRED;").unwrap();
    let category_insert = script.find("INSERT INTO \"public\".\"categories\"").unwrap();
    assert!(deferred < category_insert);

    // With remapping, a cycle through remappable identity PKs is fatal.
    let result = build_pk_map(&sorted.order, &sorted.cyclic, &graph);
    assert!(matches!(result, Err(CarveError::CycleDetected(_))));
}

#[tokio::test]
async fn scenario_pk_remapping() {
    let graph = fixture_graph();
    let source = fixture_source();

    let outcome = run(&graph, &source, TraversalMode::Strict, vec![], &seed_users_3()).await;
    let sorted = sort_records(&outcome.records);
    let pk_map = build_pk_map(&sorted.order, &sorted.cyclic, &graph).unwrap();

    // Every collected table here has a scalar identity PK.
    assert_eq!(pk_map.len(), outcome.records.len());

    let script = ReplayWriter::new(&graph)
        .render(&outcome.records, &sorted, Some(&pk_map), &[])
        .unwrap();

    let user_token = pk_map
        .get(&RecordIdentifier::new(t("users"), vec!["3".to_string()]))
        .unwrap();
    let role_token = pk_map
        .get(&RecordIdentifier::new(t("roles"), vec!["2".to_string()]))
        .unwrap();

    // The member role is captured, and user 3 references the captured
    // variable rather than the source literal.
    assert!(script.contains(&format!("RETURNING \"id\" INTO {};", role_token)));
    assert!(script.contains(&format!("VALUES ({}, ", role_token)));

    // Orders reference the newly assigned user id.
    let orders_line = script
        .lines()
        .find(|l| l.contains("INSERT INTO \"public\".\"orders\""))
        .unwrap();
    assert!(orders_line.contains(user_token));
    assert!(!orders_line.contains("VALUES (3,"));

    // Remapped inserts never carry the source PK column.
    let users_line = script
        .lines()
        .find(|l| l.contains("INSERT INTO \"public\".\"users\"") && l.contains(user_token))
        .unwrap();
    assert!(!users_line.contains("\"id\","));

    // The whole stream stays transactional.
    assert!(script.starts_with("BEGIN;\n"));
    assert!(script.ends_with("COMMIT;\n"));
}

#[tokio::test]
async fn replay_stream_is_deterministic() {
    let graph = fixture_graph();

    let mut scripts = Vec::new();
    for _ in 0..2 {
        let source = fixture_source();
        let outcome = run(&graph, &source, TraversalMode::Strict, vec![], &seed_users_3()).await;
        let sorted = sort_records(&outcome.records);
        let pk_map = build_pk_map(&sorted.order, &sorted.cyclic, &graph).unwrap();
        let script = ReplayWriter::new(&graph)
            .render(&outcome.records, &sorted, Some(&pk_map), &[])
            .unwrap();
        scripts.push(script);
    }

    assert_eq!(scripts[0], scripts[1]);
}

#[tokio::test]
async fn filter_on_unreached_table_is_inert() {
    let graph = fixture_graph();
    let source = fixture_source();

    // Product 6 lives on the categories island; transactions are never
    // reached, so the filter must change nothing and fail nothing.
    let filter = TimeframeFilter {
        table_ref: t("transactions"),
        column: "created_at".to_string(),
        lower: "2024-01-01".to_string(),
        upper: "2024-12-31".to_string(),
    };
    let seeds = vec![Seed::Rows {
        table_ref: t("products"),
        pks: vec![vec!["6".to_string()]],
    }];
    let outcome = run(&graph, &source, TraversalMode::Strict, vec![filter], &seeds).await;

    assert!(collected(&outcome, "transactions").is_empty());
    assert_eq!(collected(&outcome, "products"), vec!["6"]);
    // Strict mode stops at category 10: the parent self-edge belongs to a
    // non-seed record.
    assert_eq!(collected(&outcome, "categories"), vec!["10"]);
}

#[tokio::test]
async fn timeframe_seed_selects_rows_in_window() {
    let graph = fixture_graph();
    let source = fixture_source();

    // Seed transactions by window instead of by PK. As in the run
    // pipeline, the seed window also filters rediscovery of the seed
    // table through incoming edges.
    let window = TimeframeFilter {
        table_ref: t("transactions"),
        column: "created_at".to_string(),
        lower: "2023-01-01".to_string(),
        upper: "2023-12-31".to_string(),
    };
    let seeds = vec![Seed::Timeframe(window.clone())];
    let outcome = run(&graph, &source, TraversalMode::Strict, vec![window], &seeds).await;

    assert_eq!(collected(&outcome, "transactions"), vec!["9001", "9002"]);
    // Their dependency chain comes along; user 3 is not a seed here, so
    // strict mode does not climb the management chain.
    assert_eq!(collected(&outcome, "bank_accounts"), vec!["7"]);
    assert_eq!(collected(&outcome, "banks"), vec!["1"]);
    assert_eq!(collected(&outcome, "users"), vec!["3"]);
    assert_eq!(collected(&outcome, "roles"), vec!["2"]);
}
