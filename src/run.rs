//! Run orchestration
//!
//! Wires one invocation together: connect, obtain the schema graph
//! (cache or live introspection), then either answer an inspection query
//! or run the full carve pipeline: traverse -> sort -> remap -> render ->
//! write.

use crate::config::{Action, DumpSpec, OutputTarget, RunConfig, SeedSelection};
use crate::connection;
use crate::emit::ddl::DdlGenerator;
use crate::emit::writer::ReplayWriter;
use crate::error::Result;
use crate::inspect;
use crate::order::sort_records;
use crate::output::{default_dump_dir, OutputSink};
use crate::remap::build_pk_map;
use crate::schema::cache::SchemaCache;
use crate::schema::introspect::Introspector;
use crate::schema::{SchemaGraph, TableRef};
use crate::traverse::engine::TraversalEngine;
use crate::traverse::source::PgRecordSource;
use crate::traverse::{Seed, TimeframeFilter};
use chrono::Duration;
use deadpool_postgres::Client;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Execute one validated run configuration.
pub async fn execute(config: RunConfig) -> Result<()> {
    let cache = open_cache(&config);

    if config.clear_cache {
        if let Some(cache) = &cache {
            let removed = cache.clear()?;
            info!(removed, "schema cache cleared");
        }
        if matches!(config.action, Action::ClearCacheOnly) {
            return Ok(());
        }
    }

    let pool = connection::create_pool(&config.params)?;
    let client =
        connection::establish(&pool, config.read_only, config.statement_timeout_minutes).await?;

    let graph = load_schema_graph(&client, &config, cache.as_ref()).await?;

    match &config.action {
        Action::ListTables => {
            print!("{}", inspect::render_tables(&graph));
        }
        Action::Describe(name) => {
            let table_ref = qualify(name, &config.schema);
            print!("{}", inspect::render_describe(&graph, &table_ref)?);
        }
        Action::Graph => {
            print!("{}", inspect::render_graph(&graph));
        }
        Action::Dump(spec) => {
            dump(&config, spec, &graph, client).await?;
        }
        Action::ClearCacheOnly => {}
    }

    Ok(())
}

fn open_cache(config: &RunConfig) -> Option<SchemaCache> {
    if !config.cache.enabled && !config.clear_cache {
        return None;
    }
    match SchemaCache::open_default() {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!(error = %e, "schema cache unavailable, continuing without it");
            None
        }
    }
}

/// Cached graph when fresh, live introspection otherwise. Cache failures
/// never fail the run.
async fn load_schema_graph(
    client: &Client,
    config: &RunConfig,
    cache: Option<&SchemaCache>,
) -> Result<SchemaGraph> {
    if config.cache.enabled {
        if let Some(cache) = cache {
            match cache.load(
                &config.params.host,
                &config.params.database,
                Duration::hours(config.cache.ttl_hours),
            ) {
                Ok(Some(graph)) => return Ok(graph),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "schema cache read failed, introspecting"),
            }
        }
    }

    let graph = Introspector::introspect(client, &config.schema).await?;

    if config.cache.enabled {
        if let Some(cache) = cache {
            if let Err(e) = cache.store(&config.params.host, &config.params.database, &graph) {
                warn!(error = %e, "schema cache write failed");
            }
        }
    }

    Ok(graph)
}

async fn dump(
    config: &RunConfig,
    spec: &DumpSpec,
    graph: &SchemaGraph,
    client: Client,
) -> Result<()> {
    let table_ref = qualify(&spec.table, &config.schema);
    graph.require(&table_ref)?;

    let seeds = build_seeds(spec, &table_ref);
    let filters = build_filters(spec, &table_ref, &config.schema);

    let source = PgRecordSource::new(client);
    let engine = TraversalEngine::new(graph, &source, spec.mode)
        .with_filters(filters)
        .with_depth_limit(spec.max_depth)
        .with_strict_refs(spec.strict_refs);

    let outcome = engine.run(&seeds).await?;
    if outcome.records.is_empty() {
        warn!("no records collected; the replay script will be empty");
    }

    let sorted = sort_records(&outcome.records);
    let pk_map = if spec.remap {
        Some(build_pk_map(&sorted.order, &sorted.cyclic, graph)?)
    } else {
        None
    };

    let ddl = if spec.create_schema {
        let tables: BTreeSet<TableRef> = outcome
            .records
            .keys()
            .map(|id| id.table_ref.clone())
            .collect();
        DdlGenerator::generate(graph, &tables, Some(&config.params.database))
    } else {
        Vec::new()
    };

    let script = ReplayWriter::new(graph).render(&outcome.records, &sorted, pk_map.as_ref(), &ddl)?;

    let sink = resolve_sink(config, spec, &table_ref)?;
    sink.write(&script)?;

    info!(
        records = outcome.records.len(),
        tables = outcome
            .records
            .keys()
            .map(|id| &id.table_ref)
            .collect::<BTreeSet<_>>()
            .len(),
        remapped = pk_map.as_ref().map(|m| m.len()).unwrap_or(0),
        warnings = outcome.warnings.len(),
        "carve complete"
    );
    for warning in &outcome.warnings {
        warn!("{}", warning);
    }

    Ok(())
}

fn build_seeds(spec: &DumpSpec, table_ref: &TableRef) -> Vec<Seed> {
    match &spec.seed {
        SeedSelection::Pks(pks) => vec![Seed::Rows {
            table_ref: table_ref.clone(),
            pks: pks.clone(),
        }],
        SeedSelection::Timeframe { column, lower, upper } => {
            vec![Seed::Timeframe(TimeframeFilter {
                table_ref: table_ref.clone(),
                column: column.clone(),
                lower: lower.clone(),
                upper: upper.clone(),
            })]
        }
    }
}

/// Truncate arguments become filters; a timeframe seed additionally acts
/// as a filter on the seed table itself, so rows rediscovered through
/// incoming edges obey the same window.
fn build_filters(spec: &DumpSpec, table_ref: &TableRef, default_schema: &str) -> Vec<TimeframeFilter> {
    let mut filters: Vec<TimeframeFilter> = spec
        .truncates
        .iter()
        .map(|t| TimeframeFilter {
            table_ref: qualify(&t.table, default_schema),
            column: t.column.clone(),
            lower: t.lower.clone(),
            upper: t.upper.clone(),
        })
        .collect();

    if let SeedSelection::Timeframe { column, lower, upper } = &spec.seed {
        filters.push(TimeframeFilter {
            table_ref: table_ref.clone(),
            column: column.clone(),
            lower: lower.clone(),
            upper: upper.clone(),
        });
    }

    filters
}

fn resolve_sink(config: &RunConfig, spec: &DumpSpec, table_ref: &TableRef) -> Result<OutputSink> {
    let first_pk = match &spec.seed {
        SeedSelection::Pks(pks) => pks
            .first()
            .map(|pk| pk.join("-"))
            .unwrap_or_else(|| "seed".to_string()),
        SeedSelection::Timeframe { lower, .. } => lower.clone(),
    };

    match &spec.output {
        OutputTarget::Stdout => Ok(OutputSink::Stdout),
        OutputTarget::Path(path) => Ok(OutputSink::resolve(
            Some(path.clone()),
            &table_ref.schema,
            &table_ref.name,
            &first_pk,
        )),
        OutputTarget::DumpDir => {
            let dir = default_dump_dir(config.dump_dir.as_deref())?;
            std::fs::create_dir_all(&dir)?;
            Ok(OutputSink::resolve(
                Some(dir),
                &table_ref.schema,
                &table_ref.name,
                &first_pk,
            ))
        }
    }
}

/// `name` may be bare or `schema.name`; bare names take the run's schema.
fn qualify(name: &str, default_schema: &str) -> TableRef {
    match name.split_once('.') {
        Some((schema, table)) => TableRef::new(schema, table),
        None => TableRef::new(default_schema, name),
    }
}
