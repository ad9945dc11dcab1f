//! Traversal engine
//!
//! Bidirectional breadth-first expansion over foreign-key edges. Starting
//! from the seeds, the engine walks outgoing FKs (dependencies) and
//! incoming FKs (dependents), batching fetches per (table, FK column
//! list), deduplicating by record identity, and recording a dependency
//! edge for every FK it resolves.
//!
//! The walk is level-synchronous: all records of one depth are fetched
//! and processed before the next depth starts, which is what makes the
//! batched incoming-edge queries possible and keeps the emitted stream
//! deterministic.

use crate::error::{CarveError, Result};
use crate::schema::{ForeignKey, SchemaGraph, Table, TableRef};
use crate::traverse::source::RecordSource;
use crate::traverse::{
    PkTuple, RawRow, RecordData, RecordIdentifier, Seed, TimeframeFilter, TraversalMode,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// Result of a traversal: the closed record set plus non-fatal warnings.
#[derive(Debug)]
pub struct TraversalOutcome {
    pub records: BTreeMap<RecordIdentifier, RecordData>,
    pub warnings: Vec<String>,
}

/// Breadth-first traversal over the schema graph.
pub struct TraversalEngine<'a, S: RecordSource + Sync> {
    graph: &'a SchemaGraph,
    source: &'a S,
    mode: TraversalMode,
    filters: HashMap<TableRef, TimeframeFilter>,
    depth_limit: Option<u32>,
    strict_refs: bool,
}

impl<'a, S: RecordSource + Sync> TraversalEngine<'a, S> {
    pub fn new(graph: &'a SchemaGraph, source: &'a S, mode: TraversalMode) -> Self {
        Self {
            graph,
            source,
            mode,
            filters: HashMap::new(),
            depth_limit: None,
            strict_refs: false,
        }
    }

    /// Register timeframe filters. One filter per table; a later filter
    /// for the same table replaces the earlier one.
    pub fn with_filters(mut self, filters: Vec<TimeframeFilter>) -> Self {
        for filter in filters {
            self.filters.insert(filter.table_ref.clone(), filter);
        }
        self
    }

    pub fn with_depth_limit(mut self, limit: Option<u32>) -> Self {
        self.depth_limit = limit;
        self
    }

    /// Promote dangling references from warnings to a fatal error.
    pub fn with_strict_refs(mut self, strict: bool) -> Self {
        self.strict_refs = strict;
        self
    }

    /// Run the traversal to closure.
    pub async fn run(&self, seeds: &[Seed]) -> Result<TraversalOutcome> {
        for filter in self.filters.values() {
            filter.validate(self.graph)?;
        }

        let mut visited: HashSet<RecordIdentifier> = HashSet::new();
        let mut enqueued: HashSet<RecordIdentifier> = HashSet::new();
        let mut records: BTreeMap<RecordIdentifier, RecordData> = BTreeMap::new();
        let mut row_cache: HashMap<RecordIdentifier, RawRow> = HashMap::new();
        let mut seed_ids: HashSet<RecordIdentifier> = HashSet::new();
        let mut driven: HashSet<(String, Vec<String>)> = HashSet::new();
        let mut dangling: BTreeSet<RecordIdentifier> = BTreeSet::new();
        let mut warnings: Vec<String> = Vec::new();

        let mut current = self
            .collect_seeds(seeds, &mut enqueued, &mut seed_ids, &mut row_cache)
            .await?;
        let mut depth: u32 = 0;

        while !current.is_empty() {
            self.prefetch_level(&current, &visited, &seed_ids, &mut row_cache)
                .await?;

            // Incoming-edge requests accumulated across the whole level,
            // keyed (referencing table, constraint) for one batched query
            // per FK column list.
            let mut pending: BTreeMap<(TableRef, String), (ForeignKey, Vec<Vec<String>>)> =
                BTreeMap::new();
            let mut next: Vec<RecordIdentifier> = Vec::new();

            for id in current.drain(..) {
                if !visited.insert(id.clone()) {
                    continue;
                }
                let table = self.graph.require(&id.table_ref)?;

                let Some(row) = row_cache.remove(&id) else {
                    if seed_ids.contains(&id) {
                        warnings.push(format!("seed row {} not found in source", id));
                        warn!(record = %id, "seed row not found");
                    } else {
                        let msg = format!("dangling reference: {} not found in source", id);
                        if self.strict_refs {
                            return Err(CarveError::DanglingReference(msg));
                        }
                        warn!(record = %id, "dangling reference");
                        warnings.push(msg);
                    }
                    // Either way, no dependency may keep pointing at the
                    // missing row.
                    dangling.insert(id);
                    continue;
                };

                let at_limit = self.depth_limit.map(|l| depth >= l).unwrap_or(false);
                let is_seed = seed_ids.contains(&id);
                let mut record = RecordData::new(id, row);

                self.expand_outgoing(
                    table,
                    &mut record,
                    is_seed,
                    at_limit,
                    &mut enqueued,
                    &mut next,
                    &mut warnings,
                );

                if !at_limit {
                    self.collect_incoming(table, &record, is_seed, &mut driven, &mut pending);
                }

                records.insert(record.id.clone(), record);
            }

            for ((from_table, _constraint), (fk, keys)) in pending {
                let Some(ref_table) = self.graph.get(&from_table) else {
                    continue;
                };
                let filter = self.filters.get(&from_table);
                let rows = self
                    .source
                    .fetch_referencing(ref_table, &fk.from_columns, &keys, filter)
                    .await?;

                for row in rows {
                    let Some(pk) = extract_pk(ref_table, &row) else {
                        continue;
                    };
                    let rid = RecordIdentifier::new(from_table.clone(), pk);
                    if enqueued.insert(rid.clone()) {
                        row_cache.insert(rid.clone(), row);
                        next.push(rid);
                    }
                }
            }

            current = next;
            depth += 1;
        }

        if !dangling.is_empty() {
            for record in records.values_mut() {
                for id in &dangling {
                    record.dependencies.remove(id);
                }
            }
        }

        debug!(
            records = records.len(),
            depth_reached = depth,
            warnings = warnings.len(),
            "traversal closed"
        );

        Ok(TraversalOutcome { records, warnings })
    }

    /// Resolve the seed list into the depth-0 frontier.
    async fn collect_seeds(
        &self,
        seeds: &[Seed],
        enqueued: &mut HashSet<RecordIdentifier>,
        seed_ids: &mut HashSet<RecordIdentifier>,
        row_cache: &mut HashMap<RecordIdentifier, RawRow>,
    ) -> Result<Vec<RecordIdentifier>> {
        let mut frontier = Vec::new();

        for seed in seeds {
            match seed {
                Seed::Rows { table_ref, pks } => {
                    let table = self.graph.require(table_ref)?;
                    if table.primary_key.is_empty() {
                        return Err(CarveError::Usage(format!(
                            "table {} has no primary key and cannot be seeded",
                            table_ref
                        )));
                    }
                    for pk in pks {
                        if pk.len() != table.primary_key.len() {
                            return Err(CarveError::Usage(format!(
                                "seed for {} has {} value(s), primary key has {} column(s)",
                                table_ref,
                                pk.len(),
                                table.primary_key.len()
                            )));
                        }
                        let id = RecordIdentifier::new(table_ref.clone(), pk.clone());
                        if enqueued.insert(id.clone()) {
                            seed_ids.insert(id.clone());
                            frontier.push(id);
                        }
                    }
                }
                Seed::Timeframe(filter) => {
                    filter.validate(self.graph)?;
                    let table = self.graph.require(&filter.table_ref)?;
                    let rows = self.source.fetch_timeframe(table, filter).await?;
                    for row in rows {
                        let Some(pk) = extract_pk(table, &row) else {
                            continue;
                        };
                        let id = RecordIdentifier::new(filter.table_ref.clone(), pk);
                        if enqueued.insert(id.clone()) {
                            seed_ids.insert(id.clone());
                            row_cache.insert(id.clone(), row);
                            frontier.push(id);
                        }
                    }
                }
            }
        }

        Ok(frontier)
    }

    /// Fetch rows for every identifier of the level that has no cached
    /// row yet, batched per table. Seed fetches of a filtered table carry
    /// the filter predicate; forward-resolved fetches never do (the
    /// dependency closure must stay complete).
    async fn prefetch_level(
        &self,
        level: &[RecordIdentifier],
        visited: &HashSet<RecordIdentifier>,
        seed_ids: &HashSet<RecordIdentifier>,
        row_cache: &mut HashMap<RecordIdentifier, RawRow>,
    ) -> Result<()> {
        let mut per_table: BTreeMap<TableRef, (Vec<PkTuple>, Vec<PkTuple>)> = BTreeMap::new();

        for id in level {
            if visited.contains(id) || row_cache.contains_key(id) {
                continue;
            }
            let entry = per_table.entry(id.table_ref.clone()).or_default();
            if seed_ids.contains(id) {
                entry.0.push(id.pk.clone());
            } else {
                entry.1.push(id.pk.clone());
            }
        }

        for (table_ref, (seed_pks, plain_pks)) in per_table {
            let table = self.graph.require(&table_ref)?;
            let filter = self.filters.get(&table_ref);

            if !seed_pks.is_empty() {
                let rows = self.source.fetch_by_pks(table, &seed_pks, filter).await?;
                cache_rows(table, rows, row_cache);
            }
            if !plain_pks.is_empty() {
                let rows = self.source.fetch_by_pks(table, &plain_pks, None).await?;
                cache_rows(table, rows, row_cache);
            }
        }

        Ok(())
    }

    /// Step over the record's outgoing FKs: record dependency edges and
    /// enqueue unvisited targets.
    #[allow(clippy::too_many_arguments)]
    fn expand_outgoing(
        &self,
        table: &Table,
        record: &mut RecordData,
        is_seed: bool,
        at_limit: bool,
        enqueued: &mut HashSet<RecordIdentifier>,
        next: &mut Vec<RecordIdentifier>,
        warnings: &mut Vec<String>,
    ) {
        for fk in &table.outgoing {
            if self.skip_self_edge(fk, is_seed) {
                continue;
            }

            let values: Option<Vec<String>> = fk
                .from_columns
                .iter()
                .map(|c| record.values.get(c).cloned().flatten())
                .collect();
            let Some(values) = values else {
                // A null FK column means no reference to resolve.
                continue;
            };

            let Some(target_table) = self.graph.get(&fk.to_table) else {
                warnings.push(format!(
                    "constraint {} references table {} outside the introspected schema",
                    fk.name, fk.to_table
                ));
                continue;
            };

            let Some(target_id) = resolve_target_identifier(target_table, fk, &values) else {
                warnings.push(format!(
                    "constraint {} references non-primary-key columns of {}; edge not followed",
                    fk.name, fk.to_table
                ));
                continue;
            };

            if at_limit {
                // Do not expand, but keep edges into the already-collected set.
                if enqueued.contains(&target_id) {
                    record.dependencies.insert(target_id);
                }
                continue;
            }

            record.dependencies.insert(target_id.clone());
            if enqueued.insert(target_id.clone()) {
                next.push(target_id);
            }
        }
    }

    /// Queue this record's referenced-key tuples for the level's batched
    /// incoming-edge queries.
    fn collect_incoming(
        &self,
        table: &Table,
        record: &RecordData,
        is_seed: bool,
        driven: &mut HashSet<(String, Vec<String>)>,
        pending: &mut BTreeMap<(TableRef, String), (ForeignKey, Vec<Vec<String>>)>,
    ) {
        for fk in &table.incoming {
            if self.skip_self_edge(fk, is_seed) {
                continue;
            }

            let key: Option<Vec<String>> = fk
                .to_columns
                .iter()
                .map(|c| record.values.get(c).cloned().flatten())
                .collect();
            let Some(key) = key else {
                continue;
            };

            if driven.insert((fk.name.clone(), key.clone())) {
                pending
                    .entry((fk.from_table.clone(), fk.name.clone()))
                    .or_insert_with(|| (fk.clone(), Vec::new()))
                    .1
                    .push(key);
            }
        }
    }

    /// Strict mode keeps self-referencing edges only for seed records.
    fn skip_self_edge(&self, fk: &ForeignKey, is_seed: bool) -> bool {
        self.mode == TraversalMode::Strict && fk.is_self_referencing() && !is_seed
    }
}

/// Extract the PK tuple from a raw row; `None` when any PK column is
/// absent or null (malformed row, skipped with the caller's policy).
pub fn extract_pk(table: &Table, row: &RawRow) -> Option<PkTuple> {
    table
        .primary_key
        .iter()
        .map(|c| row.get(c).cloned().flatten())
        .collect()
}

fn cache_rows(table: &Table, rows: Vec<RawRow>, row_cache: &mut HashMap<RecordIdentifier, RawRow>) {
    for row in rows {
        if let Some(pk) = extract_pk(table, &row) {
            let id = RecordIdentifier::new(table.table_ref.clone(), pk);
            row_cache.insert(id, row);
        }
    }
}

/// Build the target's identifier from the FK's referenced-column values.
/// The referenced columns must form the target's primary key (in any
/// order); the tuple is normalised to PK column order.
pub(crate) fn resolve_target_identifier(
    target: &Table,
    fk: &ForeignKey,
    values: &[String],
) -> Option<RecordIdentifier> {
    if target.primary_key.is_empty() || fk.to_columns.len() != target.primary_key.len() {
        return None;
    }

    let by_column: HashMap<&str, &String> = fk
        .to_columns
        .iter()
        .map(|c| c.as_str())
        .zip(values.iter())
        .collect();

    let pk: Option<PkTuple> = target
        .primary_key
        .iter()
        .map(|c| by_column.get(c.as_str()).map(|v| (*v).clone()))
        .collect();

    pk.map(|pk| RecordIdentifier::new(target.table_ref.clone(), pk))
}
