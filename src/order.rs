//! Dependency sorter
//!
//! Kahn's algorithm over the record-level dependency graph. Edges run
//! dependency -> dependent, so a record is emitted only after everything
//! it references. Ties break deterministically through the identifier
//! ordering (table ascending, then PK tuple lexicographic). Cycles are
//! broken by force-emitting the smallest remaining identifier; such
//! records are flagged so the replay writer can defer constraint checks
//! around them.

use crate::traverse::{RecordData, RecordIdentifier};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Topologically ordered records plus the cycle-breaking set.
#[derive(Debug)]
pub struct SortedRecords {
    /// Emission order: dependencies before dependents.
    pub order: Vec<RecordIdentifier>,
    /// Records emitted while still having unsatisfied dependencies.
    pub cyclic: BTreeSet<RecordIdentifier>,
}

/// Sort the collected records into a replayable order.
pub fn sort_records(records: &BTreeMap<RecordIdentifier, RecordData>) -> SortedRecords {
    let mut in_degree: BTreeMap<&RecordIdentifier, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&RecordIdentifier, Vec<&RecordIdentifier>> = BTreeMap::new();

    for (id, record) in records {
        let mut degree = 0;
        for dep in &record.dependencies {
            // Dependencies outside the collected set (pre-existing target
            // rows) do not constrain ordering.
            if records.contains_key(dep) {
                degree += 1;
                dependents.entry(dep).or_default().push(id);
            }
        }
        in_degree.insert(id, degree);
    }

    let mut ready: BTreeSet<RecordIdentifier> = BTreeSet::new();
    let mut blocked: BTreeSet<RecordIdentifier> = BTreeSet::new();
    for (id, degree) in &in_degree {
        if *degree == 0 {
            ready.insert((*id).clone());
        } else {
            blocked.insert((*id).clone());
        }
    }

    let mut order = Vec::with_capacity(records.len());
    let mut cyclic = BTreeSet::new();

    while order.len() < records.len() {
        let id = match ready.iter().next().cloned() {
            Some(id) => {
                ready.remove(&id);
                id
            }
            None => {
                // Every remaining record is part of (or downstream of) a
                // cycle; emit the smallest and flag it.
                let id = blocked
                    .iter()
                    .next()
                    .cloned()
                    .expect("blocked set cannot be empty while records remain");
                blocked.remove(&id);
                cyclic.insert(id.clone());
                id
            }
        };

        if let Some(deps) = dependents.get(&id) {
            for dependent in deps {
                if let Some(degree) = in_degree.get_mut(*dependent) {
                    if *degree > 0 {
                        *degree -= 1;
                        if *degree == 0 && blocked.remove(*dependent) {
                            ready.insert((*dependent).clone());
                        }
                    }
                }
            }
        }

        order.push(id);
    }

    if !cyclic.is_empty() {
        debug!(flagged = cyclic.len(), "dependency cycles broken");
    }

    SortedRecords { order, cyclic }
}
