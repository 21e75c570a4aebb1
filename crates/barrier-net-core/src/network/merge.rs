//! Coalescing roots into canonical networks.
//!
//! Roots are unioned when they are upstream candidates of the same barrier
//! (a barrier on a confluence) or when their walks overlap (braided loop
//! channels). A group is represented by the root that comes first in
//! enumeration order.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::warn;

use crate::barrier::{BarrierId, BarrierJoin};
use crate::segment::{SegmentId, SENTINEL};

use super::delineate::Root;

/// Union-find over root indices. The representative of a set is always its
/// smallest index.
pub struct RootSets {
    parent: Vec<usize>,
}

impl RootSets {
    pub fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    pub fn find(&mut self, i: usize) -> usize {
        let mut r = i;
        while self.parent[r] != r {
            r = self.parent[r];
        }
        let mut cur = i;
        while self.parent[cur] != r {
            let next = self.parent[cur];
            self.parent[cur] = r;
            cur = next;
        }
        r
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Union roots that are upstream candidates of one barrier, plus all
/// overlapping pairs, and return the canonical segment id per root index.
pub fn canonical_roots(
    roots: &[Root],
    barrier_joins: &[BarrierJoin],
    overlaps: &[(usize, usize)],
) -> Vec<SegmentId> {
    let index: HashMap<SegmentId, usize> = roots.iter().enumerate().map(|(i, r)| (r.segment, i)).collect();
    let mut sets = RootSets::new(roots.len());

    let mut per_barrier: BTreeMap<BarrierId, Vec<usize>> = BTreeMap::new();
    for row in barrier_joins {
        if let Some(&i) = index.get(&row.upstream_id) {
            per_barrier.entry(row.barrier_id).or_default().push(i);
        }
    }
    for candidates in per_barrier.values() {
        for w in candidates.windows(2) {
            sets.union(w[0], w[1]);
        }
    }
    for &(a, b) in overlaps {
        sets.union(a, b);
    }

    (0..roots.len()).map(|i| roots[sets.find(i)].segment).collect()
}

/// Rewrite barrier rows onto canonical network ids.
///
/// Returns `(merged, dropped)`. A row is dropped when its rewritten upstream
/// id repeats an earlier row of the same barrier, or when its upstream id is
/// not a root at all.
pub fn merge_barrier_joins(
    barrier_joins: &[BarrierJoin],
    canonical: &HashMap<SegmentId, SegmentId>,
) -> (Vec<BarrierJoin>, Vec<BarrierJoin>) {
    let mut rows = barrier_joins.to_vec();
    rows.sort();

    let mut seen: HashSet<(BarrierId, SegmentId)> = HashSet::new();
    let mut merged = Vec::with_capacity(rows.len());
    let mut dropped = Vec::new();

    for row in rows {
        let upstream_id = if row.upstream_id == SENTINEL {
            Some(SENTINEL)
        } else {
            canonical.get(&row.upstream_id).copied()
        };
        match upstream_id {
            Some(upstream_id) if seen.insert((row.barrier_id, upstream_id)) => {
                merged.push(BarrierJoin { upstream_id, ..row });
            }
            Some(upstream_id) => {
                warn!(
                    barrier = row.barrier_id,
                    upstream = row.upstream_id,
                    canonical = upstream_id,
                    "dropping barrier join onto merged network"
                );
                dropped.push(row);
            }
            None => {
                warn!(barrier = row.barrier_id, upstream = row.upstream_id, "dropping dangling barrier join");
                dropped.push(row);
            }
        }
    }
    (merged, dropped)
}
