//! Directed segment adjacency built from the post-cut join table.
//! Edges point downstream.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{NetworkError, Result};
use crate::segment::{Join, Segment, SegmentId, SENTINEL};

pub struct AdjacencyGraph {
    segment_ids: BTreeSet<SegmentId>,
    /// Sorted upstream neighbours per segment.
    upstream: HashMap<SegmentId, Vec<SegmentId>>,
    /// Sorted non-sentinel downstream neighbours. More than one entry only
    /// for loop segments.
    downstream: HashMap<SegmentId, Vec<SegmentId>>,
    outlets: Vec<SegmentId>,
    loops: HashSet<SegmentId>,
}

impl AdjacencyGraph {
    /// Build the graph, rejecting joins that reference unknown segments and
    /// non-loop segments with more than one outgoing join.
    pub fn build(segments: &[Segment], joins: &[Join]) -> Result<Self> {
        let segment_ids: BTreeSet<SegmentId> = segments.iter().map(|s| s.id).collect();
        let loops: HashSet<SegmentId> = segments.iter().filter(|s| s.is_loop).map(|s| s.id).collect();

        let mut upstream: HashMap<SegmentId, Vec<SegmentId>> = HashMap::new();
        let mut downstream: HashMap<SegmentId, Vec<SegmentId>> = HashMap::new();
        let mut out_count: HashMap<SegmentId, usize> = HashMap::new();
        let mut outlets = Vec::new();

        for j in joins {
            for id in [j.upstream_id, j.downstream_id] {
                if id != SENTINEL && !segment_ids.contains(&id) {
                    return Err(NetworkError::UnknownSegment {
                        upstream: j.upstream_id,
                        downstream: j.downstream_id,
                        missing: id,
                    });
                }
            }
            if j.upstream_id == SENTINEL {
                continue;
            }
            *out_count.entry(j.upstream_id).or_default() += 1;
            if j.downstream_id == SENTINEL {
                outlets.push(j.upstream_id);
            } else {
                upstream.entry(j.downstream_id).or_default().push(j.upstream_id);
                downstream.entry(j.upstream_id).or_default().push(j.downstream_id);
            }
        }

        let mut violations: Vec<(SegmentId, usize)> = out_count
            .into_iter()
            .filter(|(id, count)| *count > 1 && !loops.contains(id))
            .collect();
        violations.sort_unstable();
        if let Some(&(segment, count)) = violations.first() {
            return Err(NetworkError::MultipleDownstream { segment, count });
        }

        for list in upstream.values_mut().chain(downstream.values_mut()) {
            list.sort_unstable();
            list.dedup();
        }
        outlets.sort_unstable();
        outlets.dedup();

        Ok(Self { segment_ids, upstream, downstream, outlets, loops })
    }

    /// Segments with a downstream edge into `id`, ascending.
    pub fn upstream(&self, id: SegmentId) -> &[SegmentId] {
        self.upstream.get(&id).map_or(&[], Vec::as_slice)
    }

    pub fn is_confluence(&self, id: SegmentId) -> bool {
        self.upstream(id).len() >= 2
    }

    /// Downstream neighbour, or `None` at an outlet or dangling end. Loop
    /// segments with several downstream edges report the lowest id.
    pub fn downstream(&self, id: SegmentId) -> Option<SegmentId> {
        self.downstream.get(&id).and_then(|d| d.first().copied())
    }

    /// Segments that drain to the outlet sentinel, ascending.
    pub fn outlets(&self) -> &[SegmentId] {
        &self.outlets
    }

    pub fn is_head(&self, id: SegmentId) -> bool {
        self.upstream(id).is_empty()
    }

    pub fn is_loop(&self, id: SegmentId) -> bool {
        self.loops.contains(&id)
    }

    pub fn contains(&self, id: SegmentId) -> bool {
        self.segment_ids.contains(&id)
    }

    /// All segment ids, ascending.
    pub fn segment_ids(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.segment_ids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.segment_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segment_ids.is_empty()
    }
}
