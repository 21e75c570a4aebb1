//! Root enumeration and upstream traversal.

use std::collections::{HashMap, HashSet};

use crate::barrier::BarrierJoin;
use crate::graph::AdjacencyGraph;
use crate::segment::{SegmentId, SENTINEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    /// Segment drains to the outlet sentinel.
    Outlet,
    /// Segment is immediately upstream of a barrier.
    Barrier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Root {
    pub segment: SegmentId,
    pub kind: RootKind,
}

/// Roots in enumeration order: outlets ascending, then barrier upstream
/// segments ascending. A segment that is both keeps its outlet position but
/// is marked as a barrier root.
///
/// Barrier rows whose upstream segment is not in the graph are skipped; the
/// cutter never produces them.
pub fn enumerate_roots(graph: &AdjacencyGraph, barrier_joins: &[BarrierJoin]) -> Vec<Root> {
    let mut roots: Vec<Root> = graph
        .outlets()
        .iter()
        .map(|&segment| Root { segment, kind: RootKind::Outlet })
        .collect();
    let mut seen: HashSet<SegmentId> = roots.iter().map(|r| r.segment).collect();

    let mut barrier_roots: Vec<SegmentId> = barrier_joins
        .iter()
        .map(|b| b.upstream_id)
        .filter(|&id| id != SENTINEL && graph.contains(id))
        .collect();
    barrier_roots.sort_unstable();
    barrier_roots.dedup();

    for segment in barrier_roots {
        if seen.insert(segment) {
            roots.push(Root { segment, kind: RootKind::Barrier });
        } else if let Some(root) = roots.iter_mut().find(|r| r.segment == segment) {
            root.kind = RootKind::Barrier;
        }
    }
    roots
}

/// Per-root upstream walks. Every reached segment belongs to exactly one
/// root's member list.
pub struct Traversal {
    /// Members per root index, in visit order.
    pub members: Vec<Vec<SegmentId>>,
    /// Pairs of root indices whose walks met on a shared segment.
    pub overlaps: Vec<(usize, usize)>,
}

/// Walk upstream from every root with an explicit stack.
///
/// A walk never enters another root's segment; it does enter loop
/// segments. A segment is claimed by the first walk that reaches it; a later
/// walk reaching it records an overlap instead of revisiting it.
pub fn traverse_upstream(graph: &AdjacencyGraph, roots: &[Root]) -> Traversal {
    let root_set: HashSet<SegmentId> = roots.iter().map(|r| r.segment).collect();
    let mut owner: HashMap<SegmentId, usize> = HashMap::with_capacity(graph.len());
    let mut members = vec![Vec::new(); roots.len()];
    let mut overlaps = Vec::new();

    for (i, root) in roots.iter().enumerate() {
        if let Some(&j) = owner.get(&root.segment) {
            overlaps.push((i, j));
            continue;
        }
        owner.insert(root.segment, i);
        let mut stack = vec![root.segment];

        while let Some(segment) = stack.pop() {
            members[i].push(segment);
            for &up in graph.upstream(segment) {
                if up != root.segment && root_set.contains(&up) {
                    continue;
                }
                match owner.get(&up) {
                    Some(&j) if j != i => overlaps.push((i, j)),
                    Some(_) => {}
                    None => {
                        owner.insert(up, i);
                        stack.push(up);
                    }
                }
            }
        }
    }

    overlaps.sort_unstable();
    overlaps.dedup();
    Traversal { members, overlaps }
}
