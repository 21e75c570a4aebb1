//! Network delineation: root enumeration -> upstream walks -> root merging
//! -> barrier join rewriting.
//!
//! A network is every segment reachable upstream from a root without
//! crossing another root. Roots are outlet segments and the segments
//! immediately upstream of barriers. Roots of one barrier (a barrier on a
//! confluence) and roots whose walks overlap are merged under the id of the
//! root enumerated first: outlets ascending, then barrier roots ascending.
pub mod delineate;
pub mod merge;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::barrier::BarrierJoin;
use crate::graph::AdjacencyGraph;
use crate::segment::SegmentId;
use delineate::{enumerate_roots, traverse_upstream, RootKind};
use merge::{canonical_roots, merge_barrier_joins};

/// Network id: segment id of the canonical root.
pub type NetworkId = SegmentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkOrigin {
    /// Only outlet roots: the network drains out of the study area.
    Outlet,
    /// At least one merged root sits immediately upstream of a barrier.
    Barrier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    pub id: NetworkId,
    pub origin: NetworkOrigin,
    /// Root segments merged into this network, in enumeration order.
    pub roots: Vec<SegmentId>,
    /// Member segment ids, ascending.
    pub members: Vec<SegmentId>,
}

/// Output of [`delineate_networks`].
#[derive(Debug, Clone, Default)]
pub struct Delineation {
    /// Networks ascending by id.
    pub networks: Vec<Network>,
    /// Segment -> network id for every assigned segment.
    pub assignment: BTreeMap<SegmentId, NetworkId>,
    /// Barrier joins rewritten onto canonical network ids, one row per barrier.
    pub barrier_joins: Vec<BarrierJoin>,
    /// Raw rows dropped while merging.
    pub dropped_joins: Vec<BarrierJoin>,
    /// Segments reachable from no root, ascending.
    pub unassigned: Vec<SegmentId>,
}

impl Delineation {
    pub fn network_of(&self, segment: SegmentId) -> Option<NetworkId> {
        self.assignment.get(&segment).copied()
    }

    pub fn network(&self, id: NetworkId) -> Option<&Network> {
        self.networks
            .binary_search_by_key(&id, |n| n.id)
            .ok()
            .map(|i| &self.networks[i])
    }
}

/// Delineate all networks of a cut graph.
///
/// `barrier_joins` is the raw table from the cutter (several rows per
/// barrier on a confluence). The result is a pure function of its inputs.
pub fn delineate_networks(graph: &AdjacencyGraph, barrier_joins: &[BarrierJoin]) -> Delineation {
    let roots = enumerate_roots(graph, barrier_joins);
    let traversal = traverse_upstream(graph, &roots);
    let canonical = canonical_roots(&roots, barrier_joins, &traversal.overlaps);

    let mut grouped: BTreeMap<NetworkId, Network> = BTreeMap::new();
    for (i, root) in roots.iter().enumerate() {
        let id = canonical[i];
        let network = grouped.entry(id).or_insert_with(|| Network {
            id,
            origin: NetworkOrigin::Outlet,
            roots: Vec::new(),
            members: Vec::new(),
        });
        if root.kind == RootKind::Barrier {
            network.origin = NetworkOrigin::Barrier;
        }
        network.roots.push(root.segment);
        network.members.extend_from_slice(&traversal.members[i]);
    }

    let mut assignment = BTreeMap::new();
    for network in grouped.values_mut() {
        network.members.sort_unstable();
        network.members.dedup();
        for &segment in &network.members {
            assignment.insert(segment, network.id);
        }
    }

    let unassigned: Vec<SegmentId> = graph.segment_ids().filter(|id| !assignment.contains_key(id)).collect();
    if !unassigned.is_empty() {
        warn!(count = unassigned.len(), "segments not reachable from any root");
    }

    let root_to_canonical: HashMap<SegmentId, NetworkId> =
        roots.iter().zip(&canonical).map(|(r, &c)| (r.segment, c)).collect();
    let (merged, dropped_joins) = merge_barrier_joins(barrier_joins, &root_to_canonical);

    let networks: Vec<Network> = grouped.into_values().collect();
    info!(
        roots = roots.len(),
        networks = networks.len(),
        assigned = assignment.len(),
        unassigned = unassigned.len(),
        dropped_joins = dropped_joins.len(),
        "delineated networks"
    );

    Delineation {
        networks,
        assignment,
        barrier_joins: merged,
        dropped_joins,
        unassigned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::BarrierKind;
    use crate::segment::{Join, Segment, SENTINEL};
    use geo::LineString;

    fn seg(id: SegmentId) -> Segment {
        Segment {
            id,
            source_id: id as u64,
            geometry: LineString::new(vec![]),
            length: 10.0,
            stream_order: 1,
            size_class: String::new(),
            is_loop: false,
        }
    }

    fn bj(barrier_id: u64, upstream_id: SegmentId, downstream_id: SegmentId) -> BarrierJoin {
        BarrierJoin { barrier_id, upstream_id, downstream_id, kind: BarrierKind::Dam }
    }

    fn graph(ids: &[SegmentId], joins: &[(SegmentId, SegmentId)]) -> AdjacencyGraph {
        let segments: Vec<Segment> = ids.iter().map(|&i| seg(i)).collect();
        let joins: Vec<Join> = joins.iter().map(|&(u, d)| Join::new(u, d)).collect();
        AdjacencyGraph::build(&segments, &joins).unwrap()
    }

    #[test]
    fn barrier_splits_chain_into_two_networks() {
        // 1 -> 2 -> 3 -> outlet; barrier between 2 and 3.
        let g = graph(&[1, 2, 3], &[(0, 1), (1, 2), (2, 3), (3, 0)]);
        let d = delineate_networks(&g, &[bj(100, 2, 3)]);

        assert_eq!(d.networks.len(), 2);
        assert_eq!(d.network(3).unwrap().members, vec![3]);
        assert_eq!(d.network(3).unwrap().origin, NetworkOrigin::Outlet);
        assert_eq!(d.network(2).unwrap().members, vec![1, 2]);
        assert_eq!(d.network(2).unwrap().origin, NetworkOrigin::Barrier);
        assert_eq!(d.network_of(1), Some(2));
        assert!(d.unassigned.is_empty());
    }

    #[test]
    fn confluence_barrier_roots_merge_under_first_root() {
        // A=1 -> C=3, B=2 -> C, C -> outlet; barrier on C's upstream end.
        let g = graph(&[1, 2, 3], &[(0, 1), (0, 2), (1, 3), (2, 3), (3, 0)]);
        let raw = vec![bj(7, 1, 3), bj(7, 2, 3)];
        let d = delineate_networks(&g, &raw);

        let merged = d.network(1).expect("canonical network 1");
        assert_eq!(merged.members, vec![1, 2]);
        assert_eq!(merged.roots, vec![1, 2]);
        assert!(d.network(2).is_none(), "non-canonical root must not be a network");
        assert_eq!(d.barrier_joins, vec![bj(7, 1, 3)]);
        assert_eq!(d.dropped_joins, vec![bj(7, 2, 3)]);
        assert_eq!(d.network_of(3), Some(3));
    }

    #[test]
    fn traversal_stops_at_upstream_barrier() {
        // 1 -> 2 -> 3 -> 4 -> outlet; barriers above 2 and above 4.
        let g = graph(&[1, 2, 3, 4], &[(1, 2), (2, 3), (3, 4), (4, 0)]);
        let d = delineate_networks(&g, &[bj(1, 1, 2), bj(2, 3, 4)]);

        assert_eq!(d.network(4).unwrap().members, vec![4]);
        assert_eq!(d.network(3).unwrap().members, vec![2, 3]);
        assert_eq!(d.network(1).unwrap().members, vec![1]);
    }

    #[test]
    fn unreachable_segments_are_reported() {
        // 5 -> 6 with no outlet edge.
        let g = graph(&[1, 5, 6], &[(1, 0), (5, 6)]);
        let d = delineate_networks(&g, &[]);
        assert_eq!(d.unassigned, vec![5, 6]);
        assert_eq!(d.assignment.len(), 1);
    }

    #[test]
    fn braided_loop_merges_overlapping_networks() {
        // Loop segment 1 drains into both 2 and 3; 2 and 3 are separate
        // outlets, so both walks reach 1.
        let mut segments: Vec<Segment> = [1, 2, 3].iter().map(|&i| seg(i)).collect();
        segments[0].is_loop = true;
        let joins = vec![Join::new(1, 2), Join::new(1, 3), Join::new(2, 0), Join::new(3, 0)];
        let g = AdjacencyGraph::build(&segments, &joins).unwrap();
        let d = delineate_networks(&g, &[]);

        assert_eq!(d.networks.len(), 1);
        assert_eq!(d.networks[0].id, 2);
        assert_eq!(d.networks[0].members, vec![1, 2, 3]);
    }

    #[test]
    fn outlet_barrier_root_is_enumerated_once() {
        let g = graph(&[1, 2], &[(1, 2), (2, 0)]);
        let d = delineate_networks(&g, &[bj(9, 2, SENTINEL)]);
        assert_eq!(d.networks.len(), 1);
        assert_eq!(d.networks[0].roots, vec![2]);
        assert_eq!(d.networks[0].origin, NetworkOrigin::Barrier);
        assert_eq!(d.barrier_joins.len(), 1);
    }

    #[test]
    fn delineation_is_idempotent() {
        let g = graph(
            &[1, 2, 3, 4, 5, 6],
            &[(1, 3), (2, 3), (3, 5), (4, 5), (5, 6), (6, 0)],
        );
        let raw = vec![bj(1, 1, 3), bj(1, 2, 3), bj(2, 5, 6)];
        let a = delineate_networks(&g, &raw);
        let b = delineate_networks(&g, &raw);
        assert_eq!(a.networks, b.networks);
        assert_eq!(a.assignment, b.assignment);
        assert_eq!(a.barrier_joins, b.barrier_joins);
    }
}
