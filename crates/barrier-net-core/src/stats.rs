//! Per-network length and shape statistics.
//!
//! All lengths are metres; miles and kilometres are derived on output.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::barrier::{BarrierJoin, KindCounts};
use crate::config::AnalysisConfig;
use crate::geometry::vertex_distance;
use crate::graph::AdjacencyGraph;
use crate::network::{Delineation, Network, NetworkId, NetworkOrigin};
use crate::segment::{meters_to_km, meters_to_miles, Segment, SegmentId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub network_id: NetworkId,
    pub origin: NetworkOrigin,
    pub total_length: f64,
    /// Total minus loop members minus members directly below a bounding
    /// barrier selected by the free-flow policy.
    pub free_length: f64,
    pub loop_length: f64,
    pub mainstem_length: f64,
    /// Mainstem length over head-to-root straight-line distance; `0.0` when
    /// undefined (no non-loop root, or a distance below the epsilon).
    pub sinuosity: f64,
    /// Distinct non-empty size classes among members.
    pub size_classes: u32,
    pub segment_count: u32,
    /// Barriers bounding the network from upstream, by kind.
    pub upstream_barriers: KindCounts,
}

impl NetworkStats {
    pub fn total_miles(&self) -> f64 {
        meters_to_miles(self.total_length)
    }

    pub fn free_miles(&self) -> f64 {
        meters_to_miles(self.free_length)
    }

    pub fn total_km(&self) -> f64 {
        meters_to_km(self.total_length)
    }

    pub fn free_km(&self) -> f64 {
        meters_to_km(self.free_length)
    }
}

/// Output of [`aggregate_network_stats`].
#[derive(Debug, Clone, Default)]
pub struct StatsOutput {
    /// One row per network, ascending by id.
    pub stats: Vec<NetworkStats>,
    /// Networks whose sinuosity was undefined.
    pub degenerate: usize,
}

impl StatsOutput {
    pub fn get(&self, id: NetworkId) -> Option<&NetworkStats> {
        self.stats
            .binary_search_by_key(&id, |s| s.network_id)
            .ok()
            .map(|i| &self.stats[i])
    }
}

/// Compute statistics for every delineated network.
///
/// Uses the merged barrier-join table held by the delineation.
pub fn aggregate_network_stats(
    delineation: &Delineation,
    segments: &[Segment],
    graph: &AdjacencyGraph,
    config: &AnalysisConfig,
) -> StatsOutput {
    let by_id: HashMap<SegmentId, &Segment> = segments.iter().map(|s| (s.id, s)).collect();

    // Barrier rows keyed by the segment directly below them.
    let mut below: HashMap<SegmentId, Vec<&BarrierJoin>> = HashMap::new();
    for row in &delineation.barrier_joins {
        below.entry(row.downstream_id).or_default().push(row);
    }

    let mut degenerate = 0;
    let stats: Vec<NetworkStats> = delineation
        .networks
        .iter()
        .map(|network| {
            let (s, defined) = network_stats(network, &by_id, &below, graph, config);
            if !defined {
                degenerate += 1;
                warn!(network = network.id, "degenerate sinuosity, reporting 0");
            }
            s
        })
        .collect();

    debug!(networks = stats.len(), degenerate, "aggregated network stats");
    StatsOutput { stats, degenerate }
}

fn network_stats(
    network: &Network,
    by_id: &HashMap<SegmentId, &Segment>,
    below: &HashMap<SegmentId, Vec<&BarrierJoin>>,
    graph: &AdjacencyGraph,
    config: &AnalysisConfig,
) -> (NetworkStats, bool) {
    let mut total_length = 0.0;
    let mut loop_length = 0.0;
    let mut excluded_length = 0.0;
    let mut size_classes: BTreeSet<&str> = BTreeSet::new();
    let mut upstream_barriers = KindCounts::default();

    for id in &network.members {
        let Some(segment) = by_id.get(id) else { continue };
        total_length += segment.length;
        if !segment.size_class.is_empty() {
            size_classes.insert(segment.size_class.as_str());
        }
        if segment.is_loop {
            loop_length += segment.length;
        }

        let rows = below.get(id).map_or(&[][..], Vec::as_slice);
        for row in rows {
            upstream_barriers.add(row.kind);
        }
        if !segment.is_loop && rows.iter().any(|r| config.free_flow.excludes_below(r.kind)) {
            excluded_length += segment.length;
        }
    }

    let (mainstem_length, sinuosity) = mainstem(network, by_id, graph, config.degenerate_epsilon);

    let stats = NetworkStats {
        network_id: network.id,
        origin: network.origin,
        total_length,
        free_length: (total_length - loop_length - excluded_length).max(0.0),
        loop_length,
        mainstem_length,
        sinuosity: sinuosity.unwrap_or(0.0),
        size_classes: size_classes.len() as u32,
        segment_count: network.members.len() as u32,
        upstream_barriers,
    };
    (stats, sinuosity.is_some())
}

/// Longest path from any root of the network up to a head through non-loop
/// members. Returns `(length, sinuosity)`; sinuosity is `None` when no
/// root is eligible or the head-to-root distance is below `epsilon`.
fn mainstem(
    network: &Network,
    by_id: &HashMap<SegmentId, &Segment>,
    graph: &AdjacencyGraph,
    epsilon: f64,
) -> (f64, Option<f64>) {
    let members: HashSet<SegmentId> = network.members.iter().copied().collect();
    let roots: HashSet<SegmentId> = network.roots.iter().copied().collect();
    let length_of = |id: SegmentId| by_id.get(&id).map_or(0.0, |s| s.length);

    // segment -> (best path length from here to a head, head id)
    let mut best: HashMap<SegmentId, (f64, SegmentId)> = HashMap::new();
    let eligible = |id: SegmentId, from: SegmentId| {
        members.contains(&id) && !graph.is_loop(id) && !(roots.contains(&id) && id != from)
    };

    let mut top: Option<(f64, SegmentId, SegmentId)> = None; // (length, root, head)
    for &root in &network.roots {
        if graph.is_loop(root) || !members.contains(&root) {
            continue;
        }
        // Post-order walk; `true` marks a segment whose upstream side is done.
        let mut stack = vec![(root, false)];
        while let Some((id, done)) = stack.pop() {
            if best.contains_key(&id) {
                continue;
            }
            let ups = graph.upstream(id).iter().copied().filter(|&u| eligible(u, root));
            if done {
                let mut pick: Option<(f64, SegmentId)> = None;
                for u in ups {
                    if let Some(&(len, head)) = best.get(&u) {
                        if pick.map_or(true, |(l, _)| len > l) {
                            pick = Some((len, head));
                        }
                    }
                }
                let (up_len, head) = pick.unwrap_or((0.0, id));
                best.insert(id, (length_of(id) + up_len, head));
            } else {
                stack.push((id, true));
                stack.extend(ups.filter(|u| !best.contains_key(u)).map(|u| (u, false)));
            }
        }
        if let Some(&(len, head)) = best.get(&root) {
            if top.map_or(true, |(l, _, _)| len > l) {
                top = Some((len, root, head));
            }
        }
    }

    let Some((length, root, head)) = top else {
        return (0.0, None);
    };
    let start = by_id.get(&head).and_then(|s| s.geometry.0.first());
    let end = by_id.get(&root).and_then(|s| s.geometry.0.last());
    let distance = match (start, end) {
        (Some(&a), Some(&b)) => vertex_distance(a, b),
        _ => 0.0,
    };
    if distance < epsilon {
        return (length, None);
    }
    (length, Some(length / distance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::BarrierKind;
    use crate::config::FreeFlowPolicy;
    use crate::geometry::path_length;
    use crate::network::delineate_networks;
    use crate::segment::Join;
    use approx::assert_relative_eq;
    use geo::LineString;

    fn seg(id: SegmentId, points: &[(f64, f64)], size_class: &str, is_loop: bool) -> Segment {
        let geometry = LineString::from(points.to_vec());
        Segment {
            id,
            source_id: id as u64,
            length: path_length(&geometry),
            geometry,
            stream_order: 1,
            size_class: size_class.into(),
            is_loop,
        }
    }

    fn bj(barrier_id: u64, upstream_id: SegmentId, downstream_id: SegmentId, kind: BarrierKind) -> BarrierJoin {
        BarrierJoin { barrier_id, upstream_id, downstream_id, kind }
    }

    fn run(segments: &[Segment], joins: &[Join], raw: &[BarrierJoin], config: &AnalysisConfig) -> StatsOutput {
        let graph = AdjacencyGraph::build(segments, joins).unwrap();
        let delineation = delineate_networks(&graph, raw);
        aggregate_network_stats(&delineation, segments, &graph, config)
    }

    #[test]
    fn straight_chain_has_unit_sinuosity() {
        let segments = vec![
            seg(1, &[(0.0, 200.0), (0.0, 100.0)], "1a", false),
            seg(2, &[(0.0, 100.0), (0.0, 0.0)], "1b", false),
        ];
        let joins = vec![Join::new(0, 1), Join::new(1, 2), Join::new(2, 0)];
        let out = run(&segments, &joins, &[], &AnalysisConfig::default());

        let s = out.get(2).unwrap();
        assert_relative_eq!(s.total_length, 200.0);
        assert_relative_eq!(s.free_length, 200.0);
        assert_relative_eq!(s.mainstem_length, 200.0);
        assert_relative_eq!(s.sinuosity, 1.0, epsilon = 1e-12);
        assert_eq!(s.size_classes, 2);
        assert_eq!(s.segment_count, 2);
        assert_eq!(out.degenerate, 0);
    }

    #[test]
    fn mainstem_follows_longest_branch() {
        // Short branch 1 and long winding branch 2 join at 3.
        let segments = vec![
            seg(1, &[(-10.0, 10.0), (0.0, 0.0)], "", false),
            seg(2, &[(0.0, 100.0), (30.0, 50.0), (0.0, 0.0)], "", false),
            seg(3, &[(0.0, 0.0), (0.0, -50.0)], "", false),
        ];
        let joins = vec![Join::new(1, 3), Join::new(2, 3), Join::new(3, 0)];
        let out = run(&segments, &joins, &[], &AnalysisConfig::default());

        let s = out.get(3).unwrap();
        let expected = segments[1].length + segments[2].length;
        assert_relative_eq!(s.mainstem_length, expected, epsilon = 1e-9);
        assert_relative_eq!(s.sinuosity, expected / 150.0, epsilon = 1e-9);
        assert!(s.sinuosity > 1.0, "winding branch must be sinuous: {}", s.sinuosity);
    }

    #[test]
    fn upstream_barriers_counted_by_kind() {
        // 1 -> 3, 2 -> 3, 3 -> 4 -> outlet; dam above 3 on branch 1,
        // waterfall above 4.
        let segments = vec![
            seg(1, &[(0.0, 30.0), (0.0, 20.0)], "", false),
            seg(2, &[(5.0, 30.0), (0.0, 20.0)], "", false),
            seg(3, &[(0.0, 20.0), (0.0, 10.0)], "", false),
            seg(4, &[(0.0, 10.0), (0.0, 0.0)], "", false),
        ];
        let joins = vec![Join::new(1, 3), Join::new(2, 3), Join::new(3, 4), Join::new(4, 0)];
        let raw = vec![bj(1, 1, 3, BarrierKind::Dam), bj(2, 3, 4, BarrierKind::Waterfall)];
        let out = run(&segments, &joins, &raw, &AnalysisConfig::default());

        assert_eq!(out.get(4).unwrap().upstream_barriers.waterfalls, 1);
        let mid = out.get(3).unwrap();
        assert_eq!(mid.upstream_barriers.dams, 1);
        assert_eq!(mid.upstream_barriers.total(), 1);
        assert_eq!(mid.segment_count, 2);
        // Segment 3 sits directly below the dam.
        assert_relative_eq!(mid.free_length, segments[1].length);
    }

    #[test]
    fn free_flow_policy_filters_kinds() {
        let segments = vec![
            seg(1, &[(0.0, 20.0), (0.0, 10.0)], "", false),
            seg(2, &[(0.0, 10.0), (0.0, 0.0)], "", false),
            seg(3, &[(0.0, 0.0), (0.0, -10.0)], "", false),
        ];
        let joins = vec![Join::new(1, 2), Join::new(2, 3), Join::new(3, 0)];
        let raw = vec![bj(1, 1, 2, BarrierKind::SmallBarrier), bj(2, 2, 3, BarrierKind::Dam)];
        let config = AnalysisConfig {
            free_flow: FreeFlowPolicy::Kinds(vec![BarrierKind::Dam]),
            ..AnalysisConfig::default()
        };
        let out = run(&segments, &joins, &raw, &config);

        // Segment 2 is below a small barrier only: stays free.
        let s = out.get(2).unwrap();
        assert_relative_eq!(s.free_length, s.total_length);
        // Segment 3 is below a dam: excluded.
        assert_relative_eq!(out.get(3).unwrap().free_length, 0.0);
    }

    #[test]
    fn loop_reduces_free_length_without_division_error() {
        // Loop 1 feeds loop 2 and main 3, which rejoin at 4. The mainstem
        // 3 -> 4 starts and ends at the origin.
        let segments = vec![
            seg(1, &[(-5.0, 5.0), (0.0, 0.0)], "", true),
            seg(2, &[(0.0, 0.0), (10.0, 0.0)], "", true),
            seg(3, &[(0.0, 0.0), (10.0, 0.0)], "", false),
            seg(4, &[(10.0, 0.0), (0.0, 0.0)], "", false),
        ];
        let joins = vec![Join::new(1, 2), Join::new(1, 3), Join::new(2, 4), Join::new(3, 4), Join::new(4, 0)];
        let out = run(&segments, &joins, &[], &AnalysisConfig::default());

        let s = out.get(4).unwrap();
        assert!(s.free_length < s.total_length, "{} !< {}", s.free_length, s.total_length);
        assert_relative_eq!(s.loop_length, segments[0].length + segments[1].length);
        assert_eq!(s.sinuosity, 0.0);
        assert!(s.sinuosity.is_finite());
        assert_eq!(out.degenerate, 1);
    }

    #[test]
    fn loop_only_and_single_point_networks_are_degenerate() {
        // 1 is a loop draining straight to an outlet; 2 is a one-vertex
        // segment draining to another outlet.
        let segments = vec![
            seg(1, &[(0.0, 10.0), (0.0, 0.0)], "", true),
            seg(2, &[(50.0, 0.0)], "", false),
        ];
        let joins = vec![Join::new(1, 0), Join::new(2, 0)];
        let out = run(&segments, &joins, &[], &AnalysisConfig::default());

        let looped = out.get(1).unwrap();
        assert_eq!(looped.mainstem_length, 0.0);
        assert_eq!(looped.sinuosity, 0.0);
        assert_eq!(out.get(2).unwrap().sinuosity, 0.0);
        assert_eq!(out.degenerate, 2);
    }

    #[test]
    fn miles_and_km_conversions() {
        let segments = vec![seg(1, &[(0.0, 0.0), (1609.344, 0.0)], "", false)];
        let out = run(&segments, &[Join::new(1, 0)], &[], &AnalysisConfig::default());
        let s = out.get(1).unwrap();
        assert_relative_eq!(s.total_miles(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(s.total_km(), 1.609344, epsilon = 1e-12);
    }
}
