//! Region pipeline: barrier selection → cut → adjacency → delineation →
//! statistics → barrier linking.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::barrier::{Barrier, BarrierJoin};
use crate::config::AnalysisConfig;
use crate::cut::cut_flowlines;
use crate::error::Result;
use crate::graph::AdjacencyGraph;
use crate::linker::{link_barriers, BarrierNetworkRecord};
use crate::network::{delineate_networks, NetworkId};
use crate::segment::{Join, Segment, SegmentId};
use crate::stats::{aggregate_network_stats, NetworkStats};

// ── Inputs and outputs ────────────────────────────────────────────────────────

/// Tables for one region group.
#[derive(Debug, Clone, Default)]
pub struct RegionInput {
    pub segments: Vec<Segment>,
    pub joins: Vec<Join>,
    pub barriers: Vec<Barrier>,
}

/// Recovered conditions and sizes for one region group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSummary {
    pub barriers_in: usize,
    pub barriers_used: usize,
    pub barriers_on_loops: usize,
    pub barriers_excluded_by_kind: usize,
    pub cut_segments: usize,
    pub networks: usize,
    pub unreachable_segments: usize,
    pub dangling_barrier_joins: usize,
    pub degenerate_networks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSegment {
    pub segment_id: SegmentId,
    pub network_id: NetworkId,
}

#[derive(Debug, Clone)]
pub struct RegionOutput {
    /// Post-cut segments, ascending by id.
    pub segments: Vec<Segment>,
    pub joins: Vec<Join>,
    /// Barrier joins as cut, before merging.
    pub raw_barrier_joins: Vec<BarrierJoin>,
    /// One row per barrier, upstream ids rewritten to network ids.
    pub barrier_joins: Vec<BarrierJoin>,
    pub network_segments: Vec<NetworkSegment>,
    pub network_stats: Vec<NetworkStats>,
    pub barrier_networks: Vec<BarrierNetworkRecord>,
    pub summary: RegionSummary,
}

// ── Barrier selection ─────────────────────────────────────────────────────────

/// Barriers that participate in a run, plus how many were dropped for being
/// on a loop and for having a kind outside the network type.
pub fn select_barriers(
    barriers: &[Barrier],
    segments: &[Segment],
    config: &AnalysisConfig,
) -> (Vec<Barrier>, usize, usize) {
    let loops: HashSet<SegmentId> = segments.iter().filter(|s| s.is_loop).map(|s| s.id).collect();
    let mut on_loops = 0;
    let mut excluded = 0;

    let selected = barriers
        .iter()
        .filter(|b| {
            if !config.network_type.includes(b.kind) {
                excluded += 1;
                return false;
            }
            if config.drop_loop_barriers && loops.contains(&b.segment_id) {
                on_loops += 1;
                warn!(barrier = b.id, segment = b.segment_id, "dropping barrier on loop segment");
                return false;
            }
            true
        })
        .cloned()
        .collect();
    (selected, on_loops, excluded)
}

// ── Public entry point ────────────────────────────────────────────────────────

/// Run every stage for one region group.
///
/// Structural errors abort the group; recovered conditions are counted in
/// [`RegionSummary`].
pub fn analyze_region(input: &RegionInput, config: &AnalysisConfig) -> Result<RegionOutput> {
    let (barriers, on_loops, excluded) = select_barriers(&input.barriers, &input.segments, config);

    let cut = cut_flowlines(&input.segments, &input.joins, &barriers, config)?;
    let graph = AdjacencyGraph::build(&cut.segments, &cut.joins)?;
    let delineation = delineate_networks(&graph, &cut.barrier_joins);
    let stats = aggregate_network_stats(&delineation, &cut.segments, &graph, config);
    let barrier_networks = link_barriers(&delineation, &stats);

    let summary = RegionSummary {
        barriers_in: input.barriers.len(),
        barriers_used: barriers.len(),
        barriers_on_loops: on_loops,
        barriers_excluded_by_kind: excluded,
        cut_segments: cut.cut_segments,
        networks: delineation.networks.len(),
        unreachable_segments: delineation.unassigned.len(),
        dangling_barrier_joins: delineation.dropped_joins.len(),
        degenerate_networks: stats.degenerate,
    };
    info!(
        network_type = config.network_type.as_str(),
        barriers = summary.barriers_used,
        networks = summary.networks,
        unreachable = summary.unreachable_segments,
        dangling = summary.dangling_barrier_joins,
        degenerate = summary.degenerate_networks,
        "region analysed"
    );

    let network_segments = delineation
        .assignment
        .iter()
        .map(|(&segment_id, &network_id)| NetworkSegment { segment_id, network_id })
        .collect();

    let mut segments = cut.segments;
    segments.sort_by_key(|s| s.id);

    Ok(RegionOutput {
        segments,
        joins: cut.joins,
        raw_barrier_joins: cut.barrier_joins,
        barrier_joins: delineation.barrier_joins,
        network_segments,
        network_stats: stats.stats,
        barrier_networks,
        summary,
    })
}

/// Analyse independent region groups in parallel. Results keep input order.
#[cfg(feature = "threading")]
pub fn analyze_regions(inputs: &[RegionInput], config: &AnalysisConfig) -> Vec<Result<RegionOutput>> {
    use rayon::prelude::*;
    inputs.par_iter().map(|input| analyze_region(input, config)).collect()
}
