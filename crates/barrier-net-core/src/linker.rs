//! Per-barrier upstream / downstream network metrics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::barrier::{BarrierId, BarrierJoin, BarrierKind};
use crate::network::{Delineation, NetworkId};
use crate::segment::SENTINEL;
use crate::stats::StatsOutput;

/// Network context of one barrier. Network ids are `0` where a side is the
/// sentinel or could not be resolved; the miles on that side are then zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierNetworkRecord {
    pub barrier_id: BarrierId,
    pub kind: BarrierKind,
    pub upstream_network: NetworkId,
    pub downstream_network: NetworkId,
    pub upstream_miles: f64,
    pub upstream_free_miles: f64,
    pub downstream_miles: f64,
    pub downstream_free_miles: f64,
    /// Miles reconnected if the barrier were removed.
    pub gain_miles: f64,
    pub free_gain_miles: f64,
}

/// Build one record per barrier in the merged table, ascending by barrier id.
/// A barrier with rows for several upstream branches keeps its first row.
pub fn link_barriers(delineation: &Delineation, stats: &StatsOutput) -> Vec<BarrierNetworkRecord> {
    let mut rows: BTreeMap<BarrierId, BarrierJoin> = BTreeMap::new();
    for row in &delineation.barrier_joins {
        rows.entry(row.barrier_id).or_insert(*row);
    }

    let miles = |id: NetworkId| {
        stats
            .get(id)
            .map_or((0.0, 0.0), |s| (s.total_miles(), s.free_miles()))
    };

    let records: Vec<BarrierNetworkRecord> = rows
        .into_values()
        .map(|row| {
            let resolved = row.upstream_id != SENTINEL;
            let upstream_network = if resolved && delineation.network(row.upstream_id).is_some() {
                row.upstream_id
            } else {
                SENTINEL
            };
            let downstream_network = if row.downstream_id == SENTINEL {
                SENTINEL
            } else {
                delineation.network_of(row.downstream_id).unwrap_or(SENTINEL)
            };

            let (upstream_miles, upstream_free_miles) = miles(upstream_network);
            let (downstream_miles, downstream_free_miles) = miles(downstream_network);

            BarrierNetworkRecord {
                barrier_id: row.barrier_id,
                kind: row.kind,
                upstream_network,
                downstream_network,
                upstream_miles,
                upstream_free_miles,
                downstream_miles,
                downstream_free_miles,
                gain_miles: upstream_miles.min(downstream_miles),
                free_gain_miles: upstream_free_miles.min(downstream_free_miles),
            }
        })
        .collect();

    debug!(barriers = records.len(), "linked barriers to networks");
    records
}
