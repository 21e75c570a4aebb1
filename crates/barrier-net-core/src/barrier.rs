use std::fmt;

use geo::Coord;
use serde::{Deserialize, Serialize};

use crate::segment::SegmentId;

pub type BarrierId = u64;

/// Kind of point obstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierKind {
    Waterfall,
    Dam,
    SmallBarrier,
}

impl BarrierKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BarrierKind::Waterfall => "waterfall",
            BarrierKind::Dam => "dam",
            BarrierKind::SmallBarrier => "small_barrier",
        }
    }
}

impl fmt::Display for BarrierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a barrier sits on its snapped segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierPosition {
    /// Fraction of the segment length from its upstream end, in [0, 1].
    Fraction(f64),
    /// Snapped point on (or near) the segment path.
    Point(Coord<f64>),
}

/// A barrier snapped onto the flowline network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Barrier {
    pub id: BarrierId,
    pub kind: BarrierKind,
    pub segment_id: SegmentId,
    pub position: BarrierPosition,
    /// Region key (e.g. HUC2 code) used to select barriers for a region group.
    #[serde(default)]
    pub region: String,
}

/// Segments immediately upstream and downstream of a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BarrierJoin {
    pub barrier_id: BarrierId,
    pub upstream_id: SegmentId,
    pub downstream_id: SegmentId,
    pub kind: BarrierKind,
}

/// Barrier counts per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    pub dams: u32,
    pub waterfalls: u32,
    pub small_barriers: u32,
}

impl KindCounts {
    pub fn add(&mut self, kind: BarrierKind) {
        match kind {
            BarrierKind::Dam => self.dams += 1,
            BarrierKind::Waterfall => self.waterfalls += 1,
            BarrierKind::SmallBarrier => self.small_barriers += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.dams + self.waterfalls + self.small_barriers
    }
}
