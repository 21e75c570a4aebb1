use serde::{Deserialize, Serialize};

use geo::LineString;

/// Segment identifier. `0` is reserved as the head / outlet sentinel.
pub type SegmentId = u32;

/// Sentinel for "no upstream" (network head) or "no downstream" (outlet).
pub const SENTINEL: SegmentId = 0;

pub const METERS_PER_MILE: f64 = 1609.344;

pub fn meters_to_miles(m: f64) -> f64 {
    m / METERS_PER_MILE
}

pub fn meters_to_km(m: f64) -> f64 {
    m / 1000.0
}

/// A directed piece of the stream network between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    /// Original flowline id; unchanged when a segment is cut.
    pub source_id: u64,
    /// Vertex path, upstream end first.
    pub geometry: LineString<f64>,
    /// Length in metres.
    pub length: f64,
    pub stream_order: u8,
    /// Size class code (e.g. "1a", "2"). Empty when unknown.
    #[serde(default)]
    pub size_class: String,
    /// Segment belongs to a braided / looped channel.
    #[serde(default)]
    pub is_loop: bool,
}

/// Directed adjacency edge along the flow direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Join {
    pub upstream_id: SegmentId,
    pub downstream_id: SegmentId,
}

impl Join {
    pub fn new(upstream_id: SegmentId, downstream_id: SegmentId) -> Self {
        Self { upstream_id, downstream_id }
    }
}
