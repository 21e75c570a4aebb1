//! Structural errors that abort processing of a region group.
//!
//! Recoverable conditions (unreachable segments, dangling barrier joins,
//! degenerate statistics) are not errors: they are counted in
//! [`RegionSummary`](crate::pipeline::RegionSummary) and logged.

use crate::segment::SegmentId;

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// A non-loop segment has more than one outgoing join.
    #[error("segment {segment} has {count} downstream joins (expected at most 1)")]
    MultipleDownstream { segment: SegmentId, count: usize },

    /// A join references a segment id that is not in the segment table.
    #[error("join {upstream} -> {downstream} references unknown segment {missing}")]
    UnknownSegment {
        upstream: SegmentId,
        downstream: SegmentId,
        missing: SegmentId,
    },

    /// A barrier is snapped to a segment id that is not in the segment table.
    #[error("barrier {barrier} references unknown segment {segment}")]
    UnknownBarrierSegment { barrier: u64, segment: SegmentId },

    /// Two input segments share an id, or an id uses the `0` sentinel.
    #[error("duplicate or reserved segment id {0}")]
    DuplicateSegment(SegmentId),

    /// A barrier position cannot be placed on its segment.
    #[error("barrier {barrier} has invalid position: {reason}")]
    InvalidPosition { barrier: u64, reason: String },

    /// Cutting a segment needs a child id beyond `u32::MAX`.
    #[error("no segment ids left for children of segment {parent}")]
    SegmentIdsExhausted { parent: SegmentId },
}

/// Result alias for network analysis operations.
pub type Result<T> = std::result::Result<T, NetworkError>;
