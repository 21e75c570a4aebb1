//! Barrier network delineation and statistics.
//!
//! Cuts flowlines at barriers, rebuilds the join graph, delineates the
//! networks bounded by barriers and network heads, and computes per-network
//! and per-barrier length metrics.
pub mod barrier;
pub mod config;
pub mod cut;
pub mod error;
pub mod geometry;
pub mod graph;
pub mod linker;
pub mod network;
pub mod pipeline;
pub mod segment;
pub mod stats;

pub use barrier::{Barrier, BarrierId, BarrierJoin, BarrierKind, BarrierPosition, KindCounts};
pub use config::{AnalysisConfig, FreeFlowPolicy, NetworkType};
pub use error::{NetworkError, Result};
pub use geo::{Coord, LineString};
pub use linker::BarrierNetworkRecord;
pub use network::{NetworkId, NetworkOrigin};
pub use pipeline::{analyze_region, NetworkSegment, RegionInput, RegionOutput, RegionSummary};
pub use segment::{Join, Segment, SegmentId, SENTINEL};
pub use stats::NetworkStats;

#[cfg(feature = "threading")]
pub use pipeline::analyze_regions;
