//! Cutting flowline segments at barrier positions.
//!
//! A barrier in the interior of a segment retires the segment id and
//! replaces it with child segments split at the barrier. A barrier on a
//! segment end references the existing adjacent segments instead. After all
//! cuts, every join that referenced a retired parent is rewritten to the
//! matching end child.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use crate::barrier::{Barrier, BarrierId, BarrierJoin, BarrierKind, BarrierPosition};
use crate::config::AnalysisConfig;
use crate::error::{NetworkError, Result};
use crate::geometry::{self, path_length, split_at};
use crate::segment::{Join, Segment, SegmentId, SENTINEL};

/// Where a barrier landed on its segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// On the upstream end: the barrier sits between the segment and
    /// everything flowing into it.
    UpstreamEnd,
    /// On the downstream end: between the segment and its downstream.
    DownstreamEnd,
    /// At an interior cut, between two children.
    Between { upstream: SegmentId, downstream: SegmentId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierPlacement {
    pub barrier_id: BarrierId,
    pub kind: BarrierKind,
    pub placement: Placement,
}

/// Result of cutting a single segment.
#[derive(Debug, Clone)]
pub struct SegmentCut {
    /// Children ordered upstream to downstream. A single element holding the
    /// original segment when no interior cut was made.
    pub children: Vec<Segment>,
    /// Endpoint placements first, then interior ones in cut order.
    pub placements: Vec<BarrierPlacement>,
}

impl SegmentCut {
    pub fn is_split(&self) -> bool {
        self.children.len() > 1
    }
}

/// Post-cut tables for a region.
#[derive(Debug, Clone, Default)]
pub struct CutResult {
    pub segments: Vec<Segment>,
    pub joins: Vec<Join>,
    /// One row per (barrier, upstream candidate); several rows for a barrier
    /// placed on the upstream end of a confluence.
    pub barrier_joins: Vec<BarrierJoin>,
    /// Number of parent segments that were replaced by children.
    pub cut_segments: usize,
}

/// Splits segments at barrier positions, allocating child ids above the
/// largest id seen in the input.
pub struct SegmentCutter {
    tolerance: f64,
    last_id: SegmentId,
}

impl SegmentCutter {
    pub fn new(config: &AnalysisConfig, max_existing_id: SegmentId) -> Self {
        Self {
            tolerance: config.endpoint_tolerance.max(0.0),
            last_id: max_existing_id,
        }
    }

    fn allocate_id(&mut self, parent: SegmentId) -> Result<SegmentId> {
        self.last_id = self
            .last_id
            .checked_add(1)
            .ok_or(NetworkError::SegmentIdsExhausted { parent })?;
        Ok(self.last_id)
    }

    /// Cut one segment at the given barriers.
    pub fn cut_segment(&mut self, segment: &Segment, barriers: &[&Barrier]) -> Result<SegmentCut> {
        let geom_len = path_length(&segment.geometry);

        // (distance along, barrier id, kind) for barriers off the segment ends.
        let mut interior: Vec<(f64, BarrierId, BarrierKind)> = Vec::new();
        let mut placements = Vec::with_capacity(barriers.len());

        for barrier in barriers {
            let distance = barrier_distance(segment, barrier, geom_len)?;
            let end = if geom_len <= 0.0 {
                Some(Placement::DownstreamEnd)
            } else if distance <= self.tolerance {
                Some(Placement::UpstreamEnd)
            } else if distance >= geom_len - self.tolerance {
                Some(Placement::DownstreamEnd)
            } else {
                None
            };
            match end {
                Some(placement) => placements.push(BarrierPlacement {
                    barrier_id: barrier.id,
                    kind: barrier.kind,
                    placement,
                }),
                None => interior.push((distance, barrier.id, barrier.kind)),
            }
        }

        if interior.is_empty() {
            return Ok(SegmentCut { children: vec![segment.clone()], placements });
        }

        interior.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        // Coincident barriers share one cut point.
        let mut cuts: Vec<f64> = Vec::new();
        let mut cut_index: Vec<(BarrierId, BarrierKind, usize)> = Vec::with_capacity(interior.len());
        for &(distance, id, kind) in &interior {
            match cuts.last() {
                Some(&last) if distance - last <= self.tolerance => {}
                _ => cuts.push(distance),
            }
            cut_index.push((id, kind, cuts.len() - 1));
        }

        let pieces = split_at(&segment.geometry, &cuts);
        let mut children: Vec<Segment> = Vec::with_capacity(pieces.len());
        for piece in pieces {
            children.push(Segment {
                id: self.allocate_id(segment.id)?,
                source_id: segment.source_id,
                length: segment.length * path_length(&piece) / geom_len,
                geometry: piece,
                stream_order: segment.stream_order,
                size_class: segment.size_class.clone(),
                is_loop: segment.is_loop,
            });
        }

        for (barrier_id, kind, i) in cut_index {
            placements.push(BarrierPlacement {
                barrier_id,
                kind,
                placement: Placement::Between { upstream: children[i].id, downstream: children[i + 1].id },
            });
        }

        debug!(segment = segment.id, children = children.len(), "cut segment");
        Ok(SegmentCut { children, placements })
    }
}

fn barrier_distance(segment: &Segment, barrier: &Barrier, geom_len: f64) -> Result<f64> {
    match barrier.position {
        BarrierPosition::Fraction(f) => {
            if !f.is_finite() || !(0.0..=1.0).contains(&f) {
                return Err(NetworkError::InvalidPosition {
                    barrier: barrier.id,
                    reason: format!("fraction {f} outside [0, 1]"),
                });
            }
            Ok(f * geom_len)
        }
        BarrierPosition::Point(p) => {
            geometry::distance_along(&segment.geometry, p).ok_or_else(|| NetworkError::InvalidPosition {
                barrier: barrier.id,
                reason: format!("segment {} has no geometry", segment.id),
            })
        }
    }
}

/// Cut every segment that carries barriers and rewrite the join table.
///
/// Segments are processed in ascending id order so child ids are
/// deterministic for a given input.
pub fn cut_flowlines(
    segments: &[Segment],
    joins: &[Join],
    barriers: &[Barrier],
    config: &AnalysisConfig,
) -> Result<CutResult> {
    let mut by_id: BTreeMap<SegmentId, &Segment> = BTreeMap::new();
    for s in segments {
        if s.id == SENTINEL || by_id.insert(s.id, s).is_some() {
            return Err(NetworkError::DuplicateSegment(s.id));
        }
    }

    let mut on_segment: HashMap<SegmentId, Vec<&Barrier>> = HashMap::new();
    for b in barriers {
        if !by_id.contains_key(&b.segment_id) {
            return Err(NetworkError::UnknownBarrierSegment { barrier: b.id, segment: b.segment_id });
        }
        on_segment.entry(b.segment_id).or_default().push(b);
    }
    for list in on_segment.values_mut() {
        list.sort_by_key(|b| b.id);
    }

    let max_id = by_id.keys().next_back().copied().unwrap_or(SENTINEL);
    let mut cutter = SegmentCutter::new(config, max_id);

    let mut out_segments = Vec::with_capacity(segments.len());
    // parent id -> (first child, last child)
    let mut replaced: HashMap<SegmentId, (SegmentId, SegmentId)> = HashMap::new();
    let mut internal_joins = Vec::new();
    let mut endpoint_placements: Vec<(SegmentId, BarrierPlacement)> = Vec::new();
    let mut barrier_joins = Vec::new();

    for (&id, segment) in &by_id {
        let Some(list) = on_segment.get(&id) else {
            out_segments.push((*segment).clone());
            continue;
        };

        let cut = cutter.cut_segment(segment, list)?;
        if cut.is_split() {
            let first = cut.children[0].id;
            let last = cut.children[cut.children.len() - 1].id;
            replaced.insert(id, (first, last));
            internal_joins.extend(cut.children.windows(2).map(|w| Join::new(w[0].id, w[1].id)));
        }

        for p in cut.placements {
            match p.placement {
                Placement::Between { upstream, downstream } => barrier_joins.push(BarrierJoin {
                    barrier_id: p.barrier_id,
                    upstream_id: upstream,
                    downstream_id: downstream,
                    kind: p.kind,
                }),
                _ => endpoint_placements.push((id, p)),
            }
        }
        out_segments.extend(cut.children);
    }

    let mut out_joins: Vec<Join> = joins
        .iter()
        .map(|j| {
            let upstream_id = replaced.get(&j.upstream_id).map_or(j.upstream_id, |r| r.1);
            let downstream_id = replaced.get(&j.downstream_id).map_or(j.downstream_id, |r| r.0);
            Join::new(upstream_id, downstream_id)
        })
        .chain(internal_joins)
        .collect();
    out_joins.sort();
    out_joins.dedup();

    // Endpoint barriers resolve against the rewritten joins.
    let mut upstream_of: HashMap<SegmentId, Vec<SegmentId>> = HashMap::new();
    let mut downstream_of: HashMap<SegmentId, Vec<SegmentId>> = HashMap::new();
    for j in &out_joins {
        if j.upstream_id != SENTINEL {
            upstream_of.entry(j.downstream_id).or_default().push(j.upstream_id);
        }
        if j.downstream_id != SENTINEL {
            downstream_of.entry(j.upstream_id).or_default().push(j.downstream_id);
        }
    }

    for (parent, BarrierPlacement { barrier_id, kind, placement }) in endpoint_placements {
        let (first, last) = replaced.get(&parent).copied().unwrap_or((parent, parent));
        match placement {
            Placement::UpstreamEnd => {
                let upstream = upstream_of.get(&first).cloned().unwrap_or_default();
                if upstream.is_empty() {
                    barrier_joins.push(BarrierJoin { barrier_id, upstream_id: SENTINEL, downstream_id: first, kind });
                }
                for upstream_id in upstream {
                    barrier_joins.push(BarrierJoin { barrier_id, upstream_id, downstream_id: first, kind });
                }
            }
            Placement::DownstreamEnd => {
                let downstream_id = downstream_of
                    .get(&last)
                    .and_then(|d| d.iter().min().copied())
                    .unwrap_or(SENTINEL);
                barrier_joins.push(BarrierJoin { barrier_id, upstream_id: last, downstream_id, kind });
            }
            // Interior placements were resolved while cutting.
            Placement::Between { .. } => {}
        }
    }
    barrier_joins.sort();

    info!(
        cut = replaced.len(),
        segments_in = segments.len(),
        segments_out = out_segments.len(),
        barrier_joins = barrier_joins.len(),
        "cut flowlines at barriers"
    );

    Ok(CutResult {
        segments: out_segments,
        joins: out_joins,
        barrier_joins,
        cut_segments: replaced.len(),
    })
}
