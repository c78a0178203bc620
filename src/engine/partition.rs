//! Assigns every measurement to a grid zone or a path segment.

use crate::config::ZoneMode;
use crate::engine::cancel::CancelToken;
use crate::engine::types::{Measurement, PartitionKey, PlanarPoint, SegmentBoundary};
use crate::error::EngineError;
use std::collections::BTreeSet;
use tracing::debug;

/// Points walked between cancellation checks.
const CHECK_EVERY: usize = 10_000;

/// Result of the segment walk.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentWalk {
    /// Segment index per input point.
    pub indices: Vec<usize>,
    /// One boundary per segment, `boundaries[k].segment_index == k`.
    pub boundaries: Vec<SegmentBoundary>,
}

/// Walks an ordered path, cutting it into `cell_size`-long segments.
///
/// A point's segment is the number of whole segment lengths of cumulative
/// distance covered up to and including it. Each crossing of a segment
/// boundary records the interpolated crossing point as that segment's start;
/// one long step may cross several boundaries. Zero-length steps neither
/// advance the distance nor create boundaries.
pub fn walk_segments(
    points: &[PlanarPoint],
    cell_size: f64,
    tolerance: f64,
    cancel: &CancelToken,
) -> Result<SegmentWalk, EngineError> {
    let Some(first) = points.first() else {
        return Ok(SegmentWalk {
            indices: Vec::new(),
            boundaries: Vec::new(),
        });
    };

    let segment_of = |distance: f64| ((distance + tolerance) / cell_size).floor() as usize;

    let mut indices = Vec::with_capacity(points.len());
    let mut boundaries = vec![SegmentBoundary {
        segment_index: 0,
        start: *first,
    }];
    indices.push(0);

    let mut cumulative = 0.0;
    let mut prev = *first;
    for (i, point) in points.iter().enumerate().skip(1) {
        if i % CHECK_EVERY == 0 {
            cancel.check("segment walk")?;
        }

        let step = prev.distance_to(point);
        if step > 0.0 {
            let before = cumulative;
            cumulative += step;
            let prev_segment = segment_of(before);
            let new_segment = segment_of(cumulative);

            for k in (prev_segment + 1)..=new_segment {
                let fraction = ((k as f64 * cell_size - before) / step).clamp(0.0, 1.0);
                boundaries.push(SegmentBoundary {
                    segment_index: k,
                    start: prev.lerp(point, fraction),
                });
            }
            prev = *point;
        }
        indices.push(segment_of(cumulative));
    }

    debug!(
        points = points.len(),
        segments = boundaries.len(),
        path_length_m = cumulative,
        "Segment walk complete"
    );

    Ok(SegmentWalk {
        indices,
        boundaries,
    })
}

/// Partition assignment for a whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct Partitioning {
    pub mode: ZoneMode,
    pub cell_size: f64,
    /// Partition per measurement, same order as the input.
    pub keys: Vec<PartitionKey>,
    /// Segment starts; empty in grid modes.
    pub boundaries: Vec<SegmentBoundary>,
}

impl Partitioning {
    /// Planar coordinate shown for a partition: the cell centre or minimum
    /// corner in grid modes, the segment start in segment mode (falling back
    /// to the first point of the path).
    pub fn display_point(&self, key: &PartitionKey) -> Option<PlanarPoint> {
        match *key {
            PartitionKey::Zone { .. } => {
                let origin = key.origin(self.cell_size)?;
                match self.mode {
                    ZoneMode::GridCenter => Some(PlanarPoint::new(
                        origin.x + self.cell_size / 2.0,
                        origin.y + self.cell_size / 2.0,
                    )),
                    _ => Some(origin),
                }
            }
            PartitionKey::Segment { index } => self
                .boundaries
                .get(index)
                .or_else(|| self.boundaries.first())
                .map(|b| b.start),
        }
    }

    /// Every partition that exists conceptually: all observed zones, or every
    /// segment from 0 to the last one reached (including segments crossed
    /// without a measurement in them).
    pub fn universe(&self) -> Vec<PartitionKey> {
        match self.mode {
            ZoneMode::Segments => (0..self.boundaries.len())
                .map(|index| PartitionKey::Segment { index })
                .collect(),
            ZoneMode::GridCenter | ZoneMode::GridFirst => self
                .keys
                .iter()
                .copied()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        }
    }
}

/// Assigns partitions for all measurements according to `mode`.
#[tracing::instrument(skip(measurements, cancel), fields(measurements = measurements.len()))]
pub fn partition(
    measurements: &[Measurement],
    mode: ZoneMode,
    cell_size: f64,
    tolerance: f64,
    cancel: &CancelToken,
) -> Result<Partitioning, EngineError> {
    let points: Vec<PlanarPoint> = measurements.iter().map(Measurement::planar).collect();

    let (keys, boundaries) = match mode {
        ZoneMode::Segments => {
            let walk = walk_segments(&points, cell_size, tolerance, cancel)?;
            let keys = walk
                .indices
                .into_iter()
                .map(|index| PartitionKey::Segment { index })
                .collect();
            (keys, walk.boundaries)
        }
        ZoneMode::GridCenter | ZoneMode::GridFirst => {
            cancel.check("zoning")?;
            let keys = points
                .iter()
                .map(|p| PartitionKey::zone_for(p, cell_size))
                .collect();
            (keys, Vec::new())
        }
    };

    Ok(Partitioning {
        mode,
        cell_size,
        keys,
        boundaries,
    })
}
