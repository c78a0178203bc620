//! Data types shared by the zoning pipeline stages.

use crate::engine::utility::{compare_numeric_text, format_int_like};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// A point in the planar metric CRS (metres).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlanarPoint {
    pub x: f64,
    pub y: f64,
}

impl PlanarPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &PlanarPoint) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Point at `fraction` of the way from `self` to `other`.
    pub fn lerp(&self, other: &PlanarPoint, fraction: f64) -> PlanarPoint {
        PlanarPoint {
            x: self.x + (other.x - self.x) * fraction,
            y: self.y + (other.y - self.y) * fraction,
        }
    }
}

/// A point in the geographic CRS (degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

/// Carrier network identity. MCC and MNC are stored int-like normalized, so
/// `"231"/"01"` and `"231.0"/"1"` are the same operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OperatorKey {
    pub mcc: String,
    pub mnc: String,
}

impl OperatorKey {
    pub fn new(mcc: &str, mnc: &str) -> Self {
        Self {
            mcc: format_int_like(mcc),
            mnc: format_int_like(mnc),
        }
    }
}

impl Ord for OperatorKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_numeric_text(&self.mcc, &other.mcc)
            .then_with(|| compare_numeric_text(&self.mnc, &other.mnc))
    }
}

impl PartialOrd for OperatorKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for OperatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.mcc, self.mnc)
    }
}

/// Which zone or path segment a measurement belongs to.
///
/// Zones are addressed by grid index; the metric cell coordinate of a zone is
/// `index * cell_size` (see [`PartitionKey::origin`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PartitionKey {
    Zone { col: i64, row: i64 },
    Segment { index: usize },
}

impl PartitionKey {
    /// Grid cell containing the planar point.
    pub fn zone_for(point: &PlanarPoint, cell_size: f64) -> Self {
        PartitionKey::Zone {
            col: (point.x / cell_size).floor() as i64,
            row: (point.y / cell_size).floor() as i64,
        }
    }

    /// Minimum corner of a zone in metres. `None` for segments, whose origin
    /// lives in the boundary table.
    pub fn origin(&self, cell_size: f64) -> Option<PlanarPoint> {
        match *self {
            PartitionKey::Zone { col, row } => Some(PlanarPoint::new(
                col as f64 * cell_size,
                row as f64 * cell_size,
            )),
            PartitionKey::Segment { .. } => None,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Zone { col, row } => write!(f, "zone_{}_{}", col, row),
            PartitionKey::Segment { index } => write!(f, "segment_{}", index),
        }
    }
}

/// One usable input row with its derived planar coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub lon: f64,
    pub lat: f64,
    pub x: f64,
    pub y: f64,
    pub rsrp: f64,
    pub sinr: Option<f64>,
    pub carrier_id: String,
    pub operator: OperatorKey,
    pub pci: Option<String>,
    pub source_row: usize,
    /// Index of the originating record in the row source.
    pub record: usize,
}

impl Measurement {
    pub fn planar(&self) -> PlanarPoint {
        PlanarPoint::new(self.x, self.y)
    }
}

/// Start of a path segment, recorded while walking the ordered path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SegmentBoundary {
    pub segment_index: usize,
    pub start: PlanarPoint,
}

/// Binary coverage verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Coverage {
    Good,
    Bad,
}

/// How a [`PartitionStat`] came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatOrigin {
    Measured,
    /// Sentinel for an observed operator missing from this partition.
    Backfilled,
    /// Sentinel for an operator supplied by the caller.
    ExtraOperator,
}

/// Aggregate for one (partition, operator) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionStat {
    pub partition: PartitionKey,
    pub operator: OperatorKey,
    pub rsrp_avg: f64,
    pub sinr_avg: Option<f64>,
    /// Every usable measurement of the operator in this partition, across all
    /// carriers. The means and `source_rows` cover the chosen group only.
    pub count: usize,
    pub chosen_carrier: Option<String>,
    pub chosen_pci: Option<String>,
    pub all_carriers_seen: BTreeSet<String>,
    pub source_rows: Vec<usize>,
    /// Display coordinate in the planar CRS.
    pub representative: PlanarPoint,
    /// Display coordinate converted back to lon/lat.
    pub position: Option<GeoPoint>,
    pub coverage: Coverage,
    /// Record whose non-derived columns fill the output row.
    pub template_record: Option<usize>,
    pub origin: StatOrigin,
}

impl PartitionStat {
    pub fn is_sentinel(&self) -> bool {
        self.origin != StatOrigin::Measured
    }
}
