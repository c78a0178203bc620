use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::engine::types::{Coverage, PartitionKey, PartitionStat};

/// Bounding box of the occupied grid cells, in planar metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridExtent {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    /// Width including the last cell.
    pub range_x_m: f64,
    pub range_y_m: f64,
    /// Cells a full bounding box would hold.
    pub theoretical_zones: f64,
    /// Occupied share of the bounding box.
    pub coverage_percent: Option<f64>,
}

impl GridExtent {
    /// Extent of the zones in `stats`. `None` when there are no zones.
    pub fn from_stats(stats: &[PartitionStat], cell_size: f64) -> Option<Self> {
        let zones: BTreeSet<PartitionKey> = stats
            .iter()
            .map(|s| s.partition)
            .filter(|p| matches!(p, PartitionKey::Zone { .. }))
            .collect();
        let origins: Vec<_> = zones.iter().filter_map(|z| z.origin(cell_size)).collect();
        if origins.is_empty() {
            return None;
        }

        let min_x = origins.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let max_x = origins.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
        let min_y = origins.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
        let max_y = origins.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);

        let range_x_m = max_x - min_x + cell_size;
        let range_y_m = max_y - min_y + cell_size;
        let theoretical_zones = (range_x_m / cell_size) * (range_y_m / cell_size);
        let coverage_percent =
            (theoretical_zones > 0.0).then(|| zones.len() as f64 / theoretical_zones * 100.0);

        Some(Self {
            min_x,
            max_x,
            min_y,
            max_y,
            range_x_m,
            range_y_m,
            theoretical_zones,
            coverage_percent,
        })
    }
}

/// One line of run history. Flat so it serializes to a single CSV row.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub timestamp: DateTime<Utc>,
    pub input_file: String,
    pub mode: String,
    pub cell_size_m: f64,

    // rows
    pub total_rows: usize,
    pub usable_rows: usize,
    pub dropped_rows: usize,
    pub dropped_missing_rsrp: usize,
    pub dropped_bad_coordinates: usize,
    pub dropped_missing_operator: usize,
    pub dropped_missing_carrier: usize,
    pub dropped_projection: usize,

    // aggregate
    pub unique_partitions: usize,
    pub unique_operators: usize,
    pub stat_rows: usize,
    pub good_rows: usize,
    pub bad_rows: usize,
    pub backfilled_rows: usize,
    pub rejected_operators: String,

    // outputs
    pub zones_file: Option<String>,
    pub stats_file: Option<String>,

    // grid extent, grid modes only
    pub min_x: Option<f64>,
    pub max_x: Option<f64>,
    pub min_y: Option<f64>,
    pub max_y: Option<f64>,
    pub range_x_m: Option<f64>,
    pub range_y_m: Option<f64>,
    pub theoretical_zones: Option<f64>,
    pub coverage_percent: Option<f64>,
}

impl RunSummary {
    /// Fills the aggregate counters and, for zones, the grid extent.
    pub fn with_stats(mut self, stats: &[PartitionStat], cell_size: f64) -> Self {
        let partitions: BTreeSet<_> = stats.iter().map(|s| s.partition).collect();
        let operators: BTreeSet<_> = stats.iter().map(|s| &s.operator).collect();

        self.unique_partitions = partitions.len();
        self.unique_operators = operators.len();
        self.stat_rows = stats.len();
        self.good_rows = stats.iter().filter(|s| s.coverage == Coverage::Good).count();
        self.bad_rows = self.stat_rows - self.good_rows;
        self.backfilled_rows = stats.iter().filter(|s| s.is_sentinel()).count();

        if let Some(extent) = GridExtent::from_stats(stats, cell_size) {
            self.min_x = Some(extent.min_x);
            self.max_x = Some(extent.max_x);
            self.min_y = Some(extent.min_y);
            self.max_y = Some(extent.max_y);
            self.range_x_m = Some(extent.range_x_m);
            self.range_y_m = Some(extent.range_y_m);
            self.theoretical_zones = Some(extent.theoretical_zones);
            self.coverage_percent = extent.coverage_percent;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{OperatorKey, PlanarPoint, StatOrigin};

    #[test]
    fn test_extent_of_two_diagonal_cells() {
        let stats = vec![stat(PartitionKey::Zone { col: 0, row: 0 }), stat(PartitionKey::Zone { col: 1, row: 1 })];
        let extent = GridExtent::from_stats(&stats, 100.0).unwrap();
        assert_eq!(extent.min_x, 0.0);
        assert_eq!(extent.max_y, 100.0);
        assert_eq!(extent.range_x_m, 200.0);
        assert_eq!(extent.theoretical_zones, 4.0);
        assert_eq!(extent.coverage_percent, Some(50.0));
    }

    #[test]
    fn test_no_extent_for_segments() {
        let stats = vec![stat(PartitionKey::Segment { index: 0 })];
        assert!(GridExtent::from_stats(&stats, 100.0).is_none());

        let summary = RunSummary::default().with_stats(&stats, 100.0);
        assert_eq!(summary.unique_partitions, 1);
        assert_eq!(summary.theoretical_zones, None);
    }

    #[test]
    fn test_counts_good_bad_and_backfilled() {
        let mut sentinel = stat(PartitionKey::Zone { col: 3, row: 0 });
        sentinel.origin = StatOrigin::Backfilled;
        sentinel.coverage = Coverage::Bad;
        let stats = vec![stat(PartitionKey::Zone { col: 0, row: 0 }), sentinel];

        let summary = RunSummary::default().with_stats(&stats, 50.0);
        assert_eq!(summary.stat_rows, 2);
        assert_eq!(summary.good_rows, 1);
        assert_eq!(summary.bad_rows, 1);
        assert_eq!(summary.backfilled_rows, 1);
        assert_eq!(summary.unique_operators, 1);
    }

    fn stat(partition: PartitionKey) -> PartitionStat {
        PartitionStat {
            partition,
            operator: OperatorKey::new("231", "1"),
            rsrp_avg: -90.0,
            sinr_avg: None,
            count: 1,
            chosen_carrier: Some("1800".to_string()),
            chosen_pci: None,
            all_carriers_seen: BTreeSet::new(),
            source_rows: vec![1],
            representative: PlanarPoint::new(0.0, 0.0),
            position: None,
            coverage: Coverage::Good,
            template_record: Some(0),
            origin: StatOrigin::Measured,
        }
    }
}
