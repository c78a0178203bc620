//! Per-partition aggregation and representative carrier selection.
//!
//! Measurements are grouped by (partition, operator, carrier, PCI). Within
//! each (partition, operator) exactly one group is chosen by a total order,
//! so the choice never depends on input order or on how work was split
//! across threads.

use crate::engine::cancel::CancelToken;
use crate::engine::coverage::{Thresholds, classify};
use crate::engine::partition::Partitioning;
use crate::engine::projection::{Projection, unproject_batch};
use crate::engine::types::{
    Measurement, OperatorKey, PartitionKey, PartitionStat, PlanarPoint, StatOrigin,
};
use crate::engine::utility::{compare_numeric_text, compare_optional_numeric_text, mean};
use crate::error::EngineError;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use tracing::{info, warn};

/// Measurements grouped per parallel work unit.
const CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    partition: PartitionKey,
    operator: OperatorKey,
    carrier: String,
    pci: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    source_row: usize,
    record: usize,
    rsrp: f64,
    sinr: Option<f64>,
}

type PartialGroups = HashMap<GroupKey, Vec<Sample>>;

/// Statistics of one (partition, operator, carrier, PCI) group.
#[derive(Debug, Clone, PartialEq)]
pub struct CarrierGroup {
    pub partition: PartitionKey,
    pub operator: OperatorKey,
    pub carrier: String,
    pub pci: Option<String>,
    pub rsrp_avg: f64,
    pub sinr_avg: Option<f64>,
    pub count: usize,
    /// Ascending.
    pub source_rows: Vec<usize>,
    /// Record of the lowest source row in the group.
    pub template_record: usize,
}

/// Representative order: strongest mean RSRP first, then most samples, then
/// lowest carrier id, then lowest PCI (ids compare numerically, non-numeric
/// ids after numeric ones).
pub fn representative_order(a: &CarrierGroup, b: &CarrierGroup) -> Ordering {
    b.rsrp_avg
        .total_cmp(&a.rsrp_avg)
        .then_with(|| b.count.cmp(&a.count))
        .then_with(|| compare_numeric_text(&a.carrier, &b.carrier))
        .then_with(|| compare_optional_numeric_text(a.pci.as_deref(), b.pci.as_deref()))
}

fn group_chunk(measurements: &[Measurement], keys: &[PartitionKey]) -> PartialGroups {
    let mut groups: PartialGroups = HashMap::new();
    for (m, partition) in measurements.iter().zip(keys) {
        let key = GroupKey {
            partition: *partition,
            operator: m.operator.clone(),
            carrier: m.carrier_id.clone(),
            pci: m.pci.clone(),
        };
        groups.entry(key).or_default().push(Sample {
            source_row: m.source_row,
            record: m.record,
            rsrp: m.rsrp,
            sinr: m.sinr,
        });
    }
    groups
}

/// Merges partial groups. Samples are concatenated, never pre-reduced, so the
/// final statistics and the selection see the complete groups.
fn merge_groups(mut into: PartialGroups, from: PartialGroups) -> PartialGroups {
    if into.len() < from.len() {
        return merge_groups(from, into);
    }
    for (key, samples) in from {
        into.entry(key).or_default().extend(samples);
    }
    into
}

fn finalize_group(key: GroupKey, mut samples: Vec<Sample>) -> CarrierGroup {
    // Fixed summation order keeps the means bit-identical across runs.
    samples.sort_by(|a, b| a.source_row.cmp(&b.source_row).then(a.record.cmp(&b.record)));

    let rsrp: Vec<f64> = samples.iter().map(|s| s.rsrp).collect();
    let sinr: Vec<f64> = samples.iter().filter_map(|s| s.sinr).collect();

    CarrierGroup {
        partition: key.partition,
        operator: key.operator,
        carrier: key.carrier,
        pci: key.pci,
        rsrp_avg: mean(&rsrp).unwrap_or(f64::NEG_INFINITY),
        sinr_avg: mean(&sinr),
        count: samples.len(),
        source_rows: samples.iter().map(|s| s.source_row).collect(),
        template_record: samples.first().map(|s| s.record).unwrap_or_default(),
    }
}

/// Groups measurements into carrier groups in parallel.
///
/// `keys[i]` is the partition of `measurements[i]`.
pub fn build_groups(
    measurements: &[Measurement],
    keys: &[PartitionKey],
    cancel: &CancelToken,
) -> Result<Vec<CarrierGroup>, EngineError> {
    let merged = measurements
        .par_chunks(CHUNK_SIZE)
        .zip(keys.par_chunks(CHUNK_SIZE))
        .map(|(m, k)| {
            cancel.check("aggregation")?;
            Ok::<_, EngineError>(group_chunk(m, k))
        })
        .try_reduce(HashMap::new, |a, b| Ok(merge_groups(a, b)))?;

    Ok(merged
        .into_iter()
        .map(|(key, samples)| finalize_group(key, samples))
        .collect())
}

/// Picks one group per (partition, operator) and turns it into a
/// [`PartitionStat`] with coverage and display coordinates.
///
/// Means, PCI and source rows come from the chosen group; `count` covers
/// every measurement of the (partition, operator).
pub fn select_representatives<P: Projection + ?Sized>(
    groups: Vec<CarrierGroup>,
    partitioning: &Partitioning,
    thresholds: &Thresholds,
    projection: &P,
) -> Vec<PartitionStat> {
    let mut buckets: HashMap<(PartitionKey, OperatorKey), Vec<CarrierGroup>> = HashMap::new();
    for g in groups {
        buckets
            .entry((g.partition, g.operator.clone()))
            .or_default()
            .push(g);
    }

    let mut stats: Vec<PartitionStat> = buckets
        .into_values()
        .filter_map(|mut bucket| {
            bucket.sort_by(representative_order);
            let all_carriers_seen: BTreeSet<String> =
                bucket.iter().map(|g| g.carrier.clone()).collect();
            let count = bucket.iter().map(|g| g.count).sum();
            let chosen = bucket.into_iter().next()?;
            let representative = partitioning
                .display_point(&chosen.partition)
                .unwrap_or(PlanarPoint::new(f64::NAN, f64::NAN));
            Some(PartitionStat {
                partition: chosen.partition,
                operator: chosen.operator,
                rsrp_avg: chosen.rsrp_avg,
                sinr_avg: chosen.sinr_avg,
                count,
                coverage: classify(chosen.rsrp_avg, chosen.sinr_avg, thresholds),
                chosen_carrier: Some(chosen.carrier),
                chosen_pci: chosen.pci,
                all_carriers_seen,
                source_rows: chosen.source_rows,
                representative,
                position: None,
                template_record: Some(chosen.template_record),
                origin: StatOrigin::Measured,
            })
        })
        .collect();

    stats.sort_by(|a, b| {
        a.operator
            .cmp(&b.operator)
            .then_with(|| a.partition.cmp(&b.partition))
    });

    locate_stats(&mut stats, projection);
    stats
}

/// Fills [`PartitionStat::position`] from the planar display coordinate.
pub fn locate_stats<P: Projection + ?Sized>(stats: &mut [PartitionStat], projection: &P) {
    let points: Vec<PlanarPoint> = stats.iter().map(|s| s.representative).collect();
    let located = unproject_batch(projection, &points);
    let mut failed = 0usize;
    for (stat, result) in stats.iter_mut().zip(located) {
        match result {
            Ok(geo) => stat.position = Some(geo),
            Err(_) => failed += 1,
        }
    }
    if failed > 0 {
        warn!(failed, "Some partitions have no geographic display coordinate");
    }
}

/// Full aggregation stage: grouping, selection and classification.
#[tracing::instrument(skip_all, fields(measurements = measurements.len()))]
pub fn aggregate<P: Projection + ?Sized>(
    measurements: &[Measurement],
    partitioning: &Partitioning,
    thresholds: &Thresholds,
    projection: &P,
    cancel: &CancelToken,
) -> Result<Vec<PartitionStat>, EngineError> {
    let groups = build_groups(measurements, &partitioning.keys, cancel)?;
    let group_count = groups.len();
    cancel.check("aggregation")?;
    let stats = select_representatives(groups, partitioning, thresholds, projection);
    info!(groups = group_count, stats = stats.len(), "Aggregation complete");
    Ok(stats)
}
