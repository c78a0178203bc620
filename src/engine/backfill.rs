//! Sentinel rows for (partition, operator) pairs without measurements.

use crate::config::ExtraOperator;
use crate::engine::aggregate::locate_stats;
use crate::engine::coverage::SENTINEL_RSRP;
use crate::engine::partition::Partitioning;
use crate::engine::projection::Projection;
use crate::engine::types::{
    Coverage, Measurement, OperatorKey, PartitionKey, PartitionStat, PlanarPoint, StatOrigin,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    /// The operator already has measured partitions.
    AlreadyMeasured,
    /// The operator appears earlier in the extra operator list.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedOperator {
    pub operator: String,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillOutcome {
    /// Sentinel rows appended.
    pub added: usize,
    pub rejected: Vec<RejectedOperator>,
}

/// An operator to backfill with the values its sentinels carry.
struct Candidate {
    key: OperatorKey,
    pci: Option<String>,
    template_record: Option<usize>,
    origin: StatOrigin,
}

/// Observed operators (sorted) followed by the accepted extra operators in
/// the order given. Rejections are appended to `rejected`.
fn operator_universe(
    stats: &[PartitionStat],
    measurements: &[Measurement],
    extra_operators: &[ExtraOperator],
    rejected: &mut Vec<RejectedOperator>,
) -> Vec<Candidate> {
    let mut first_record: BTreeMap<OperatorKey, usize> = BTreeMap::new();
    for m in measurements {
        first_record
            .entry(m.operator.clone())
            .and_modify(|r| *r = (*r).min(m.record))
            .or_insert(m.record);
    }
    let run_template = measurements.iter().map(|m| m.record).min();

    let measured: HashSet<&OperatorKey> = stats
        .iter()
        .filter(|s| s.count > 0)
        .map(|s| &s.operator)
        .chain(first_record.keys())
        .collect();

    let mut candidates: Vec<Candidate> = first_record
        .iter()
        .map(|(key, &record)| Candidate {
            key: key.clone(),
            pci: None,
            template_record: Some(record),
            origin: StatOrigin::Backfilled,
        })
        .collect();

    let mut accepted: HashSet<OperatorKey> = HashSet::new();
    for extra in extra_operators {
        let key = extra.key();
        let reason = if measured.contains(&key) {
            Some(RejectReason::AlreadyMeasured)
        } else if !accepted.insert(key.clone()) {
            Some(RejectReason::Duplicate)
        } else {
            None
        };
        match reason {
            Some(reason) => {
                warn!(operator = %extra, ?reason, "Skipping extra operator");
                rejected.push(RejectedOperator {
                    operator: extra.to_string(),
                    reason,
                });
            }
            None => candidates.push(Candidate {
                key,
                pci: extra.pci.clone(),
                template_record: run_template,
                origin: StatOrigin::ExtraOperator,
            }),
        }
    }
    candidates
}

/// Appends a sentinel [`PartitionStat`] for every (partition, operator) pair
/// of the universe that `stats` does not contain yet.
///
/// Existing entries are never changed or removed, and existing sentinels
/// count as present, so running this again adds nothing.
#[tracing::instrument(skip_all, fields(stats = stats.len(), extra = extra_operators.len()))]
pub fn backfill<P: Projection + ?Sized>(
    stats: &mut Vec<PartitionStat>,
    measurements: &[Measurement],
    partitioning: &Partitioning,
    extra_operators: &[ExtraOperator],
    projection: &P,
) -> BackfillOutcome {
    let mut outcome = BackfillOutcome::default();
    let operators = operator_universe(stats, measurements, extra_operators, &mut outcome.rejected);
    let partitions = partitioning.universe();

    let present: HashSet<(PartitionKey, OperatorKey)> = stats
        .iter()
        .map(|s| (s.partition, s.operator.clone()))
        .collect();

    let mut sentinels = Vec::new();
    for op in &operators {
        for partition in &partitions {
            if present.contains(&(*partition, op.key.clone())) {
                continue;
            }
            sentinels.push(PartitionStat {
                partition: *partition,
                operator: op.key.clone(),
                rsrp_avg: SENTINEL_RSRP,
                sinr_avg: None,
                count: 0,
                chosen_carrier: None,
                chosen_pci: op.pci.clone(),
                all_carriers_seen: BTreeSet::new(),
                source_rows: Vec::new(),
                representative: partitioning
                    .display_point(partition)
                    .unwrap_or(PlanarPoint::new(f64::NAN, f64::NAN)),
                position: None,
                coverage: Coverage::Bad,
                template_record: op.template_record,
                origin: op.origin,
            });
        }
    }

    locate_stats(&mut sentinels, projection);
    outcome.added = sentinels.len();
    stats.extend(sentinels);
    stats.sort_by(|a, b| {
        a.operator
            .cmp(&b.operator)
            .then_with(|| a.partition.cmp(&b.partition))
    });

    info!(
        partitions = partitions.len(),
        operators = operators.len(),
        added = outcome.added,
        rejected = outcome.rejected.len(),
        "Backfill complete"
    );
    outcome
}
