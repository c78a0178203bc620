//! Runs the stages end to end: derive, partition, aggregate, backfill, report.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use tracing::{info, warn};

use crate::config::ProcessingConfig;
use crate::engine::aggregate::aggregate;
use crate::engine::backfill::{BackfillOutcome, backfill};
use crate::engine::cancel::CancelToken;
use crate::engine::measurement::{DropCounts, derive_measurements};
use crate::engine::partition::partition;
use crate::engine::projection::Projection;
use crate::engine::types::PartitionStat;
use crate::error::EngineError;
use crate::mapping::{ColumnRoles, resolve_roles};
use crate::output::{OutputPaths, commit_outputs};
use crate::parser::{RowSource, load_rows};
use crate::summary::RunSummary;

/// Result of the in-memory stages.
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    /// Final stats, sorted by operator then partition.
    pub stats: Vec<PartitionStat>,
    pub usable_rows: usize,
    pub drops: DropCounts,
    /// Set when empty partitions were requested.
    pub backfill: Option<BackfillOutcome>,
    /// Size of the partition universe.
    pub total_partitions: usize,
}

/// Runs every stage except file output.
#[tracing::instrument(skip_all, fields(records = source.records.len(), mode = %config.mode))]
pub fn run_engine<P: Projection + ?Sized>(
    source: &RowSource,
    roles: &ColumnRoles,
    config: &ProcessingConfig,
    projection: &P,
    cancel: &CancelToken,
) -> Result<EngineOutcome, EngineError> {
    config.validate()?;

    let derived = derive_measurements(source, roles, projection, cancel)?;
    if derived.measurements.is_empty() {
        return Err(EngineError::NoUsableRows {
            total: source.records.len(),
            dropped: derived.drops.total(),
        });
    }
    let measurements = derived.measurements;
    cancel.check("partitioning")?;

    let partitioning = partition(
        &measurements,
        config.mode,
        config.cell_size_m,
        config.boundary_tolerance,
        cancel,
    )?;
    cancel.check("aggregation")?;

    let thresholds = config.thresholds();
    let mut stats = aggregate(&measurements, &partitioning, &thresholds, projection, cancel)?;
    cancel.check("backfill")?;

    let backfilled = if config.generate_empty_partitions {
        Some(backfill(
            &mut stats,
            &measurements,
            &partitioning,
            &config.extra_operators,
            projection,
        ))
    } else {
        if !config.extra_operators.is_empty() {
            warn!(
                count = config.extra_operators.len(),
                "Extra operators ignored because empty partitions are not generated"
            );
        }
        None
    };

    Ok(EngineOutcome {
        stats,
        usable_rows: measurements.len(),
        drops: derived.drops,
        backfill: backfilled,
        total_partitions: partitioning.universe().len(),
    })
}

/// Processes one input file and writes the zone and stats tables next to it.
pub fn process_file<P: Projection + ?Sized>(
    input: &Path,
    config: &ProcessingConfig,
    projection: &P,
    cancel: &CancelToken,
) -> Result<RunSummary> {
    config.validate()?;

    let source = load_rows(input)?;
    let roles = resolve_roles(&source.columns, &config.column_mapping)
        .with_context(|| format!("mapping columns of {}", input.display()))?;
    info!(
        input = %input.display(),
        records = source.records.len(),
        ?roles,
        "Input loaded"
    );

    let outcome = run_engine(&source, &roles, config, projection, cancel)
        .with_context(|| format!("processing {}", input.display()))?;

    let paths = OutputPaths::for_input(input, config.output_suffix.as_deref());
    let total_partitions = config
        .generate_empty_partitions
        .then_some(outcome.total_partitions);
    commit_outputs(
        &paths,
        &source,
        &roles,
        &outcome.stats,
        &config.thresholds(),
        total_partitions,
        cancel,
    )
    .with_context(|| format!("writing results for {}", input.display()))?;

    let drops = outcome.drops;
    let summary = RunSummary {
        timestamp: Utc::now(),
        input_file: input.display().to_string(),
        mode: config.mode.to_string(),
        cell_size_m: config.cell_size_m,
        total_rows: source.records.len(),
        usable_rows: outcome.usable_rows,
        dropped_rows: drops.total(),
        dropped_missing_rsrp: drops.missing_rsrp,
        dropped_bad_coordinates: drops.bad_latitude + drops.bad_longitude,
        dropped_missing_operator: drops.missing_operator,
        dropped_missing_carrier: drops.missing_carrier,
        dropped_projection: drops.projection_failed,
        rejected_operators: outcome
            .backfill
            .as_ref()
            .map(|b| {
                b.rejected
                    .iter()
                    .map(|r| r.operator.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default(),
        zones_file: Some(paths.zones.display().to_string()),
        stats_file: Some(paths.stats.display().to_string()),
        ..Default::default()
    }
    .with_stats(&outcome.stats, config.cell_size_m);

    info!(
        usable_rows = summary.usable_rows,
        dropped_rows = summary.dropped_rows,
        stat_rows = summary.stat_rows,
        backfilled_rows = summary.backfilled_rows,
        "Run complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZoneMode;
    use crate::engine::projection::Krovak;
    use crate::parser::parse_rows;

    const INPUT: &str = "Latitude;Longitude;EARFCN;PCI;MCC;MNC;RSRP;SINR\n\
        48.1450;17.1070;1800;11;231;01;-95;4\n\
        48.1451;17.1071;2100;12;231;01;-99;2\n\
        48.1452;17.1072;1800;21;231;02;-105;\n\
        bad;17.1072;1800;21;231;02;-105;\n";

    fn roles(source: &RowSource) -> ColumnRoles {
        resolve_roles(&source.columns, &Default::default()).unwrap()
    }

    #[test]
    fn test_engine_counts_usable_rows() {
        let source = parse_rows(INPUT.as_bytes()).unwrap();
        let config = ProcessingConfig {
            mode: ZoneMode::GridCenter,
            ..Default::default()
        };
        let outcome = run_engine(&source, &roles(&source), &config, &Krovak::new(), &CancelToken::new()).unwrap();
        assert_eq!(outcome.usable_rows, 3);
        assert_eq!(outcome.drops.bad_latitude, 1);
        assert_eq!(outcome.stats.iter().map(|s| s.count).sum::<usize>(), 3);
        assert!(outcome.backfill.is_none());
    }

    #[test]
    fn test_engine_rejects_invalid_config_before_reading() {
        let source = parse_rows(INPUT.as_bytes()).unwrap();
        let config = ProcessingConfig {
            cell_size_m: 0.0,
            ..Default::default()
        };
        let result = run_engine(&source, &roles(&source), &config, &Krovak::new(), &CancelToken::new());
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_engine_fails_without_usable_rows() {
        let text = "Latitude;Longitude;EARFCN;PCI;MCC;MNC;RSRP\n48.1;17.1;1800;1;231;1;\n";
        let source = parse_rows(text.as_bytes()).unwrap();
        let result = run_engine(
            &source,
            &roles(&source),
            &ProcessingConfig::default(),
            &Krovak::new(),
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(EngineError::NoUsableRows { total: 1, dropped: 1 })));
    }

    #[test]
    fn test_blank_sinr_column_keeps_sinr_headers() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("drive.csv");
        let text = "Latitude;Longitude;EARFCN;PCI;MCC;MNC;RSRP;SINR\n\
            48.1450;17.1070;1800;11;231;01;-95;\n\
            48.1451;17.1071;2100;12;231;01;-99;\n";
        std::fs::write(&input, text).unwrap();
        process_file(&input, &ProcessingConfig::default(), &Krovak::new(), &CancelToken::new()).unwrap();
        let stats = std::fs::read_to_string(dir.path().join("drive_stats.csv")).unwrap();
        assert_eq!(
            stats.lines().next(),
            Some("MNC;MCC;RSRP >= -110 and SINR >= -5;RSRP < -110 or SINR < -5")
        );
    }

    #[test]
    fn test_process_file_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("drive.csv");
        std::fs::write(&input, INPUT).unwrap();
        let config = ProcessingConfig {
            generate_empty_partitions: true,
            output_suffix: Some("t".to_string()),
            ..Default::default()
        };
        let summary = process_file(&input, &config, &Krovak::new(), &CancelToken::new()).unwrap();
        assert_eq!(summary.usable_rows, 3);
        assert_eq!(summary.total_rows, 4);
        assert!(dir.path().join("drive_t_zones.csv").exists());
        assert!(dir.path().join("drive_t_stats.csv").exists());
    }
}
