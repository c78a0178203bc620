//! Output formatting and persistence.
//!
//! Writes the zone table and the per-operator stats table next to the input
//! file, plus the JSON log line and CSV history row of a [`RunSummary`].
//!
//! [`RunSummary`]: crate::summary::RunSummary

use anyhow::Result;
use csv::WriterBuilder;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::engine::cancel::CancelToken;
use crate::engine::coverage::Thresholds;
use crate::engine::types::{Coverage, OperatorKey, PartitionKey, PartitionStat, StatOrigin};
use crate::engine::utility::{format_int_like, number_label};
use crate::error::EngineError;
use crate::mapping::ColumnRoles;
use crate::parser::RowSource;

/// Trailing columns appended to the original header in the zone table.
pub const ZONE_ROWS_COLUMN: &str = "zone_rows";
pub const ZONE_CARRIERS_COLUMN: &str = "zone_carriers";

/// Where the two result tables go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub zones: PathBuf,
    pub stats: PathBuf,
}

impl OutputPaths {
    /// `<stem>[_suffix]_zones.csv` and `<stem>[_suffix]_stats.csv` next to
    /// `input`.
    pub fn for_input(input: &Path, suffix: Option<&str>) -> Self {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "measurements".to_string());
        let suffix = normalize_suffix(suffix.unwrap_or(""));
        let dir = input.parent().unwrap_or(Path::new(""));
        Self {
            zones: dir.join(format!("{}{}_zones.csv", stem, suffix)),
            stats: dir.join(format!("{}{}_stats.csv", stem, suffix)),
        }
    }
}

/// Trims the suffix and makes it start with `_` unless empty.
pub fn normalize_suffix(value: &str) -> String {
    let suffix = value.trim();
    if suffix.is_empty() || suffix.starts_with('_') {
        suffix.to_string()
    } else {
        format!("_{}", suffix)
    }
}

/// Trailing note of the carriers column. For measured rows the count is the
/// partition total for the operator, so it can exceed the listed row numbers,
/// which belong to the chosen carrier group.
fn annotation(stat: &PartitionStat) -> String {
    let segment = matches!(stat.partition, PartitionKey::Segment { .. });
    match (stat.origin, segment) {
        (StatOrigin::Measured, _) => format!(" # measurements: {}", stat.count),
        (StatOrigin::Backfilled, false) => " # empty zone - generated".to_string(),
        (StatOrigin::Backfilled, true) => " # empty segment - generated".to_string(),
        (StatOrigin::ExtraOperator, false) => " # empty zone - extra operator".to_string(),
        (StatOrigin::ExtraOperator, true) => " # empty segment - extra operator".to_string(),
    }
}

/// Projects a stat onto the output schema: non-derived columns come from the
/// template record, every derived column is set from the stat.
pub fn zone_row(
    stat: &PartitionStat,
    source: &RowSource,
    roles: &ColumnRoles,
    width: usize,
) -> Vec<String> {
    let mut row: Vec<String> = stat
        .template_record
        .and_then(|i| source.records.get(i))
        .map(|r| r.values.iter().take(width).cloned().collect())
        .unwrap_or_default();
    row.resize(width, String::new());

    let mut set = |idx: usize, value: String| {
        if let Some(slot) = row.get_mut(idx) {
            *slot = value;
        }
    };

    let rsrp = if stat.is_sentinel() {
        number_label(stat.rsrp_avg)
    } else {
        format!("{:.2}", stat.rsrp_avg)
    };
    set(roles.rsrp, rsrp);
    if let Some(sinr_idx) = roles.sinr {
        set(sinr_idx, stat.sinr_avg.map(|s| format!("{:.2}", s)).unwrap_or_default());
    }
    set(roles.frequency, stat.chosen_carrier.clone().unwrap_or_default());
    set(
        roles.pci,
        stat.chosen_pci.as_deref().map(format_int_like).unwrap_or_default(),
    );
    set(roles.mcc, stat.operator.mcc.clone());
    set(roles.mnc, stat.operator.mnc.clone());

    let (lat, lon) = match stat.position {
        Some(p) => (format!("{:.6}", p.lat), format!("{:.6}", p.lon)),
        None => (String::new(), String::new()),
    };
    set(roles.latitude, lat);
    set(roles.longitude, lon);

    let note = annotation(stat);
    if stat.is_sentinel() {
        row.push(String::new());
        row.push(note.trim_start().to_string());
    } else {
        row.push(
            stat.source_rows
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(","),
        );
        let carriers = stat.all_carriers_seen.iter().cloned().collect::<Vec<_>>().join(",");
        row.push(format!("{}{}", carriers, note));
    }
    row
}

/// Header fields of the zone table.
fn zone_header(source: &RowSource) -> Vec<String> {
    let mut header = if source.header.is_empty() {
        source.columns.clone()
    } else {
        source.header.clone()
    };
    header.push(ZONE_ROWS_COLUMN.to_string());
    header.push(ZONE_CARRIERS_COLUMN.to_string());
    header
}

/// Writes the zone table: an empty first line, the header, then one line
/// per stat.
pub fn write_zones<W: Write>(
    mut out: W,
    source: &RowSource,
    roles: &ColumnRoles,
    stats: &[PartitionStat],
) -> Result<(), EngineError> {
    out.write_all(b"\n")?;
    let header = zone_header(source);
    let width = header.len() - 2;

    let mut writer = WriterBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_writer(out);
    writer.write_record(&header)?;
    for stat in stats {
        writer.write_record(zone_row(stat, source, roles, width))?;
    }
    writer.flush()?;
    Ok(())
}

/// Column titles of the stats table, embedding the active thresholds. The
/// SINR wording follows whether the input has a SINR column at all, even if
/// every cell in it is blank.
pub fn stats_headers(has_sinr: bool, thresholds: &Thresholds) -> (String, String) {
    let rsrp = number_label(thresholds.rsrp);
    if has_sinr {
        let sinr = number_label(thresholds.sinr);
        (
            format!("RSRP >= {} and SINR >= {}", rsrp, sinr),
            format!("RSRP < {} or SINR < {}", rsrp, sinr),
        )
    } else {
        (format!("RSRP >= {}", rsrp), format!("RSRP < {}", rsrp))
    }
}

/// Good/bad partition counts per operator.
///
/// With `total_partitions` set (backfill requested), partitions an operator
/// has no row for count as bad, whether or not sentinel rows exist.
pub fn operator_counts(
    stats: &[PartitionStat],
    total_partitions: Option<usize>,
) -> BTreeMap<OperatorKey, (usize, usize)> {
    let mut counts: BTreeMap<OperatorKey, (usize, usize, BTreeSet<PartitionKey>)> = BTreeMap::new();
    for s in stats {
        let entry = counts.entry(s.operator.clone()).or_default();
        match s.coverage {
            Coverage::Good => entry.0 += 1,
            Coverage::Bad => entry.1 += 1,
        }
        entry.2.insert(s.partition);
    }

    counts
        .into_iter()
        .map(|(op, (good, bad, present))| {
            let missing = total_partitions.map_or(0, |t| t.saturating_sub(present.len()));
            (op, (good, bad + missing))
        })
        .collect()
}

/// Writes the per-operator stats table: `MNC;MCC;<good>;<bad>`.
pub fn write_stats<W: Write>(
    out: W,
    stats: &[PartitionStat],
    thresholds: &Thresholds,
    has_sinr: bool,
    total_partitions: Option<usize>,
) -> Result<(), EngineError> {
    let (good_header, bad_header) = stats_headers(has_sinr, thresholds);
    let mut writer = WriterBuilder::new().delimiter(b';').from_writer(out);
    writer.write_record(["MNC", "MCC", good_header.as_str(), bad_header.as_str()])?;
    for (op, (good, bad)) in operator_counts(stats, total_partitions) {
        writer.write_record([op.mnc, op.mcc, good.to_string(), bad.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes both tables to temporary files in the target directory and moves
/// them into place only once both are complete.
#[tracing::instrument(skip_all, fields(zones = %paths.zones.display(), stats_file = %paths.stats.display()))]
pub fn commit_outputs(
    paths: &OutputPaths,
    source: &RowSource,
    roles: &ColumnRoles,
    stats: &[PartitionStat],
    thresholds: &Thresholds,
    total_partitions: Option<usize>,
    cancel: &CancelToken,
) -> Result<(), EngineError> {
    let temp_in = |target: &Path| {
        let dir = match target.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };
        NamedTempFile::new_in(dir)
    };

    let mut zones_tmp = temp_in(&paths.zones)?;
    write_zones(zones_tmp.as_file_mut(), source, roles, stats)?;
    cancel.check("output")?;

    let mut stats_tmp = temp_in(&paths.stats)?;
    write_stats(
        stats_tmp.as_file_mut(),
        stats,
        thresholds,
        roles.sinr.is_some(),
        total_partitions,
    )?;
    cancel.check("output")?;

    zones_tmp.persist(&paths.zones).map_err(|e| e.error)?;
    stats_tmp.persist(&paths.stats).map_err(|e| e.error)?;

    info!(rows = stats.len(), "Output files written");
    Ok(())
}

/// Logs a record as pretty-printed JSON.
pub fn print_json<T: Serialize>(record: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(record)?);
    Ok(())
}

/// Appends a record as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{GeoPoint, PlanarPoint};
    use crate::parser::SourceRecord;
    use crate::summary::RunSummary;
    use std::fs;

    #[test]
    fn test_output_paths_with_and_without_suffix() {
        let paths = OutputPaths::for_input(Path::new("/data/drive.csv"), None);
        assert_eq!(paths.zones, PathBuf::from("/data/drive_zones.csv"));
        assert_eq!(paths.stats, PathBuf::from("/data/drive_stats.csv"));

        let paths = OutputPaths::for_input(Path::new("/data/drive.csv"), Some(" run2 "));
        assert_eq!(paths.zones, PathBuf::from("/data/drive_run2_zones.csv"));
        assert_eq!(normalize_suffix("_x"), "_x");
        assert_eq!(normalize_suffix("  "), "");
    }

    #[test]
    fn test_zone_row_overwrites_derived_columns() {
        let (source, roles) = fixture();
        let row = zone_row(&measured(), &source, &roles, 9);
        assert_eq!(
            row,
            vec![
                "12:00:01", "48.143900", "17.108800", "1800", "7", "231", "1", "-95.25", "3.50",
                "2,5", "1800,2100 # measurements: 2",
            ]
        );
    }

    #[test]
    fn test_measurement_note_counts_whole_partition() {
        let (source, roles) = fixture();
        let mut s = measured();
        s.count = 5;
        let row = zone_row(&s, &source, &roles, 9);
        assert_eq!(row[9], "2,5");
        assert_eq!(row[10], "1800,2100 # measurements: 5");
    }

    #[test]
    fn test_sentinel_row_has_empty_lists_and_marker() {
        let (source, roles) = fixture();
        let mut s = measured();
        s.origin = StatOrigin::Backfilled;
        s.partition = PartitionKey::Segment { index: 4 };
        s.rsrp_avg = -174.0;
        s.sinr_avg = None;
        s.count = 0;
        s.chosen_carrier = None;
        s.chosen_pci = None;
        s.source_rows.clear();
        s.all_carriers_seen.clear();
        let row = zone_row(&s, &source, &roles, 9);
        assert_eq!(row[7], "-174");
        assert_eq!(row[8], "");
        assert_eq!(row[3], "");
        assert_eq!(row[9], "");
        assert_eq!(row[10], "# empty segment - generated");
    }

    #[test]
    fn test_write_zones_layout() {
        let (source, roles) = fixture();
        let mut buf = Vec::new();
        write_zones(&mut buf, &source, &roles, &[measured()]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "");
        assert_eq!(
            lines[1],
            "Time;Latitude;Longitude;EARFCN;PCI;MCC;MNC;RSRP;SINR;zone_rows;zone_carriers"
        );
        assert!(lines[2].ends_with(";2,5;1800,2100 # measurements: 2"));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_stats_headers_and_missing_partitions_count_as_bad() {
        let mut a = measured();
        a.partition = PartitionKey::Zone { col: 0, row: 0 };
        let mut b = measured();
        b.partition = PartitionKey::Zone { col: 1, row: 0 };
        b.coverage = Coverage::Bad;

        let mut buf = Vec::new();
        write_stats(&mut buf, &[a.clone(), b.clone()], &Thresholds::default(), true, Some(5)).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "MNC;MCC;RSRP >= -110 and SINR >= -5;RSRP < -110 or SINR < -5");
        assert_eq!(lines[1], "1;231;1;4");

        a.sinr_avg = None;
        b.sinr_avg = None;
        let (good, bad) = stats_headers(false, &Thresholds { rsrp: -100.5, sinr: 0.0 });
        assert_eq!(good, "RSRP >= -100.5");
        assert_eq!(bad, "RSRP < -100.5");
        assert_eq!(operator_counts(&[a, b], None)[&OperatorKey::new("231", "1")], (1, 1));
    }

    #[test]
    fn test_commit_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = OutputPaths::for_input(&dir.path().join("drive.csv"), None);
        let (source, roles) = fixture();
        commit_outputs(
            &paths,
            &source,
            &roles,
            &[measured()],
            &Thresholds::default(),
            None,
            &CancelToken::new(),
        )
        .unwrap();
        assert!(paths.zones.exists());
        assert!(fs::read_to_string(&paths.stats).unwrap().starts_with("MNC;MCC;"));
    }

    #[test]
    fn test_cancelled_commit_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = OutputPaths::for_input(&dir.path().join("drive.csv"), None);
        let (source, roles) = fixture();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = commit_outputs(&paths, &source, &roles, &[measured()], &Thresholds::default(), None, &cancel);
        assert!(matches!(result, Err(EngineError::Cancelled { stage: "output" })));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&RunSummary::default()).unwrap();
    }

    #[test]
    fn test_append_record_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");

        append_record(&path, &RunSummary::default()).unwrap();
        append_record(&path, &RunSummary::default()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        // Header line should appear exactly once
        let header_count = content.lines().filter(|l| l.contains("timestamp")).count();
        assert_eq!(header_count, 1);
        assert_eq!(content.lines().count(), 3);
    }

    fn fixture() -> (RowSource, ColumnRoles) {
        let header: Vec<String> = ["Time", "Latitude", "Longitude", "EARFCN", "PCI", "MCC", "MNC", "RSRP", "SINR"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let values: Vec<String> = ["12:00:01", "48,1", "17,1", "2100", "9", "231", "01", "-90", "4"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let source = RowSource {
            columns: header.clone(),
            header,
            header_line: 0,
            records: vec![SourceRecord { source_row: 2, values }],
        };
        let roles = ColumnRoles {
            latitude: 1,
            longitude: 2,
            frequency: 3,
            pci: 4,
            mcc: 5,
            mnc: 6,
            rsrp: 7,
            sinr: Some(8),
        };
        (source, roles)
    }

    fn measured() -> PartitionStat {
        PartitionStat {
            partition: PartitionKey::Zone { col: 0, row: 0 },
            operator: OperatorKey::new("231", "01"),
            rsrp_avg: -95.25,
            sinr_avg: Some(3.5),
            count: 2,
            chosen_carrier: Some("1800".to_string()),
            chosen_pci: Some("7".to_string()),
            all_carriers_seen: ["1800", "2100"].iter().map(|s| s.to_string()).collect(),
            source_rows: vec![2, 5],
            representative: PlanarPoint::new(50.0, 50.0),
            position: Some(GeoPoint { lon: 17.1088, lat: 48.1439 }),
            coverage: Coverage::Good,
            template_record: Some(0),
            origin: StatOrigin::Measured,
        }
    }
}
