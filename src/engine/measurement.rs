//! Turns parsed rows into [`Measurement`]s.
//!
//! A row that cannot be used is dropped and tallied by reason; nothing here
//! aborts the run for a single bad row.

use crate::engine::cancel::CancelToken;
use crate::engine::projection::{Projection, project_batch};
use crate::engine::types::{GeoPoint, Measurement, OperatorKey};
use crate::engine::utility::parse_number;
use crate::error::EngineError;
use crate::mapping::ColumnRoles;
use crate::parser::{RowSource, SourceRecord};
use serde::Serialize;
use tracing::{debug, warn};

/// Rows handed to the projector per cancellation check.
const CHUNK_SIZE: usize = 1000;

/// Why a row was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowIssue {
    MissingRsrp,
    BadLatitude,
    BadLongitude,
    MissingOperator,
    MissingCarrier,
    ProjectionFailed,
}

/// Dropped-row counters, one per [`RowIssue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DropCounts {
    pub missing_rsrp: usize,
    pub bad_latitude: usize,
    pub bad_longitude: usize,
    pub missing_operator: usize,
    pub missing_carrier: usize,
    pub projection_failed: usize,
}

impl DropCounts {
    pub fn record(&mut self, issue: RowIssue) {
        match issue {
            RowIssue::MissingRsrp => self.missing_rsrp += 1,
            RowIssue::BadLatitude => self.bad_latitude += 1,
            RowIssue::BadLongitude => self.bad_longitude += 1,
            RowIssue::MissingOperator => self.missing_operator += 1,
            RowIssue::MissingCarrier => self.missing_carrier += 1,
            RowIssue::ProjectionFailed => self.projection_failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.missing_rsrp
            + self.bad_latitude
            + self.bad_longitude
            + self.missing_operator
            + self.missing_carrier
            + self.projection_failed
    }
}

/// Usable measurements in input order plus the tally of dropped rows.
#[derive(Debug, Clone, Default)]
pub struct DerivedMeasurements {
    pub measurements: Vec<Measurement>,
    pub drops: DropCounts,
}

/// A row that parsed cleanly but has not been projected yet.
#[derive(Debug, Clone, PartialEq)]
struct ParsedRow {
    lon: f64,
    lat: f64,
    rsrp: f64,
    sinr: Option<f64>,
    carrier_id: String,
    operator: OperatorKey,
    pci: Option<String>,
    source_row: usize,
    record: usize,
}

fn non_blank(value: &str) -> Option<String> {
    let v = value.trim();
    (!v.is_empty()).then(|| v.to_string())
}

fn parse_record(record: &SourceRecord, index: usize, roles: &ColumnRoles) -> Result<ParsedRow, RowIssue> {
    let rsrp = parse_number(record.get(roles.rsrp)).ok_or(RowIssue::MissingRsrp)?;
    let lat = parse_number(record.get(roles.latitude)).ok_or(RowIssue::BadLatitude)?;
    let lon = parse_number(record.get(roles.longitude)).ok_or(RowIssue::BadLongitude)?;

    let mcc = non_blank(record.get(roles.mcc)).ok_or(RowIssue::MissingOperator)?;
    let mnc = non_blank(record.get(roles.mnc)).ok_or(RowIssue::MissingOperator)?;
    let carrier_id = non_blank(record.get(roles.frequency)).ok_or(RowIssue::MissingCarrier)?;

    Ok(ParsedRow {
        lon,
        lat,
        rsrp,
        sinr: roles.sinr.and_then(|idx| parse_number(record.get(idx))),
        carrier_id,
        operator: OperatorKey::new(&mcc, &mnc),
        pci: non_blank(record.get(roles.pci)),
        source_row: record.source_row,
        record: index,
    })
}

/// Parses, validates and projects every record of `source`.
///
/// Projection runs in parallel per chunk; output order matches input order,
/// which segment mode depends on.
#[tracing::instrument(skip_all, fields(records = source.records.len()))]
pub fn derive_measurements<P: Projection + ?Sized>(
    source: &RowSource,
    roles: &ColumnRoles,
    projection: &P,
    cancel: &CancelToken,
) -> Result<DerivedMeasurements, EngineError> {
    let mut out = DerivedMeasurements {
        measurements: Vec::with_capacity(source.records.len()),
        drops: DropCounts::default(),
    };

    for (chunk_no, chunk) in source.records.chunks(CHUNK_SIZE).enumerate() {
        cancel.check("projection")?;

        let mut parsed = Vec::with_capacity(chunk.len());
        for (offset, record) in chunk.iter().enumerate() {
            match parse_record(record, chunk_no * CHUNK_SIZE + offset, roles) {
                Ok(row) => parsed.push(row),
                Err(issue) => {
                    debug!(source_row = record.source_row, ?issue, "Dropping row");
                    out.drops.record(issue);
                }
            }
        }

        let geo: Vec<GeoPoint> = parsed
            .iter()
            .map(|r| GeoPoint { lon: r.lon, lat: r.lat })
            .collect();
        let planar = project_batch(projection, &geo);

        for (row, projected) in parsed.into_iter().zip(planar) {
            match projected {
                Ok(p) => out.measurements.push(Measurement {
                    lon: row.lon,
                    lat: row.lat,
                    x: p.x,
                    y: p.y,
                    rsrp: row.rsrp,
                    sinr: row.sinr,
                    carrier_id: row.carrier_id,
                    operator: row.operator,
                    pci: row.pci,
                    source_row: row.source_row,
                    record: row.record,
                }),
                Err(e) => {
                    debug!(source_row = row.source_row, error = %e, "Dropping row");
                    out.drops.record(RowIssue::ProjectionFailed);
                }
            }
        }
    }

    if out.drops.total() > 0 {
        warn!(
            dropped = out.drops.total(),
            missing_rsrp = out.drops.missing_rsrp,
            bad_latitude = out.drops.bad_latitude,
            bad_longitude = out.drops.bad_longitude,
            missing_operator = out.drops.missing_operator,
            missing_carrier = out.drops.missing_carrier,
            projection_failed = out.drops.projection_failed,
            "Rows dropped while deriving measurements"
        );
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::projection::Krovak;

    fn roles() -> ColumnRoles {
        ColumnRoles {
            latitude: 0,
            longitude: 1,
            frequency: 2,
            pci: 3,
            mcc: 4,
            mnc: 5,
            rsrp: 6,
            sinr: Some(7),
        }
    }

    fn record(source_row: usize, values: &[&str]) -> SourceRecord {
        SourceRecord {
            source_row,
            values: values.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_record_normalizes_fields() {
        let r = record(5, &["48,15", "17,11", "1800", "", "231", "01", "-95,5", ""]);
        let row = parse_record(&r, 0, &roles()).unwrap();
        assert_eq!(row.lat, 48.15);
        assert_eq!(row.rsrp, -95.5);
        assert_eq!(row.sinr, None);
        assert_eq!(row.pci, None);
        assert_eq!(row.operator, OperatorKey::new("231", "1"));
    }

    #[test]
    fn test_parse_record_issues() {
        let r = roles();
        let cases = [
            (["48.1", "17.1", "1800", "1", "231", "1", "", "1"], RowIssue::MissingRsrp),
            (["x", "17.1", "1800", "1", "231", "1", "-90", "1"], RowIssue::BadLatitude),
            (["48.1", "", "1800", "1", "231", "1", "-90", "1"], RowIssue::BadLongitude),
            (["48.1", "17.1", "1800", "1", "", "1", "-90", "1"], RowIssue::MissingOperator),
            (["48.1", "17.1", " ", "1", "231", "1", "-90", "1"], RowIssue::MissingCarrier),
        ];
        for (values, expected) in cases {
            assert_eq!(parse_record(&record(1, &values), 0, &r), Err(expected));
        }
    }

    #[test]
    fn test_derive_counts_drops_and_keeps_order() {
        let source = RowSource {
            header: vec![],
            columns: vec![],
            header_line: 0,
            records: vec![
                record(1, &["48.10", "17.10", "1800", "1", "231", "1", "-90", "3"]),
                record(2, &["48.10", "17.10", "1800", "1", "231", "1", "", "3"]),
                record(3, &["48.11", "17.10", "1800", "1", "231", "1", "-91", "3"]),
            ],
        };
        let derived = derive_measurements(&source, &roles(), &Krovak::new(), &CancelToken::new()).unwrap();
        assert_eq!(derived.measurements.len(), 2);
        assert_eq!(derived.drops.missing_rsrp, 1);
        assert_eq!(derived.drops.total(), 1);
        assert_eq!(derived.measurements[0].source_row, 1);
        assert_eq!(derived.measurements[1].source_row, 3);
        assert_eq!(derived.measurements[1].record, 2);
    }

    #[test]
    fn test_derive_honours_cancellation() {
        let source = RowSource {
            records: vec![record(1, &["48.10", "17.10", "1800", "1", "231", "1", "-90", "3"])],
            ..Default::default()
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = derive_measurements(&source, &roles(), &Krovak::new(), &cancel);
        assert!(matches!(result, Err(EngineError::Cancelled { .. })));
    }
}
