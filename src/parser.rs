//! Semicolon-delimited measurement export reader.
//!
//! Drive-test tools prepend a metadata block before the real table, so the
//! header is located by shape: the first wide line followed by more lines of
//! similar width.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

/// Minimum number of columns a line needs to be considered a table header.
const MIN_HEADER_COLUMNS: usize = 6;

/// Non-empty lines inspected after a header candidate.
const HEADER_LOOKAHEAD: usize = 25;

/// Column holding a row number assigned by an earlier rewrite step.
pub const SOURCE_ROW_COLUMN: &str = "original_excel_row";

/// One data line of the input table.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    /// 1-based row number reported back to the user.
    pub source_row: usize,
    /// Field values, padded or truncated to the table width.
    pub values: Vec<String>,
}

impl SourceRecord {
    pub fn get(&self, idx: usize) -> &str {
        self.values.get(idx).map(String::as_str).unwrap_or("")
    }
}

/// The parsed input table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSource {
    /// Header fields as they appeared in the file.
    pub header: Vec<String>,
    /// Unique column names, one per table column.
    pub columns: Vec<String>,
    /// Zero-based line index of the header.
    pub header_line: usize,
    pub records: Vec<SourceRecord>,
}

/// Reads and parses a measurement export from disk.
pub fn load_rows(path: &Path) -> Result<RowSource> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    parse_rows(&bytes)
}

/// Parses a measurement export.
///
/// Invalid UTF-8 is replaced rather than rejected.
pub fn parse_rows(bytes: &[u8]) -> Result<RowSource> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    // (zero-based line, fields)
    let mut lines: Vec<(usize, Vec<String>)> = Vec::new();
    for result in rdr.byte_records() {
        let record = result?;
        // The reader skips empty lines without counting them, so the raw line
        // index comes from the byte offset.
        let line = record
            .position()
            .map(|p| raw_line_at(bytes, p.byte() as usize))
            .unwrap_or(lines.len());
        let mut fields: Vec<String> = record
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect();
        while fields.last().is_some_and(|f| f.is_empty()) {
            fields.pop();
        }
        if fields.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        lines.push((line, fields));
    }

    if lines.is_empty() {
        return Ok(RowSource::default());
    }

    let header_idx = find_tabular_header(&lines).unwrap_or(0);
    let (header_line, header_fields) = &lines[header_idx];
    let header: Vec<String> = header_fields.iter().map(|h| h.trim().to_string()).collect();

    let data = &lines[header_idx + 1..];
    let width = data
        .iter()
        .map(|(_, f)| f.len())
        .chain(std::iter::once(header.len()))
        .max()
        .unwrap_or(0)
        .max(1);

    let mut padded_header = header.clone();
    for i in padded_header.len()..width {
        padded_header.push(format!("extra_col_{}", i - header.len() + 1));
    }
    let columns = make_unique_column_names(&padded_header);
    let row_number_idx = columns.iter().position(|c| c == SOURCE_ROW_COLUMN);

    let records = data
        .iter()
        .enumerate()
        .map(|(i, (_, fields))| {
            let mut values = fields.clone();
            values.resize(width, String::new());
            let source_row = row_number_idx
                .and_then(|idx| values[idx].trim().parse::<usize>().ok())
                .unwrap_or(i + header_line + 1);
            SourceRecord { source_row, values }
        })
        .collect::<Vec<_>>();

    debug!(
        header_line,
        columns = columns.len(),
        records = records.len(),
        "Parsed measurement table"
    );

    Ok(RowSource {
        header,
        columns,
        header_line: *header_line,
        records,
    })
}

/// Zero-based raw line index of the byte at `offset`, blank lines included.
fn raw_line_at(bytes: &[u8], offset: usize) -> usize {
    bytes[..offset.min(bytes.len())]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
}

/// Index into `lines` of the table header, if any line is wide enough.
fn find_tabular_header(lines: &[(usize, Vec<String>)]) -> Option<usize> {
    let mut first_candidate = None;
    for (i, (_, fields)) in lines.iter().enumerate() {
        if fields.len() < MIN_HEADER_COLUMNS {
            continue;
        }
        first_candidate.get_or_insert(i);
        if has_tabular_followup(lines, i, fields.len()) {
            return Some(i);
        }
    }
    first_candidate
}

fn has_tabular_followup(lines: &[(usize, Vec<String>)], start: usize, expected: usize) -> bool {
    let threshold = MIN_HEADER_COLUMNS.max(expected.saturating_sub(1));
    lines[start + 1..]
        .iter()
        .take(HEADER_LOOKAHEAD)
        .filter(|(_, fields)| fields.len() >= threshold)
        .nth(1)
        .is_some()
}

fn make_unique_column_names(columns: &[String]) -> Vec<String> {
    let mut seen: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    columns
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let base = match raw.trim() {
                "" => format!("column_{}", i + 1),
                s => s.to_string(),
            };
            let n = seen.entry(base.clone()).or_insert(0);
            *n += 1;
            if *n == 1 { base } else { format!("{}_{}", base, n) }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_bytes_returns_empty_source() {
        let source = parse_rows(&[]).unwrap();
        assert!(source.columns.is_empty());
        assert!(source.records.is_empty());
    }

    #[test]
    fn test_skips_metadata_preamble() {
        let text = "Export;v2\nDevice;XYZ\n\nLatitude;Longitude;EARFCN;PCI;MCC;MNC;RSRP\n48,1;17,1;1800;12;231;1;-95\n48,2;17,2;1800;12;231;1;-96\n";
        let source = parse_rows(text.as_bytes()).unwrap();
        assert_eq!(source.header_line, 3);
        assert_eq!(source.columns[0], "Latitude");
        assert_eq!(source.records.len(), 2);
        assert_eq!(source.records[0].source_row, 4);
        assert_eq!(source.records[1].get(0), "48,2");
    }

    #[test]
    fn test_blank_lines_before_header_count_as_lines() {
        let text = "meta;x\n\nA;B;C;D;E;F\n1;2;3;4;5;6\n1;2;3;4;5;6\n1;2;3;4;5;6\n";
        let source = parse_rows(text.as_bytes()).unwrap();
        assert_eq!(source.header_line, 2);
        let rows: Vec<usize> = source.records.iter().map(|r| r.source_row).collect();
        assert_eq!(rows, vec![3, 4, 5]);
    }

    #[test]
    fn test_several_blank_lines_in_preamble_and_data() {
        let text = "Export;v2\n\n\n\n\nA;B;C;D;E;F\n1;2;3;4;5;6\n\n7;8;9;10;11;12\n";
        let source = parse_rows(text.as_bytes()).unwrap();
        assert_eq!(source.header_line, 5);
        assert_eq!(source.records.len(), 2);
        // Data rows are numbered over non-blank lines after the header.
        assert_eq!(source.records[0].source_row, 6);
        assert_eq!(source.records[1].source_row, 7);
        assert_eq!(source.records[1].get(0), "7");
    }

    #[test]
    fn test_raw_line_at_counts_newlines() {
        assert_eq!(raw_line_at(b"a\n\nb", 3), 2);
        assert_eq!(raw_line_at(b"a", 10), 0);
    }

    #[test]
    fn test_pads_short_rows_and_extends_header() {
        let text = "A;B;C;D;E;F\n1;2;3;4;5;6;7\n1;2;3\n";
        let source = parse_rows(text.as_bytes()).unwrap();
        assert_eq!(source.columns.len(), 7);
        assert_eq!(source.columns[6], "extra_col_1");
        assert_eq!(source.header.len(), 6);
        assert_eq!(source.records[1].values.len(), 7);
        assert_eq!(source.records[1].get(5), "");
    }

    #[test]
    fn test_duplicate_and_blank_headers_become_unique() {
        let names = make_unique_column_names(&[
            "RSRP".to_string(),
            "".to_string(),
            "RSRP".to_string(),
        ]);
        assert_eq!(names, vec!["RSRP", "column_2", "RSRP_2"]);
    }

    #[test]
    fn test_source_row_column_overrides_numbering() {
        let text = "A;B;C;D;E;original_excel_row\n1;2;3;4;5;17\n1;2;3;4;5;x\n";
        let source = parse_rows(text.as_bytes()).unwrap();
        assert_eq!(source.records[0].source_row, 17);
        assert_eq!(source.records[1].source_row, 2);
    }
}
