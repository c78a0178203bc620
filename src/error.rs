//! Error types for the zoning engine.
//!
//! Only configuration problems and whole-run conditions are errors. A single
//! bad row is never an error; it is dropped and counted (see
//! [`crate::engine::measurement::DropCounts`]).

use thiserror::Error;

/// Problems found while validating the run configuration, before any row is
/// read.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("cell_size_m must be a positive finite number, got {0}")]
    InvalidCellSize(f64),

    #[error("boundary_tolerance must be a finite number >= 0, got {0}")]
    InvalidTolerance(f64),

    #[error("{field} threshold must be finite, got {value}")]
    InvalidThreshold { field: &'static str, value: f64 },

    #[error("unknown mode '{0}', expected one of grid-center, grid-first, segments")]
    UnknownMode(String),

    #[error("invalid operator '{input}': {reason}")]
    InvalidOperator { input: String, reason: String },

    #[error("no column mapped for required role '{0}'")]
    MissingColumn(&'static str),

    #[error("column '{column}' for role '{role}' not found in header")]
    UnknownColumn { role: String, column: String },

    #[error("column index {index} for role '{role}' is out of range (file has {width} columns)")]
    ColumnOutOfRange {
        role: String,
        index: usize,
        width: usize,
    },

    #[error("unknown column role '{0}'")]
    UnknownRole(String),
}

/// Per-point projection failure. Callers drop the row and keep going.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    #[error("coordinate is not finite: ({0}, {1})")]
    NonFinite(f64, f64),

    #[error("projection produced a degenerate result for ({0}, {1})")]
    Degenerate(f64, f64),
}

/// Fatal run-level errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("no usable rows: {total} rows read, {dropped} dropped during parsing")]
    NoUsableRows { total: usize, dropped: usize },

    #[error("run cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
