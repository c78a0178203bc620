//! Measurement zoning and aggregation.
//!
//! Stages run in this order: measurement derivation (parse and project),
//! partitioning into zones or path segments, per-partition aggregation with
//! representative selection, and optional backfill of empty partitions.

pub mod aggregate;
pub mod backfill;
pub mod cancel;
pub mod coverage;
pub mod measurement;
pub mod partition;
pub mod projection;
pub mod types;
pub mod utility;
