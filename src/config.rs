//! Run configuration.
//!
//! Values come from built-in defaults, then an optional JSON file, then CLI
//! flags. A config file looks like:
//! ```json
//! {
//!   "cell_size_m": 50,
//!   "mode": "grid-center",
//!   "rsrp_threshold": -105,
//!   "generate_empty_partitions": true,
//!   "extra_operators": ["231:3", { "mcc": "231", "mnc": "6", "pci": "12" }],
//!   "column_mapping": { "rsrp": "SSS-RSRP", "latitude": 0 }
//! }
//! ```

use crate::engine::coverage::Thresholds;
use crate::engine::types::OperatorKey;
use crate::error::ConfigError;
use crate::mapping::{ColumnRef, Role};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// How measurements are partitioned and where a partition is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZoneMode {
    /// Square grid, displayed at the cell centre.
    GridCenter,
    /// Square grid, displayed at the cell minimum corner.
    GridFirst,
    /// Fixed-length segments along the measurement path.
    #[default]
    Segments,
}

impl ZoneMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneMode::GridCenter => "grid-center",
            ZoneMode::GridFirst => "grid-first",
            ZoneMode::Segments => "segments",
        }
    }
}

impl fmt::Display for ZoneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grid-center" | "center" => Ok(ZoneMode::GridCenter),
            "grid-first" | "first" => Ok(ZoneMode::GridFirst),
            "segments" | "segment" => Ok(ZoneMode::Segments),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

/// An operator supplied by the caller for backfill, written `MCC:MNC[:PCI]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ExtraOperatorSpec", into = "String")]
pub struct ExtraOperator {
    pub mcc: String,
    pub mnc: String,
    pub pci: Option<String>,
}

impl ExtraOperator {
    pub fn key(&self) -> OperatorKey {
        OperatorKey::new(&self.mcc, &self.mnc)
    }

    fn checked(input: &str, mcc: &str, mnc: &str, pci: Option<&str>) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidOperator {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

        let (mcc, mnc) = (mcc.trim(), mnc.trim());
        if !digits(mcc) {
            return Err(invalid("MCC must be digits"));
        }
        if !digits(mnc) {
            return Err(invalid("MNC must be digits"));
        }
        let pci = match pci.map(str::trim) {
            None | Some("") => None,
            Some(p) if digits(p) => Some(p.to_string()),
            Some(_) => return Err(invalid("PCI must be digits")),
        };
        Ok(Self {
            mcc: mcc.to_string(),
            mnc: mnc.to_string(),
            pci,
        })
    }
}

impl FromStr for ExtraOperator {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        match parts.as_slice() {
            [mcc, mnc] => Self::checked(s, mcc, mnc, None),
            [mcc, mnc, pci] => Self::checked(s, mcc, mnc, Some(pci)),
            _ => Err(ConfigError::InvalidOperator {
                input: s.to_string(),
                reason: "expected MCC:MNC or MCC:MNC:PCI".to_string(),
            }),
        }
    }
}

impl fmt::Display for ExtraOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pci {
            Some(pci) => write!(f, "{}:{}:{}", self.mcc, self.mnc, pci),
            None => write!(f, "{}:{}", self.mcc, self.mnc),
        }
    }
}

impl From<ExtraOperator> for String {
    fn from(op: ExtraOperator) -> Self {
        op.to_string()
    }
}

/// Accepted JSON shapes for an extra operator.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExtraOperatorSpec {
    Text(String),
    Fields {
        mcc: String,
        mnc: String,
        #[serde(default)]
        pci: Option<String>,
    },
}

impl TryFrom<ExtraOperatorSpec> for ExtraOperator {
    type Error = ConfigError;

    fn try_from(spec: ExtraOperatorSpec) -> Result<Self, Self::Error> {
        match spec {
            ExtraOperatorSpec::Text(s) => s.parse(),
            ExtraOperatorSpec::Fields { mcc, mnc, pci } => {
                let input = format!("{}:{}", mcc, mnc);
                Self::checked(&input, &mcc, &mnc, pci.as_deref())
            }
        }
    }
}

/// Everything the engine needs to know before reading the first row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub cell_size_m: f64,
    pub mode: ZoneMode,
    pub rsrp_threshold: f64,
    pub sinr_threshold: f64,
    pub generate_empty_partitions: bool,
    pub extra_operators: Vec<ExtraOperator>,
    /// Slack added to cumulative distances before flooring them to a segment.
    pub boundary_tolerance: f64,
    /// Role name to column index or header name; unmapped roles are guessed
    /// from the header.
    pub column_mapping: BTreeMap<String, ColumnRef>,
    pub output_suffix: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        let thresholds = Thresholds::default();
        Self {
            cell_size_m: 100.0,
            mode: ZoneMode::default(),
            rsrp_threshold: thresholds.rsrp,
            sinr_threshold: thresholds.sinr,
            generate_empty_partitions: false,
            extra_operators: Vec::new(),
            boundary_tolerance: 1e-9,
            column_mapping: BTreeMap::new(),
            output_suffix: None,
        }
    }
}

impl ProcessingConfig {
    /// Loads a config from a JSON file at `path`. Missing fields keep their
    /// defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: ProcessingConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.cell_size_m.is_finite() || self.cell_size_m <= 0.0 {
            return Err(ConfigError::InvalidCellSize(self.cell_size_m));
        }
        if !self.boundary_tolerance.is_finite() || self.boundary_tolerance < 0.0 {
            return Err(ConfigError::InvalidTolerance(self.boundary_tolerance));
        }
        for (field, value) in [("rsrp", self.rsrp_threshold), ("sinr", self.sinr_threshold)] {
            if !value.is_finite() {
                return Err(ConfigError::InvalidThreshold { field, value });
            }
        }
        for role in self.column_mapping.keys() {
            role.parse::<Role>()?;
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            rsrp: self.rsrp_threshold,
            sinr: self.sinr_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ProcessingConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.mode, ZoneMode::Segments);
        assert_eq!(config.cell_size_m, 100.0);
        assert_eq!(config.boundary_tolerance, 1e-9);
    }

    #[test]
    fn test_validate_rejects_bad_cell_size() {
        for cell in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let config = ProcessingConfig {
                cell_size_m: cell,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(ConfigError::InvalidCellSize(_))));
        }
    }

    #[test]
    fn test_validate_rejects_unknown_mapping_role() {
        let mut config = ProcessingConfig::default();
        config
            .column_mapping
            .insert("height".to_string(), ColumnRef::Index(3));
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownRole("height".to_string()))
        );
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("grid-center".parse::<ZoneMode>(), Ok(ZoneMode::GridCenter));
        assert_eq!("Grid-First".parse::<ZoneMode>(), Ok(ZoneMode::GridFirst));
        assert_eq!("segments".parse::<ZoneMode>(), Ok(ZoneMode::Segments));
        assert_eq!(
            "hexagons".parse::<ZoneMode>(),
            Err(ConfigError::UnknownMode("hexagons".to_string()))
        );
    }

    #[test]
    fn test_extra_operator_parsing() {
        let op: ExtraOperator = "231:06:15".parse().unwrap();
        assert_eq!(op.pci.as_deref(), Some("15"));
        assert_eq!(op.key(), OperatorKey::new("231", "6"));
        assert_eq!(op.to_string(), "231:06:15");

        let op: ExtraOperator = " 231:3 ".parse().unwrap();
        assert_eq!(op.pci, None);

        for bad in ["231", "231:x", "a:1", "231:1:p", "1:2:3:4", "231:"] {
            assert!(
                matches!(bad.parse::<ExtraOperator>(), Err(ConfigError::InvalidOperator { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_config_json_accepts_both_operator_shapes() {
        let json = r#"{
            "cell_size_m": 50,
            "mode": "grid-first",
            "extra_operators": ["231:3", {"mcc": "231", "mnc": "6", "pci": "12"}],
            "column_mapping": {"rsrp": "SSS-RSRP", "latitude": 0}
        }"#;
        let config: ProcessingConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.cell_size_m, 50.0);
        assert_eq!(config.mode, ZoneMode::GridFirst);
        assert_eq!(config.rsrp_threshold, -110.0);
        assert_eq!(config.extra_operators.len(), 2);
        assert_eq!(config.extra_operators[1].pci.as_deref(), Some("12"));
        assert_eq!(config.column_mapping["latitude"], ColumnRef::Index(0));
    }

    #[test]
    fn test_config_json_rejects_malformed_operator() {
        let json = r#"{"extra_operators": ["231-3"]}"#;
        assert!(serde_json::from_str::<ProcessingConfig>(json).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"rsrp_threshold": -100.5}"#).unwrap();
        let config = ProcessingConfig::load(&path).unwrap();
        assert_eq!(config.rsrp_threshold, -100.5);
        assert_eq!(config.mode, ZoneMode::Segments);
    }
}
