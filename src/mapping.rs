//! Column role mapping: which input column carries latitude, RSRP, MCC, ...

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Semantic role of an input column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Latitude,
    Longitude,
    Frequency,
    Pci,
    Mcc,
    Mnc,
    Rsrp,
    Sinr,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::Latitude,
        Role::Longitude,
        Role::Frequency,
        Role::Pci,
        Role::Mcc,
        Role::Mnc,
        Role::Rsrp,
        Role::Sinr,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Role::Latitude => "latitude",
            Role::Longitude => "longitude",
            Role::Frequency => "frequency",
            Role::Pci => "pci",
            Role::Mcc => "mcc",
            Role::Mnc => "mnc",
            Role::Rsrp => "rsrp",
            Role::Sinr => "sinr",
        }
    }

    /// Header names recognised for this role, in order of preference.
    fn header_candidates(&self) -> &'static [&'static str] {
        match self {
            Role::Latitude => &["Latitude"],
            Role::Longitude => &["Longitude"],
            Role::Frequency => &["NR-ARFCN", "EARFCN", "Frequency"],
            Role::Pci => &["PCI"],
            Role::Mcc => &["MCC"],
            Role::Mnc => &["MNC"],
            Role::Rsrp => &["SSS-RSRP", "RSRP"],
            Role::Sinr => &["SSS-SINR", "SINR"],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Role::ALL
            .into_iter()
            .find(|r| r.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownRole(s.to_string()))
    }
}

/// Reference to a column, either by zero-based position or by header name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnRef {
    Index(usize),
    Name(String),
}

impl FromStr for ColumnRef {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().parse::<usize>() {
            Ok(i) => ColumnRef::Index(i),
            Err(_) => ColumnRef::Name(s.trim().to_string()),
        })
    }
}

/// Resolved column positions for one input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnRoles {
    pub latitude: usize,
    pub longitude: usize,
    pub frequency: usize,
    pub pci: usize,
    pub mcc: usize,
    pub mnc: usize,
    pub rsrp: usize,
    pub sinr: Option<usize>,
}

fn normalize_header_token(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// Guesses column roles from header names, ignoring case and punctuation.
pub fn suggest_roles(columns: &[String]) -> BTreeMap<Role, usize> {
    let mut normalized: BTreeMap<String, usize> = BTreeMap::new();
    for (i, c) in columns.iter().enumerate() {
        normalized.entry(normalize_header_token(c)).or_insert(i);
    }

    let mut result = BTreeMap::new();
    for role in Role::ALL {
        let found = role
            .header_candidates()
            .iter()
            .find_map(|name| normalized.get(&normalize_header_token(name)));
        if let Some(&idx) = found {
            result.insert(role, idx);
        }
    }
    result
}

fn locate(columns: &[String], role: Role, column: &ColumnRef) -> Result<usize, ConfigError> {
    match column {
        ColumnRef::Index(index) if *index < columns.len() => Ok(*index),
        ColumnRef::Index(index) => Err(ConfigError::ColumnOutOfRange {
            role: role.name().to_string(),
            index: *index,
            width: columns.len(),
        }),
        ColumnRef::Name(name) => columns
            .iter()
            .position(|c| c == name)
            .or_else(|| {
                let wanted = normalize_header_token(name);
                columns
                    .iter()
                    .position(|c| normalize_header_token(c) == wanted)
            })
            .ok_or_else(|| ConfigError::UnknownColumn {
                role: role.name().to_string(),
                column: name.clone(),
            }),
    }
}

/// Combines header-based suggestions with explicit overrides (keyed by role
/// name) and checks that every required role is covered.
pub fn resolve_roles(
    columns: &[String],
    overrides: &BTreeMap<String, ColumnRef>,
) -> Result<ColumnRoles, ConfigError> {
    let mut roles = suggest_roles(columns);
    for (key, column) in overrides {
        let role: Role = key.parse()?;
        roles.insert(role, locate(columns, role, column)?);
    }

    let required = |role: Role| roles.get(&role).copied().ok_or(ConfigError::MissingColumn(role.name()));

    Ok(ColumnRoles {
        latitude: required(Role::Latitude)?,
        longitude: required(Role::Longitude)?,
        frequency: required(Role::Frequency)?,
        pci: required(Role::Pci)?,
        mcc: required(Role::Mcc)?,
        mnc: required(Role::Mnc)?,
        rsrp: required(Role::Rsrp)?,
        sinr: roles.get(&Role::Sinr).copied(),
    })
}
