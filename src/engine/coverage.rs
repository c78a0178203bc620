use crate::engine::types::Coverage;
use serde::{Deserialize, Serialize};

/// RSRP value given to partitions that have no measurements. Low enough to
/// classify as [`Coverage::Bad`] under any sane threshold.
pub const SENTINEL_RSRP: f64 = -174.0;

/// Signal thresholds separating good from bad coverage (inclusive lower bounds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub rsrp: f64,
    pub sinr: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            rsrp: -110.0,
            sinr: -5.0,
        }
    }
}

/// Classifies averaged signal metrics.
///
/// | Condition                                            | Verdict |
/// |------------------------------------------------------|---------|
/// | rsrp >= rsrp threshold and (no SINR or sinr >= sinr threshold) | Good |
/// | anything else                                        | Bad     |
pub fn classify(rsrp_avg: f64, sinr_avg: Option<f64>, thresholds: &Thresholds) -> Coverage {
    let rsrp_ok = rsrp_avg >= thresholds.rsrp;
    let sinr_ok = sinr_avg.is_none_or(|s| s >= thresholds.sinr);
    if rsrp_ok && sinr_ok {
        Coverage::Good
    } else {
        Coverage::Bad
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_boundaries_inclusive() {
        let t = Thresholds::default();
        assert_eq!(classify(-110.0, Some(-5.0), &t), Coverage::Good);
        assert_eq!(classify(-110.0, None, &t), Coverage::Good);
        assert_eq!(classify(-110.01, None, &t), Coverage::Bad);
        assert_eq!(classify(-90.0, Some(-5.01), &t), Coverage::Bad);
    }

    #[test]
    fn test_sentinel_is_bad() {
        let t = Thresholds::default();
        assert_eq!(classify(SENTINEL_RSRP, None, &t), Coverage::Bad);
    }
}
