//! Risk verdict aggregation.
//!
//! Each data source may attach one green/amber/red indicator to its result.
//! The verdict is always derived from those indicators and never from the
//! result payload itself.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single source's indicator, as supplied by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskIndicator {
    pub source: String,
    pub indicator: String,
}

impl RiskIndicator {
    pub fn new(source: impl Into<String>, indicator: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            indicator: indicator.into(),
        }
    }
}

/// Indicator levels, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Green,
    Amber,
    Red,
}

impl RiskLevel {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "green" => Some(Self::Green),
            "amber" => Some(Self::Amber),
            "red" => Some(Self::Red),
            _ => None,
        }
    }
}

/// Aggregated verdict.
///
/// `NoVerdict` means no indicators were supplied. It is not a clean result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskVerdict {
    Green,
    Amber,
    Red,
    NoVerdict,
}

impl From<RiskLevel> for RiskVerdict {
    fn from(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Green => Self::Green,
            RiskLevel::Amber => Self::Amber,
            RiskLevel::Red => Self::Red,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskError {
    #[error("unrecognized risk indicator {value:?} from source {source_name}")]
    UnrecognizedIndicator { source_name: String, value: String },
}

/// Combine indicators into one verdict: red beats amber beats green.
///
/// Order-independent. An empty set yields [`RiskVerdict::NoVerdict`]. Any
/// indicator outside green/amber/red is an error rather than being ignored.
pub fn aggregate(indicators: &[RiskIndicator]) -> Result<RiskVerdict, RiskError> {
    let mut worst: Option<RiskLevel> = None;

    for item in indicators {
        let level =
            RiskLevel::parse(&item.indicator).ok_or_else(|| RiskError::UnrecognizedIndicator {
                source_name: item.source.clone(),
                value: item.indicator.clone(),
            })?;
        worst = Some(worst.map_or(level, |w| w.max(level)));
    }

    Ok(worst.map_or(RiskVerdict::NoVerdict, RiskVerdict::from))
}
