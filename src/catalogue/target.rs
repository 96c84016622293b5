use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::CatalogueColumns;
use crate::constants::{Days, FALLBACK_PERIOD};
use crate::pipeline_errors::PipelineError;

static TIC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?i:tic)?[\s_-]*0*(\d+)\s*$").expect("TIC pattern is a valid regex")
});

/// TESS Input Catalog number.
///
/// Parsed from `"TIC 0012345"`, `"tic12345"`, `"TIC-12345"` or a bare `"12345"`;
/// displayed in canonical form `TIC12345`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TicId(pub u64);

impl TicId {
    /// Name of the per-target download / results directory (`0000012345`).
    pub fn padded(&self) -> String {
        format!("{:010}", self.0)
    }
}

impl FromStr for TicId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = TIC_PATTERN
            .captures(s)
            .and_then(|c| c.get(1))
            .ok_or_else(|| PipelineError::CatalogueFormat(format!("'{s}' is not a TIC identifier")))?;
        digits
            .as_str()
            .parse()
            .map(TicId)
            .map_err(|e| PipelineError::CatalogueFormat(format!("'{s}': {e}")))
    }
}

impl fmt::Display for TicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TIC{}", self.0)
    }
}

/// One row of the target roster.
///
/// Immutable once loaded; every column of the roster that is not interpreted here is kept
/// verbatim in `extra` so it can be written back alongside the download milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRecord {
    /// Roster key (the `Star` column by default)
    pub identifier: String,
    pub tic: TicId,
    /// Expected orbital period, when the roster gives one
    pub period: Option<Days>,
    pub ra: Option<f64>,
    pub dec: Option<f64>,
    pub priority: Option<f64>,
    #[serde(default)]
    pub extra: BTreeMap<String, Option<String>>,
}

impl TargetRecord {
    /// Minimal record, mostly useful for tests and programmatic rosters.
    pub fn new(identifier: impl Into<String>, tic: TicId, period: Option<Days>) -> Self {
        TargetRecord {
            identifier: identifier.into(),
            tic,
            period,
            ra: None,
            dec: None,
            priority: None,
            extra: BTreeMap::new(),
        }
    }

    /// Period used by the selection policy, falling back to one day.
    pub fn period_or_default(&self) -> Days {
        self.period.unwrap_or(FALLBACK_PERIOD)
    }

    /// Does an allow-list entry designate this target?
    ///
    /// An entry matches on the exact identifier, or on the TIC number when the entry itself
    /// parses as a TIC identifier.
    pub fn matches(&self, key: &str) -> bool {
        if self.identifier == key.trim() {
            return true;
        }
        key.parse::<TicId>().is_ok_and(|tic| tic == self.tic)
    }

    /// Value of a roster column, interpreted or not, as text.
    ///
    /// Interpreted columns are recognised under the names configured in `columns`.
    pub fn column_value(&self, column: &str, columns: &CatalogueColumns) -> Option<String> {
        let text = |v: Option<f64>| v.map(|v| v.to_string());
        if column == columns.identifier {
            Some(self.identifier.clone())
        } else if column == columns.tic {
            Some(self.tic.0.to_string())
        } else if column == columns.period {
            text(self.period)
        } else if column == columns.ra {
            text(self.ra)
        } else if column == columns.dec {
            text(self.dec)
        } else if column == columns.priority {
            text(self.priority)
        } else {
            self.extra.get(column).cloned().flatten()
        }
    }
}

impl fmt::Display for TargetRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.identifier == self.tic.to_string() {
            write!(f, "{}", self.identifier)
        } else {
            write!(f, "{} ({})", self.identifier, self.tic)
        }
    }
}

#[cfg(test)]
mod target_test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("TIC 12345", 12345)]
    #[case("tic12345", 12345)]
    #[case("TIC-0000012345", 12345)]
    #[case(" 12345 ", 12345)]
    #[case("0000350348", 350348)]
    fn test_parse_tic(#[case] input: &str, #[case] expected: u64) {
        assert_eq!(input.parse::<TicId>().unwrap(), TicId(expected));
    }

    #[rstest]
    #[case("V* CW Eri")]
    #[case("TIC")]
    #[case("")]
    fn test_reject_non_tic(#[case] input: &str) {
        assert!(input.parse::<TicId>().is_err());
    }

    #[test]
    fn test_tic_display_and_padding() {
        let tic = TicId(98853987);
        assert_eq!(tic.to_string(), "TIC98853987");
        assert_eq!(tic.padded(), "0098853987");
    }

    #[test]
    fn test_matches_identifier_or_tic() {
        let target = TargetRecord::new("CW Eri", TicId(98853987), Some(2.73));
        assert!(target.matches("CW Eri"));
        assert!(target.matches("TIC 98853987"));
        assert!(target.matches("98853987"));
        assert!(!target.matches("CW"));
        assert!(!target.matches("TIC 1"));
    }

    #[test]
    fn test_column_value_follows_configured_names() {
        let mut target = TargetRecord::new("CW Eri", TicId(98853987), Some(2.73));
        target.priority = Some(1.0);
        target.extra.insert("Period".into(), Some("raw".into()));
        let columns = CatalogueColumns {
            period: "P".into(),
            priority: "Rank".into(),
            ..CatalogueColumns::default()
        };

        assert_eq!(target.column_value("P", &columns), Some("2.73".into()));
        assert_eq!(target.column_value("Rank", &columns), Some("1".into()));
        assert_eq!(target.column_value("Star", &columns), Some("CW Eri".into()));
        // the default name is now an ordinary passthrough column
        assert_eq!(target.column_value("Period", &columns), Some("raw".into()));
        assert_eq!(target.column_value("RA", &columns), None);
    }
}
