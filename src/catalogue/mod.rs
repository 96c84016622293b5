//! # Target catalogue
//!
//! Loading of the eclipsing-binary roster that drives every stage of the pipeline.
//!
//! The roster is a comma separated file with a header row. Two columns are mandatory, the
//! target identifier (`Star` by default) and the expected orbital period in days (`Period`).
//! The TESS Input Catalog number is read from the `TIC` column when present and parsed from
//! the identifier otherwise. Any other column is carried through untouched in
//! [`TargetRecord::extra`].
//!
//! ## Workflow
//!
//! 1. [`load_catalogue`] parses the file into an ordered `Vec<TargetRecord>`.
//! 2. [`filter_targets`] keeps the rows designated by an allow-list (identifier or TIC).
//! 3. [`sort_targets`] optionally reorders by a column (`"Period"`, `"-Priority"`, …).
//!
//! [`load_targets`] chains the three steps from a [`PipelineConfig`].
//!
//! ## Errors
//!
//! Every malformed roster is reported as [`PipelineError::CatalogueFormat`], the only fatal
//! error of the pipeline.
pub mod reader;
pub mod target;

use std::cmp::Ordering;

use camino::Utf8Path;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::pipeline_errors::PipelineError;

pub use target::{TargetRecord, TicId};

/// Names of the roster columns interpreted by the loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogueColumns {
    pub identifier: String,
    pub tic: String,
    pub period: String,
    pub ra: String,
    pub dec: String,
    pub priority: String,
}

impl Default for CatalogueColumns {
    fn default() -> Self {
        CatalogueColumns {
            identifier: "Star".into(),
            tic: "TIC".into(),
            period: "Period".into(),
            ra: "RA".into(),
            dec: "Dec".into(),
            priority: "Priority".into(),
        }
    }
}

/// Parse the roster at `path`.
///
/// Arguments
/// -----------------
/// * `path`: CSV file with a header row.
/// * `columns`: names of the interpreted columns.
///
/// Return
/// ----------
/// * The targets, in file order, or [`PipelineError::CatalogueFormat`].
pub fn load_catalogue(
    path: &Utf8Path,
    columns: &CatalogueColumns,
) -> Result<Vec<TargetRecord>, PipelineError> {
    let targets = reader::read_catalogue_file(path, columns)?;
    info!(path = %path, targets = targets.len(), "catalogue loaded");
    Ok(targets)
}

/// Keep only the targets designated by `allow_list`, preserving roster order.
///
/// An empty allow-list keeps everything. Entries designating no target are logged.
pub fn filter_targets(targets: Vec<TargetRecord>, allow_list: &[String]) -> Vec<TargetRecord> {
    if allow_list.is_empty() {
        return targets;
    }

    let unmatched = allow_list
        .iter()
        .filter(|key| !targets.iter().any(|t| t.matches(key)))
        .collect_vec();
    if !unmatched.is_empty() {
        warn!(
            "{} requested target(s) not in the catalogue: {}",
            unmatched.len(),
            unmatched.iter().join(", ")
        );
    }

    targets
        .into_iter()
        .filter(|t| allow_list.iter().any(|key| t.matches(key)))
        .collect()
}

/// Sort order parsed from a `sort_by` value such as `"-Priority"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

impl SortKey {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (descending, column) = match raw.chars().next()? {
            '-' => (true, &raw[1..]),
            '+' => (false, &raw[1..]),
            _ => (false, raw),
        };
        let column = column.trim();
        (!column.is_empty()).then(|| SortKey {
            column: column.to_string(),
            descending,
        })
    }
}

/// Stable in-place sort of the targets by one roster column.
///
/// Values are compared numerically when every present value parses as a number, and as text
/// otherwise. Targets without a value come last whatever the direction. Interpreted columns
/// are looked up under the names given in `columns`.
pub fn sort_targets(
    targets: &mut [TargetRecord],
    key: &SortKey,
    columns: &CatalogueColumns,
) {
    let values = targets
        .iter()
        .map(|t| t.column_value(&key.column, columns))
        .collect_vec();
    let numeric = values
        .iter()
        .flatten()
        .all(|v| v.trim().parse::<f64>().is_ok());

    let compare_present = |a: &str, b: &str| -> Ordering {
        let ord = if numeric {
            let (x, y) = (a.trim().parse::<f64>(), b.trim().parse::<f64>());
            match (x, y) {
                (Ok(x), Ok(y)) => x.total_cmp(&y),
                _ => a.cmp(b),
            }
        } else {
            a.cmp(b)
        };
        if key.descending {
            ord.reverse()
        } else {
            ord
        }
    };

    let mut order = (0..targets.len()).collect_vec();
    order.sort_by(|&i, &j| match (&values[i], &values[j]) {
        (Some(a), Some(b)) => compare_present(a, b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    let sorted = order.iter().map(|&i| targets[i].clone()).collect_vec();
    targets.clone_from_slice(&sorted);
}

/// Load, filter and sort the roster designated by `config`.
pub fn load_targets(config: &PipelineConfig) -> Result<Vec<TargetRecord>, PipelineError> {
    let targets = load_catalogue(&config.input_file, &config.columns)?;
    let mut targets = filter_targets(targets, &config.targets);
    if let Some(key) = config.sort_by.as_deref().and_then(SortKey::parse) {
        sort_targets(&mut targets, &key, &config.columns);
    }
    info!("{} target(s) selected for processing", targets.len());
    Ok(targets)
}

#[cfg(test)]
mod catalogue_test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn roster() -> Vec<TargetRecord> {
        let csv = "\
Star,Period,Priority,Class
TIC 30,3.0,2,EA
TIC 10,,1,EB
TIC 20,1.5,,EA
TIC 40,12.0,3,EW\n";
        reader::parse_catalogue(csv.as_bytes(), &CatalogueColumns::default()).unwrap()
    }

    fn ids(targets: &[TargetRecord]) -> Vec<u64> {
        targets.iter().map(|t| t.tic.0).collect()
    }

    #[test]
    fn test_empty_filter_keeps_all() {
        assert_eq!(ids(&filter_targets(roster(), &[])), vec![30, 10, 20, 40]);
    }

    #[test]
    fn test_filter_preserves_roster_order() {
        let allow = vec!["TIC40".to_string(), "10".to_string(), "TIC 99".to_string()];
        assert_eq!(ids(&filter_targets(roster(), &allow)), vec![10, 40]);
    }

    #[test]
    fn test_sort_key_parsing() {
        assert_eq!(
            SortKey::parse("-Priority"),
            Some(SortKey {
                column: "Priority".into(),
                descending: true
            })
        );
        assert_eq!(SortKey::parse("+Period").map(|k| k.descending), Some(false));
        assert_eq!(SortKey::parse("Class").map(|k| k.column), Some("Class".into()));
        assert_eq!(SortKey::parse("-"), None);
        assert_eq!(SortKey::parse(""), None);
    }

    #[test]
    fn test_sort_numeric_absent_last() {
        let mut targets = roster();
        sort_targets(
            &mut targets,
            &SortKey::parse("Period").unwrap(),
            &CatalogueColumns::default(),
        );
        assert_eq!(ids(&targets), vec![20, 30, 40, 10]);

        sort_targets(
            &mut targets,
            &SortKey::parse("-Period").unwrap(),
            &CatalogueColumns::default(),
        );
        assert_eq!(ids(&targets), vec![40, 30, 20, 10]);
    }

    #[test]
    fn test_sort_text_is_stable() {
        let mut targets = roster();
        sort_targets(
            &mut targets,
            &SortKey::parse("Class").unwrap(),
            &CatalogueColumns::default(),
        );
        assert_eq!(ids(&targets), vec![30, 20, 10, 40]);
    }

    #[test]
    fn test_sort_with_renamed_columns() {
        let columns = CatalogueColumns {
            identifier: "Name".into(),
            period: "P".into(),
            ..CatalogueColumns::default()
        };
        let csv = "Name,P\nTIC 30,3.0\nTIC 10,\nTIC 20,1.5\nTIC 40,12.0\n";
        let mut targets = reader::parse_catalogue(csv.as_bytes(), &columns).unwrap();
        assert_eq!(targets[0].period, Some(3.0));

        sort_targets(&mut targets, &SortKey::parse("-P").unwrap(), &columns);
        assert_eq!(ids(&targets), vec![40, 30, 20, 10]);

        sort_targets(&mut targets, &SortKey::parse("Name").unwrap(), &columns);
        assert_eq!(ids(&targets), vec![10, 20, 30, 40]);
    }
}
