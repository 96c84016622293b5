//! Reading of the analysis engine summary.
//!
//! The engine writes `<TIC>_analysis_summary.csv`: two preamble rows, then one
//! `name,val,desc` row per quantity. The ones consumed here are
//!
//! | name                  | meaning                                         |
//! |-----------------------|-------------------------------------------------|
//! | `t_mean`              | reference epoch (BTJD)                          |
//! | `period`, `p_err`     | orbital period and its uncertainty (days)       |
//! | `t_1`, `t_2`          | primary / secondary eclipse time, from `t_mean` |
//! | `t_1_1`, `t_1_2`      | primary eclipse first and last contact          |
//! | `t_2_1`, `t_2_2`      | secondary eclipse first and last contact        |
//!
//! each with an optional `<name>_err` companion. A value that is missing, unparseable or
//! exactly zero counts as absent, zero being what the engine reports when it could not
//! determine a quantity.
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::ops::{Add, Mul, Sub};

use camino::Utf8Path;
use tracing::{debug, info};

use crate::constants::{Btjd, Days};
use crate::pipeline_errors::PipelineError;

/// Value with a one-sigma uncertainty, combined in quadrature.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Measurement {
    pub value: f64,
    pub error: f64,
}

impl Measurement {
    pub fn new(value: f64, error: f64) -> Self {
        Measurement {
            value,
            error: error.abs(),
        }
    }
}

impl Add for Measurement {
    type Output = Measurement;

    fn add(self, rhs: Self) -> Self::Output {
        Measurement::new(self.value + rhs.value, self.error.hypot(rhs.error))
    }
}

impl Sub for Measurement {
    type Output = Measurement;

    fn sub(self, rhs: Self) -> Self::Output {
        Measurement::new(self.value - rhs.value, self.error.hypot(rhs.error))
    }
}

impl Mul<f64> for Measurement {
    type Output = Measurement;

    fn mul(self, rhs: f64) -> Self::Output {
        Measurement::new(self.value * rhs, self.error * rhs)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}±{:.6}", self.value, self.error)
    }
}

/// One eclipse usable for masking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Eclipse {
    /// 1 for the primary, 2 for the secondary
    pub index: u8,
    /// Mid-eclipse time (BTJD)
    pub time: Measurement,
    /// Full duration (days), already scaled
    pub duration: Measurement,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSummary {
    pub reference_time: Option<Measurement>,
    pub period: Option<Measurement>,
    pub eclipses: Vec<Eclipse>,
}

impl AnalysisSummary {
    /// Read the summary file at `path`.
    ///
    /// Arguments
    /// -----------------
    /// * `path`: `<TIC>_analysis_summary.csv`.
    /// * `duration_scale`: multiplier applied to the eclipse durations.
    ///
    /// Return
    /// ----------
    /// * The parsed summary, possibly without any eclipse.
    /// * A [`PipelineError::SummaryFormat`] when the file is not a summary.
    pub fn read(path: &Utf8Path, duration_scale: f64) -> Result<Self, PipelineError> {
        let file = std::fs::File::open(path)
            .map_err(|e| PipelineError::SummaryFormat(format!("{path}: {e}")))?;
        let summary = Self::parse(file, duration_scale)?;
        info!(
            "{}: reference time {}, period {}, {} eclipse(s)",
            path.file_name().unwrap_or(path.as_str()),
            summary.reference_time.map_or("n/a".into(), |t| t.to_string()),
            summary.period.map_or("n/a".into(), |p| p.to_string()),
            summary.eclipses.len()
        );
        Ok(summary)
    }

    pub fn parse<R: Read>(input: R, duration_scale: f64) -> Result<Self, PipelineError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(input);

        let mut values: HashMap<String, String> = HashMap::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record?;
            if idx < 2 {
                continue;
            }
            if let (Some(name), Some(val)) = (record.get(0), record.get(1)) {
                values.insert(name.to_string(), val.to_string());
            }
        }
        if values.is_empty() {
            return Err(PipelineError::SummaryFormat(
                "no name,val rows after the preamble".into(),
            ));
        }

        let number = |key: &str| -> Option<f64> {
            values
                .get(key)
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v != 0.0)
        };
        let measurement = |key: &str, err_key: &str| -> Option<Measurement> {
            number(key).map(|value| Measurement::new(value, number(err_key).unwrap_or(0.0)))
        };
        let with_err = |key: &str| measurement(key, &format!("{key}_err"));

        let reference_time = with_err("t_mean");
        let period = measurement("period", "p_err");

        let mut eclipses = Vec::new();
        match reference_time {
            Some(t0) => {
                for index in [1u8, 2] {
                    let key = format!("t_{index}");
                    match (
                        with_err(&key),
                        with_err(&format!("{key}_1")),
                        with_err(&format!("{key}_2")),
                    ) {
                        (Some(offset), Some(first), Some(last)) => eclipses.push(Eclipse {
                            index,
                            time: t0 + offset,
                            duration: (last - first) * duration_scale,
                        }),
                        _ => debug!("eclipse {key} lacks a time or contact point, not used"),
                    }
                }
            }
            None => debug!("no reference time in the summary, no eclipse can be placed"),
        }

        Ok(AnalysisSummary {
            reference_time,
            period,
            eclipses,
        })
    }

    /// Summary period, or `fallback` (typically the catalogue period) when the engine gave none.
    pub fn period_or(&self, fallback: Option<Days>) -> Option<Days> {
        self.period.map(|p| p.value).or(fallback)
    }

    /// Mid-eclipse times and durations, ready for masking.
    pub fn eclipse_windows(&self) -> Vec<(Btjd, Days)> {
        self.eclipses
            .iter()
            .map(|e| (e.time.value, e.duration.value))
            .collect()
    }
}

/// Echo the engine log at debug level, one event per line.
pub fn echo_analysis_log(path: &Utf8Path) {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
                debug!(target: "platodebs::engine_log", "{line}");
            }
        }
        Err(_) => debug!("engine log {path} not found"),
    }
}

#[cfg(test)]
mod summary_test {
    use super::*;
    use approx::assert_relative_eq;

    const SUMMARY: &str = "\
# eclipse analysis summary
name,value,description
t_mean,1500.0,mean time reference
t_mean_err,0.001,error
period,2.5,orbital period
p_err,0.0004,period error
t_1,0.25,primary eclipse time
t_1_err,0.002,
t_1_1,0.2,first contact
t_1_2,0.3,last contact
t_2,1.5,secondary eclipse time
t_2_1,0.0,not found
t_2_2,1.55,last contact\n";

    #[test]
    fn test_parse_summary() {
        let summary = AnalysisSummary::parse(SUMMARY.as_bytes(), 1.0).unwrap();

        let period = summary.period.unwrap();
        assert_eq!(period.value, 2.5);
        assert_eq!(period.error, 0.0004);

        // secondary dropped: its first contact is zero
        assert_eq!(summary.eclipses.len(), 1);
        let primary = summary.eclipses[0];
        assert_eq!(primary.index, 1);
        assert_relative_eq!(primary.time.value, 1500.25);
        assert_relative_eq!(
            primary.time.error,
            (0.001f64.powi(2) + 0.002f64.powi(2)).sqrt(),
            epsilon = 1e-12
        );
        assert_relative_eq!(primary.duration.value, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_duration_scale() {
        let summary = AnalysisSummary::parse(SUMMARY.as_bytes(), 1.5).unwrap();
        assert_relative_eq!(summary.eclipses[0].duration.value, 0.15, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_reference_time_and_period() {
        let text = "pre\npre\nperiod,0,\nt_1,0.2,\nt_1_1,0.1,\nt_1_2,0.3,\n";
        let summary = AnalysisSummary::parse(text.as_bytes(), 1.0).unwrap();
        assert_eq!(summary.period, None);
        assert!(summary.eclipses.is_empty());
        assert_eq!(summary.period_or(Some(3.2)), Some(3.2));
        assert_eq!(summary.period_or(None), None);
    }

    #[test]
    fn test_empty_summary_is_an_error() {
        let err = AnalysisSummary::parse("a\nb\n".as_bytes(), 1.0).unwrap_err();
        assert!(matches!(err, PipelineError::SummaryFormat(_)));
    }
}
