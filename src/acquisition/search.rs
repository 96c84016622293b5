//! Search for the observation files of a target.
//!
//! The catalogue search service is an external collaborator, modelled by the
//! [`SearchClient`] trait. The shipped implementation, [`ListingSearchClient`], answers from a
//! CSV listing exported beforehand from the archive:
//!
//! ```text
//! target,mission,author,exptime,uri,sector
//! TIC 98853987,TESS,SPOC,120,https://archive/.../tess2019..._lc.fits,4
//! TIC 98853987,TESS,SPOC,20,https://archive/.../tess2020..._fast-lc.fits,31
//! ```
//!
//! Relative `uri` values are resolved against the directory of the listing file.
use std::fmt;
use std::io::Read;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalogue::TargetRecord;
use crate::constants::{FAST_CADENCE_MAX_S, SHORT_CADENCE_MAX_S};
use crate::pipeline_errors::PipelineError;

/// Cadence filter of the search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExposureTime {
    /// Below 60 s
    Fast,
    /// 60 s to 120 s inclusive
    Short,
    /// Above 120 s
    Long,
    /// Exactly this many seconds
    Seconds(f64),
}

impl ExposureTime {
    pub fn matches(&self, exptime_s: f64) -> bool {
        match self {
            ExposureTime::Fast => exptime_s < FAST_CADENCE_MAX_S,
            ExposureTime::Short => (FAST_CADENCE_MAX_S..=SHORT_CADENCE_MAX_S).contains(&exptime_s),
            ExposureTime::Long => exptime_s > SHORT_CADENCE_MAX_S,
            ExposureTime::Seconds(s) => (exptime_s - s).abs() < 1e-6,
        }
    }
}

impl FromStr for ExposureTime {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(ExposureTime::Fast),
            "short" => Ok(ExposureTime::Short),
            "long" => Ok(ExposureTime::Long),
            other => other
                .parse::<f64>()
                .ok()
                .filter(|v| *v > 0.0 && v.is_finite())
                .map(ExposureTime::Seconds)
                .ok_or_else(|| {
                    PipelineError::InvalidConfig(format!(
                        "exposure time '{s}' is neither fast, short, long nor a number of seconds"
                    ))
                }),
        }
    }
}

impl TryFrom<String> for ExposureTime {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ExposureTime> for String {
    fn from(value: ExposureTime) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ExposureTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExposureTime::Fast => f.write_str("fast"),
            ExposureTime::Short => f.write_str("short"),
            ExposureTime::Long => f.write_str("long"),
            ExposureTime::Seconds(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub mission: String,
    pub author: String,
    pub exptime: ExposureTime,
}

/// One observation file offered by the search service.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub uri: String,
    /// Name under which the file is stored locally
    pub file_name: String,
    pub exptime_s: Option<f64>,
    pub sector: Option<u32>,
}

impl SearchHit {
    /// Hit for `uri`, listed for `target`.
    ///
    /// Fails when the URI does not end in a usable file name.
    pub fn new(target: &str, uri: impl Into<String>) -> Result<Self, PipelineError> {
        let uri = uri.into();
        let file_name = file_name_of(&uri)
            .ok_or_else(|| {
                PipelineError::acquisition(target, format!("no file name in URI {uri:?}"))
            })?
            .to_string();
        Ok(SearchHit {
            uri,
            file_name,
            exptime_s: None,
            sector: None,
        })
    }
}

/// Last path component of a URI, query and fragment removed.
///
/// The name becomes a path inside the download directory, so an empty last component,
/// `.` and `..` are refused.
fn file_name_of(uri: &str) -> Option<&str> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name {
        "" | "." | ".." => None,
        _ => Some(name),
    }
}

/// Catalogue search collaborator.
pub trait SearchClient {
    /// Observation files available for `target` under `criteria`.
    ///
    /// An empty result is not an error.
    fn search(
        &self,
        target: &TargetRecord,
        criteria: &SearchCriteria,
    ) -> Result<Vec<SearchHit>, PipelineError>;
}

#[derive(Debug, Clone, Deserialize)]
struct ListingRow {
    target: String,
    mission: String,
    author: String,
    exptime: Option<f64>,
    uri: String,
    #[serde(default)]
    sector: Option<u32>,
}

/// [`SearchClient`] answering from a CSV listing.
#[derive(Debug, Clone, Default)]
pub struct ListingSearchClient {
    rows: Vec<ListingRow>,
}

impl ListingSearchClient {
    /// Load the listing at `path`; relative URIs are resolved against its directory.
    pub fn from_path(path: &Utf8Path) -> Result<Self, PipelineError> {
        let file = std::fs::File::open(path)?;
        let base = path.parent().map(Utf8Path::to_path_buf);
        Self::from_reader(file, base.as_deref())
    }

    /// Load a listing from any reader.
    ///
    /// Arguments
    /// -----------------
    /// * `input`: CSV with the columns `target,mission,author,exptime,uri` and optionally
    ///   `sector`.
    /// * `base`: directory relative URIs are resolved against.
    pub fn from_reader<R: Read>(input: R, base: Option<&Utf8Path>) -> Result<Self, PipelineError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(input);
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            let mut row: ListingRow = row?;
            if let Some(base) = base {
                row.uri = resolve_uri(&row.uri, base);
            }
            rows.push(row);
        }
        debug!("search listing holds {} entries", rows.len());
        Ok(ListingSearchClient { rows })
    }
}

fn resolve_uri(uri: &str, base: &Utf8Path) -> String {
    if uri.contains("://") || Utf8Path::new(uri).is_absolute() || base.as_str().is_empty() {
        uri.to_string()
    } else {
        Utf8PathBuf::from(base).join(uri).to_string()
    }
}

impl SearchClient for ListingSearchClient {
    fn search(
        &self,
        target: &TargetRecord,
        criteria: &SearchCriteria,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        self.rows
            .iter()
            .filter(|row| target.matches(&row.target))
            .filter(|row| row.mission.eq_ignore_ascii_case(&criteria.mission))
            .filter(|row| row.author.eq_ignore_ascii_case(&criteria.author))
            .filter(|row| row.exptime.is_some_and(|e| criteria.exptime.matches(e)))
            .map(|row| {
                Ok::<_, PipelineError>(SearchHit {
                    exptime_s: row.exptime,
                    sector: row.sector,
                    ..SearchHit::new(&row.target, row.uri.clone())?
                })
            })
            .collect()
    }
}
