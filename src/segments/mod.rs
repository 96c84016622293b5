//! # Light-curve segments
//!
//! A *segment* is one downloaded observation file of a target, typically one TESS sector.
//! [`SegmentDescriptor`] is the header-level summary recorded at acquisition time, and
//! [`SegmentManifest`] the per-target list persisted as `segments.json`.
//!
//! The quality pair read from the light-curve header drives the triage done in
//! [`ranking`]:
//!
//! * `PDC_TOT` – total goodness metric of the PDC correction (higher is better),
//! * `PDC_NOI` – noise goodness metric; values close to 1 mean the segment is dominated by
//!   noise rather than by the stellar signal.
pub mod lightcurve_file;
pub mod ranking;

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use hifitime::{Epoch, TimeScale, Unit};
use serde::{Deserialize, Serialize};

use crate::catalogue::TicId;
use crate::constants::{Btjd, BTJD_OFFSET};
use crate::layout::{read_json, write_json_atomic};
use crate::pipeline_errors::PipelineError;

pub use lightcurve_file::LightCurveFile;
pub use ranking::{rank_segments, select_segments, selection_size, SelectionParams};

/// Summary of one downloaded observation file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    /// File name inside the target download directory
    pub file_name: String,
    pub sector: Option<u32>,
    /// `PDC_TOT` total-quality metric
    pub pdc_tot: Option<f64>,
    /// `PDC_NOI` noise-fraction metric
    pub pdc_noi: Option<f64>,
    pub tstart: Option<Btjd>,
    pub tstop: Option<Btjd>,
    /// Where the file was fetched from
    pub source_uri: String,
}

impl SegmentDescriptor {
    /// Build the descriptor of a light-curve file from its headers.
    ///
    /// Keywords are looked up in the light-curve extension first, then in the primary header.
    /// Absent keywords leave the corresponding field empty rather than failing, the
    /// ranking treating missing quality as worst.
    ///
    /// Arguments
    /// -----------------
    /// * `path`: the downloaded file.
    /// * `source_uri`: provenance recorded in the descriptor.
    ///
    /// Return
    /// ----------
    /// * The descriptor, or a [`PipelineError::FitsFormat`] / cfitsio / I/O error when the
    ///   file is not readable FITS.
    pub fn from_fits(path: &Utf8Path, source_uri: &str) -> Result<Self, PipelineError> {
        let mut file = LightCurveFile::open(path)?;

        Ok(SegmentDescriptor {
            file_name: path.file_name().unwrap_or(path.as_str()).to_string(),
            sector: file
                .key::<f64>("SECTOR")
                .filter(|s| *s >= 0.0)
                .map(|s| s as u32),
            pdc_tot: file.key("PDC_TOT"),
            pdc_noi: file.key("PDC_NOI"),
            tstart: file.key("TSTART"),
            tstop: file.key("TSTOP"),
            source_uri: source_uri.to_string(),
        })
    }

    /// Observation span as TDB epochs.
    pub fn span(&self) -> Option<(Epoch, Epoch)> {
        // BTJD is a barycentric Julian date shifted by 2457000, MJD by 2400000.5
        let to_epoch = |btjd: Btjd| {
            Epoch::from_mjd_in_time_scale(btjd + BTJD_OFFSET - 2_400_000.5, TimeScale::TDB)
        };
        Some((to_epoch(self.tstart?), to_epoch(self.tstop?)))
    }

    /// Length of the observation span in days.
    pub fn duration_days(&self) -> Option<f64> {
        self.span().map(|(start, stop)| (stop - start).to_unit(Unit::Day))
    }
}

impl fmt::Display for SegmentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |v: Option<f64>| v.map_or("n/a".to_string(), |v| format!("{v:.4}"));
        write!(
            f,
            "{} (sector {}, PDC_TOT={}, PDC_NOI={})",
            self.file_name,
            self.sector.map_or("?".to_string(), |s| s.to_string()),
            opt(self.pdc_tot),
            opt(self.pdc_noi)
        )?;
        if f.alternate() {
            if let Some((start, stop)) = self.span() {
                write!(f, "\n  span: {start} → {stop}")?;
            }
            write!(f, "\n  from: {}", self.source_uri)?;
        }
        Ok(())
    }
}

/// Content of `segments.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentManifest {
    pub tic: TicId,
    pub segments: Vec<SegmentDescriptor>,
}

impl SegmentManifest {
    pub fn write(&self, path: &Utf8Path) -> Result<(), PipelineError> {
        write_json_atomic(path, self)
    }

    pub fn read(path: &Utf8Path) -> Result<Self, PipelineError> {
        read_json(path)
    }

    /// Absolute paths of the segment files, given their download directory.
    pub fn segment_paths(&self, download_dir: &Utf8Path) -> Vec<Utf8PathBuf> {
        self.segments
            .iter()
            .map(|s| download_dir.join(&s.file_name))
            .collect()
    }
}
