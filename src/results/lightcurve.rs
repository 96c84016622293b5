//! Light-curve loading.
//!
//! A TESS light-curve file stores its samples in the `LIGHTCURVE` binary table (HDU 1):
//! `TIME` in BTJD, several flux columns with their `_ERR` companions, and a `QUALITY`
//! bit field. [`LightCurve::read`] keeps one flux column, drops unusable samples and
//! normalizes the flux by its median.
use camino::Utf8Path;
use tracing::debug;

use crate::constants::Btjd;
use crate::pipeline_errors::PipelineError;
use crate::segments::LightCurveFile;

/// Normalized light curve of one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct LightCurve {
    pub time: Vec<Btjd>,
    /// Flux divided by its median
    pub flux: Vec<f64>,
    /// Flux uncertainty, same normalization; NaN when the file has no `_ERR` column
    pub flux_err: Vec<f64>,
}

impl LightCurve {
    /// Load the light curve stored in `path`.
    ///
    /// Arguments
    /// -----------------
    /// * `flux_column`: flux column to keep (`PDCSAP_FLUX`, `SAP_FLUX`, …).
    /// * `quality_bitmask`: samples whose `QUALITY` shares a bit with it are dropped.
    ///
    /// Return
    /// ----------
    /// * The normalized light curve, in file order, without flagged or non-finite samples.
    /// * A [`PipelineError::SegmentRead`] when the file cannot be decoded, lacks a required
    ///   column, or keeps no usable sample.
    pub fn read(
        path: &Utf8Path,
        flux_column: &str,
        quality_bitmask: u32,
    ) -> Result<Self, PipelineError> {
        let fail = |e: PipelineError| PipelineError::segment_read(path, e);
        let mut file = LightCurveFile::open(path).map_err(fail)?;

        let time: Vec<f64> = file.column("TIME").map_err(fail)?;
        let flux: Vec<f64> = file.column(flux_column).map_err(fail)?;
        let err_column = format!("{flux_column}_ERR");
        let flux_err = if file.has_column(&err_column) {
            file.column(&err_column).map_err(fail)?
        } else {
            vec![f64::NAN; time.len()]
        };
        let quality: Vec<i32> = if file.has_column("QUALITY") {
            file.column("QUALITY").map_err(fail)?
        } else {
            vec![0; time.len()]
        };

        let lc = Self::from_columns(&time, &flux, &flux_err, &quality, quality_bitmask)
            .map_err(|reason| PipelineError::segment_read(path, reason))?;
        debug!(
            "{}: {} of {} sample(s) kept",
            path.file_name().unwrap_or(path.as_str()),
            lc.len(),
            time.len()
        );
        Ok(lc)
    }

    /// Filter and normalize raw columns.
    pub fn from_columns(
        time: &[f64],
        flux: &[f64],
        flux_err: &[f64],
        quality: &[i32],
        quality_bitmask: u32,
    ) -> Result<Self, String> {
        let mut lc = LightCurve {
            time: Vec::with_capacity(time.len()),
            flux: Vec::with_capacity(time.len()),
            flux_err: Vec::with_capacity(time.len()),
        };
        for (((&t, &f), &e), &q) in time.iter().zip(flux).zip(flux_err).zip(quality) {
            let flagged = (q as u32) & quality_bitmask != 0;
            if flagged || !t.is_finite() || !f.is_finite() {
                continue;
            }
            lc.time.push(t);
            lc.flux.push(f);
            lc.flux_err.push(e);
        }

        if lc.is_empty() {
            return Err("no usable sample left after quality filtering".into());
        }
        let norm = median(&lc.flux);
        if !norm.is_finite() || norm == 0.0 {
            return Err(format!("cannot normalize by median flux {norm}"));
        }
        lc.flux.iter_mut().for_each(|f| *f /= norm);
        lc.flux_err.iter_mut().for_each(|e| *e /= norm);
        Ok(lc)
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

/// Median of the finite values of `values`, NaN when there is none.
pub fn median(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}
