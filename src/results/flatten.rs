//! Light-curve flattening.
//!
//! The slow trend of a normalized light curve is estimated with a **local polynomial**
//! (Savitzky–Golay style) fitted on out-of-eclipse samples only, then subtracted.
//!
//! Algorithm
//! -----------------
//! 1. Split the samples into runs wherever two consecutive times are further apart than
//!    `break_tolerance` median cadences. Runs are fitted independently.
//! 2. In each run, the trend at a sample is the value at that sample of a degree
//!    `polyorder` polynomial least-squares fitted (SVD) to the `window_length` nearest fit
//!    samples. The window is clamped at the run edges.
//! 3. Fit samples start as every unmasked sample; for `niters` iterations, samples whose
//!    residual departs from the median residual by more than `sigma` standard deviations
//!    are dropped and the trend recomputed. Clipping stops early when nothing moves.
//! 4. The trend is evaluated at every unmasked sample (clipped ones included). Masked
//!    samples, and runs without any fit sample, get a linear interpolation in time of the
//!    neighbouring trend values.
//!
//! The window slides in sample space, as for a regularly sampled TESS light curve.
use std::fmt;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::constants::{
    FLATTEN_BREAK_TOLERANCE, FLATTEN_NITERS, FLATTEN_POLYORDER, FLATTEN_SIGMA,
    FLATTEN_WINDOW_LENGTH,
};
use crate::pipeline_errors::PipelineError;

use super::lightcurve::median;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlattenParams {
    /// Samples per local fit, odd
    pub window_length: usize,
    pub polyorder: usize,
    /// Gap, in median cadences, splitting the light curve
    pub break_tolerance: f64,
    /// Clipping threshold in standard deviations
    pub sigma: f64,
    /// Clipping iterations
    pub niters: usize,
}

impl Default for FlattenParams {
    fn default() -> Self {
        FlattenParams {
            window_length: FLATTEN_WINDOW_LENGTH,
            polyorder: FLATTEN_POLYORDER,
            break_tolerance: FLATTEN_BREAK_TOLERANCE,
            sigma: FLATTEN_SIGMA,
            niters: FLATTEN_NITERS,
        }
    }
}

impl FlattenParams {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.window_length % 2 == 0 || self.window_length <= self.polyorder {
            return Err(PipelineError::InvalidConfig(format!(
                "flatten.window_length must be odd and > polyorder ({}), got {}",
                self.polyorder, self.window_length
            )));
        }
        if !(self.sigma > 0.0 && self.sigma.is_finite()) {
            return Err(PipelineError::InvalidConfig("flatten.sigma must be > 0".into()));
        }
        if !(self.break_tolerance > 0.0 && self.break_tolerance.is_finite()) {
            return Err(PipelineError::InvalidConfig(
                "flatten.break_tolerance must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for FlattenParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "window={}, order={}, break={}, sigma={}, iters={}",
            self.window_length, self.polyorder, self.break_tolerance, self.sigma, self.niters
        )
    }
}

/// Trend of `flux` fitted outside `mask`, evaluated at every sample.
///
/// Arguments
/// -----------------
/// * `time`: sample times, increasing.
/// * `flux`: normalized flux, same length.
/// * `mask`: `true` for in-eclipse samples, excluded from the fit.
///
/// Return
/// ----------
/// * One trend value per sample.
/// * An error message when every sample is masked.
pub fn fit_trend(
    time: &[f64],
    flux: &[f64],
    mask: &[bool],
    params: &FlattenParams,
) -> Result<Vec<f64>, String> {
    let n = time.len();
    if flux.len() != n || mask.len() != n {
        return Err(format!(
            "length mismatch: {n} times, {} fluxes, {} mask flags",
            flux.len(),
            mask.len()
        ));
    }
    if mask.iter().all(|m| *m) {
        return Err("every sample is in eclipse, no trend can be fitted".into());
    }

    let mut trend = vec![f64::NAN; n];
    for run in split_runs(time, params.break_tolerance) {
        let unmasked: Vec<usize> = run.filter(|&i| !mask[i]).collect();
        if unmasked.is_empty() {
            continue;
        }

        let mut fit = unmasked.clone();
        for _ in 0..params.niters {
            let residuals: Vec<f64> = fit
                .iter()
                .map(|&i| flux[i] - local_fit(time, flux, &fit, time[i], params))
                .collect();
            let kept = sigma_clip(&residuals, params.sigma);
            if kept.len() == fit.len() || kept.len() <= params.polyorder {
                break;
            }
            fit = kept.into_iter().map(|k| fit[k]).collect();
        }

        for &i in &unmasked {
            trend[i] = local_fit(time, flux, &fit, time[i], params);
        }
    }

    // masked samples and empty runs: interpolate in time between fitted samples
    let (xp, fp): (Vec<f64>, Vec<f64>) = (0..n)
        .filter(|&i| trend[i].is_finite())
        .map(|i| (time[i], trend[i]))
        .unzip();
    if xp.is_empty() {
        return Err("trend fit produced no finite value".into());
    }
    for i in 0..n {
        if !trend[i].is_finite() {
            trend[i] = interp(time[i], &xp, &fp);
        }
    }
    Ok(trend)
}

/// `flux − trend`, sample by sample.
pub fn residual(flux: &[f64], trend: &[f64]) -> Vec<f64> {
    flux.iter().zip(trend).map(|(f, t)| f - t).collect()
}

/// Index ranges of the gap-free runs of `time`.
fn split_runs(time: &[f64], break_tolerance: f64) -> Vec<std::ops::Range<usize>> {
    if time.is_empty() {
        return Vec::new();
    }
    let steps: Vec<f64> = time.windows(2).map(|w| w[1] - w[0]).collect();
    let cadence = median(&steps);
    let max_gap = if cadence.is_finite() && cadence > 0.0 {
        break_tolerance * cadence
    } else {
        f64::INFINITY
    };

    let mut runs = Vec::new();
    let mut start = 0;
    for (i, dt) in steps.iter().enumerate() {
        if *dt > max_gap {
            runs.push(start..i + 1);
            start = i + 1;
        }
    }
    runs.push(start..time.len());
    runs
}

/// Value at `t0` of the polynomial fitted to the fit samples nearest to `t0`.
fn local_fit(time: &[f64], flux: &[f64], fit: &[usize], t0: f64, params: &FlattenParams) -> f64 {
    let w = params.window_length.min(fit.len());
    let pos = fit.partition_point(|&i| time[i] < t0);
    let start = pos.saturating_sub(w / 2).min(fit.len() - w);
    let window = &fit[start..start + w];

    let degree = params.polyorder.min(w - 1);
    let scale = window
        .iter()
        .map(|&i| (time[i] - t0).abs())
        .fold(0.0, f64::max);
    if degree == 0 || scale == 0.0 {
        return mean(window.iter().map(|&i| flux[i]));
    }

    let a = DMatrix::from_fn(w, degree + 1, |r, c| {
        ((time[window[r]] - t0) / scale).powi(c as i32)
    });
    let b = DVector::from_iterator(w, window.iter().map(|&i| flux[i]));
    match a.svd(true, true).solve(&b, 1e-12) {
        Ok(coefficients) => coefficients[0],
        Err(_) => mean(window.iter().map(|&i| flux[i])),
    }
}

/// Positions of the residuals within `sigma` standard deviations of their median.
fn sigma_clip(residuals: &[f64], sigma: f64) -> Vec<usize> {
    let center = median(residuals);
    let n = residuals.len() as f64;
    let mu = residuals.iter().sum::<f64>() / n;
    let std = (residuals.iter().map(|r| (r - mu).powi(2)).sum::<f64>() / n).sqrt();
    if !std.is_finite() || std == 0.0 {
        return (0..residuals.len()).collect();
    }
    residuals
        .iter()
        .enumerate()
        .filter(|(_, r)| (*r - center).abs() <= sigma * std)
        .map(|(k, _)| k)
        .collect()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    sum / count as f64
}

/// Piecewise-linear interpolation of `(xp, fp)` at `x`, constant beyond the ends.
fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let k = xp.partition_point(|&v| v < x);
    if k == 0 {
        return fp[0];
    }
    if k == xp.len() {
        return fp[xp.len() - 1];
    }
    let (x0, x1) = (xp[k - 1], xp[k]);
    if x1 == x0 {
        return fp[k];
    }
    fp[k - 1] + (fp[k] - fp[k - 1]) * (x - x0) / (x1 - x0)
}

#[cfg(test)]
mod flatten_test {
    use super::*;
    use approx::assert_relative_eq;

    fn params(window_length: usize) -> FlattenParams {
        FlattenParams {
            window_length,
            ..FlattenParams::default()
        }
    }

    #[test]
    fn test_validate() {
        assert!(FlattenParams::default().validate().is_ok());
        assert!(params(100).validate().is_err());
        assert!(params(1).validate().is_err());
        assert!(FlattenParams {
            sigma: 0.0,
            ..FlattenParams::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_quadratic_is_recovered_exactly() {
        let time: Vec<f64> = (0..300).map(|i| i as f64 * 0.01).collect();
        let flux: Vec<f64> = time.iter().map(|t| 1.0 + 0.02 * t - 0.003 * t * t).collect();
        let mask = vec![false; time.len()];

        let trend = fit_trend(&time, &flux, &mask, &params(51)).unwrap();
        for (f, t) in flux.iter().zip(&trend) {
            assert_relative_eq!(*f, *t, epsilon = 1e-9);
        }
        assert!(residual(&flux, &trend).iter().all(|r| r.abs() < 1e-9));
    }

    #[test]
    fn test_masked_dip_is_interpolated() {
        let time: Vec<f64> = (0..200).map(|i| i as f64 * 0.01).collect();
        let mut flux: Vec<f64> = time.iter().map(|t| 1.0 + 0.01 * t).collect();
        let mask: Vec<bool> = (0..200).map(|i| (90..110).contains(&i)).collect();
        for f in &mut flux[90..110] {
            *f -= 0.3;
        }

        let trend = fit_trend(&time, &flux, &mask, &params(31)).unwrap();
        // the eclipse does not pull the trend down
        assert_relative_eq!(trend[100], 1.0 + 0.01 * time[100], epsilon = 1e-9);
        let res = residual(&flux, &trend);
        assert_relative_eq!(res[100], -0.3, epsilon = 1e-9);
        assert_relative_eq!(res[10], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_outlier_is_clipped() {
        let time: Vec<f64> = (0..101).map(|i| i as f64).collect();
        let mut flux = vec![1.0; 101];
        flux[50] = 5.0;
        let mask = vec![false; 101];

        let trend = fit_trend(&time, &flux, &mask, &params(21)).unwrap();
        assert_relative_eq!(trend[50], 1.0, epsilon = 1e-9);
        assert_relative_eq!(trend[0], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_gap_splits_runs() {
        let mut time: Vec<f64> = (0..50).map(|i| i as f64 * 0.1).collect();
        time.extend((0..50).map(|i| 100.0 + i as f64 * 0.1));
        let runs = split_runs(&time, 5.0);
        assert_eq!(runs, vec![0..50, 50..100]);

        // a step between runs is followed exactly on both sides
        let flux: Vec<f64> = (0..100).map(|i| if i < 50 { 1.0 } else { 1.2 }).collect();
        let trend = fit_trend(&time, &flux, &[false; 100], &params(21)).unwrap();
        assert_relative_eq!(trend[49], 1.0, epsilon = 1e-9);
        assert_relative_eq!(trend[50], 1.2, epsilon = 1e-9);
    }

    #[test]
    fn test_all_masked_is_an_error() {
        assert!(fit_trend(&[1.0, 2.0], &[1.0, 1.0], &[true, true], &params(3)).is_err());
    }

    #[test]
    fn test_interp() {
        let xp = [0.0, 1.0, 3.0];
        let fp = [0.0, 2.0, 0.0];
        assert_eq!(interp(-1.0, &xp, &fp), 0.0);
        assert_eq!(interp(0.5, &xp, &fp), 1.0);
        assert_eq!(interp(2.0, &xp, &fp), 1.0);
        assert_eq!(interp(9.0, &xp, &fp), 0.0);
    }
}
