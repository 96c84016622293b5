//! Residual-variability metric.
//!
//! The variability of a flattened, eclipse-free light curve is measured by twice its
//! interquartile range, a spread estimate insensitive to the few outliers left by the
//! flattening. Per target, the segment metrics are summarized by their mean and sample
//! standard deviation.
use serde::{Deserialize, Serialize};

/// Quantile `q ∈ [0, 1]` of the finite `values`, linear interpolation between order
/// statistics. NaN when there is no finite value.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(f64::total_cmp);

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// `2 × (Q3 − Q1)` of `residual`, NaN values omitted.
pub fn variability_metric(residual: &[f64]) -> f64 {
    2.0 * (quantile(residual, 0.75) - quantile(residual, 0.25))
}

/// Mean and one-sigma spread of the per-segment metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub mean: f64,
    /// Sample standard deviation (n − 1); 0 for a single segment
    pub std: f64,
    pub n_segments: usize,
}

/// Aggregate `metrics`, `None` when empty.
pub fn aggregate(metrics: &[f64]) -> Option<Aggregate> {
    let n = metrics.len();
    if n == 0 {
        return None;
    }
    let mean = metrics.iter().sum::<f64>() / n as f64;
    let std = if n == 1 {
        0.0
    } else {
        (metrics.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    };
    Some(Aggregate {
        mean,
        std,
        n_segments: n,
    })
}
