//! # Segment ranking & selection
//!
//! Pure, deterministic triage of the segments of a target before they are handed to the
//! analysis engine.
//!
//! ## Score
//!
//! ```text
//! score = PDC_TOT / 1     if PDC_NOI <= threshold
//!       = PDC_TOT / 100   otherwise (noise-dominated)
//! ```
//!
//! Ordering is done on the tuple `(penalised, -score, discovery index)`, so that:
//!
//! * a noise-dominated segment ranks below **every** non-penalised segment whatever its raw
//!   total quality (`PDC_TOT` 100 with `PDC_NOI` 0.995 scores 1.0 and stays behind
//!   `PDC_TOT` 10 with `PDC_NOI` 0.5),
//! * segments with a missing or non-finite quality value rank last,
//! * ties keep the discovery order (stable sort).
//!
//! ## Subset size
//!
//! ```text
//! N = min(available, max(floor_count, ceil(period / days_per_segment)))
//! ```
//!
//! with the period falling back to one day when unknown. `N` is monotonic in the period.
use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::constants::{
    Days, DAYS_PER_SELECTED_SEGMENT, FALLBACK_PERIOD, MIN_SELECTED_SEGMENTS,
    NOISE_DOMINATED_THRESHOLD, NOISE_PENALTY_DIVISOR,
};
use crate::pipeline_errors::PipelineError;

use super::SegmentDescriptor;

/// Tunables of the ranking and selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionParams {
    /// `PDC_NOI` above which a segment is penalised
    pub noise_threshold: f64,
    /// Divisor applied to the score of a penalised segment
    pub noise_penalty: f64,
    /// Smallest subset handed to the engine (when enough segments exist)
    pub min_segments: usize,
    /// Orbital period covered by each selected segment
    pub days_per_segment: Days,
}

impl Default for SelectionParams {
    fn default() -> Self {
        SelectionParams {
            noise_threshold: NOISE_DOMINATED_THRESHOLD,
            noise_penalty: NOISE_PENALTY_DIVISOR,
            min_segments: MIN_SELECTED_SEGMENTS,
            days_per_segment: DAYS_PER_SELECTED_SEGMENT,
        }
    }
}

impl SelectionParams {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.noise_threshold.is_finite() {
            return Err(PipelineError::InvalidConfig(
                "selection.noise_threshold must be finite".into(),
            ));
        }
        if !(self.noise_penalty >= 1.0) {
            return Err(PipelineError::InvalidConfig(
                "selection.noise_penalty must be >= 1".into(),
            ));
        }
        if self.min_segments == 0 {
            return Err(PipelineError::InvalidConfig(
                "selection.min_segments must be >= 1".into(),
            ));
        }
        if !(self.days_per_segment > 0.0 && self.days_per_segment.is_finite()) {
            return Err(PipelineError::InvalidConfig(
                "selection.days_per_segment must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Ranking key of one segment.
#[derive(Debug, Clone, Copy, PartialEq)]
struct RankKey {
    /// 0: scored normally, 1: noise-dominated, 2: quality unknown
    tier: u8,
    score: f64,
}

impl RankKey {
    fn of(segment: &SegmentDescriptor, params: &SelectionParams) -> Self {
        match (segment.pdc_tot, segment.pdc_noi) {
            (Some(tot), Some(noi)) if tot.is_finite() && noi.is_finite() => {
                if noi > params.noise_threshold {
                    RankKey {
                        tier: 1,
                        score: tot / params.noise_penalty,
                    }
                } else {
                    RankKey { tier: 0, score: tot }
                }
            }
            _ => RankKey {
                tier: 2,
                score: f64::NEG_INFINITY,
            },
        }
    }

    /// Better keys compare as `Less`.
    fn cmp(&self, other: &Self) -> Ordering {
        self.tier
            .cmp(&other.tier)
            .then_with(|| other.score.total_cmp(&self.score))
    }
}

/// Score of a segment, `None` when its quality is unknown.
pub fn segment_score(segment: &SegmentDescriptor, params: &SelectionParams) -> Option<f64> {
    let key = RankKey::of(segment, params);
    (key.tier < 2).then_some(key.score)
}

/// Indices of `segments`, best first.
///
/// Arguments
/// -----------------
/// * `segments`: segments in discovery order.
/// * `params`: ranking policy.
///
/// Return
/// ----------
/// * A permutation of `0..segments.len()`; equal keys keep their discovery order.
pub fn rank_segments(segments: &[SegmentDescriptor], params: &SelectionParams) -> Vec<usize> {
    let keys: Vec<RankKey> = segments.iter().map(|s| RankKey::of(s, params)).collect();
    let mut order: Vec<usize> = (0..segments.len()).collect();
    order.sort_by(|&a, &b| keys[a].cmp(&keys[b]));
    order
}

/// Number of segments to hand to the engine.
pub fn selection_size(period: Option<Days>, available: usize, params: &SelectionParams) -> usize {
    let period = period
        .filter(|p| p.is_finite() && *p > 0.0)
        .unwrap_or(FALLBACK_PERIOD);
    let by_period = (period / params.days_per_segment).ceil() as usize;
    by_period.max(params.min_segments).min(available)
}

/// Best `selection_size` segments, in score order.
pub fn select_segments<'a>(
    segments: &'a [SegmentDescriptor],
    period: Option<Days>,
    params: &SelectionParams,
) -> Vec<&'a SegmentDescriptor> {
    let n = selection_size(period, segments.len(), params);
    rank_segments(segments, params)
        .into_iter()
        .take(n)
        .map(|idx| &segments[idx])
        .collect()
}
