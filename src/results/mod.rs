//! # Results processing stage
//!
//! Turn the engine summary and the downloaded segments of each target into a residual
//! variability measurement.
//!
//! ## Per-target flow
//!
//! 1. No engine summary: *not ready*. Valid results milestone (and no overwrite): *skipped*.
//! 2. Parse the summary into eclipse windows; echo the engine log at debug level.
//! 3. For every segment of the download manifest, independently:
//!    [`LightCurve::read`] → [`eclipse_mask`] → [`fit_trend`] → [`residual`] →
//!    [`variability_metric`]. A segment that cannot be read or fitted, or whose reading
//!    panics, is logged and left out.
//! 4. No usable segment: *unavailable*, nothing written. Otherwise `variability.json` is
//!    written atomically, then the results milestone.
//!
//! After the loop, if at least one target was processed, `results/variability_summary.csv`
//! is rewritten from the `variability.json` files of all the given targets.
pub mod eclipse_mask;
pub mod flatten;
pub mod lightcurve;
pub mod variability;

use std::panic::{catch_unwind, AssertUnwindSafe};

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::analysis::panic_message;
use crate::analysis::summary::{echo_analysis_log, AnalysisSummary, Eclipse};
use crate::catalogue::{TargetRecord, TicId};
use crate::config::PipelineConfig;
use crate::constants::{Days, VARIABILITY_FILE};
use crate::layout::{read_json, write_atomic, write_json_atomic};
use crate::milestones::{MilestoneStore, Stage};
use crate::pipeline_errors::PipelineError;
use crate::progress::StageProgress;
use crate::report::{StageReport, TargetOutcome};
use crate::segments::{SegmentDescriptor, SegmentManifest};

use eclipse_mask::eclipse_mask;
use flatten::{fit_trend, residual};
use lightcurve::LightCurve;
use variability::{aggregate, variability_metric, Aggregate};

/// Metric of one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentVariability {
    pub file_name: String,
    pub sector: Option<u32>,
    pub n_samples: usize,
    /// Samples inside an eclipse window
    pub n_masked: usize,
    pub metric: f64,
}

/// A segment left out, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSegment {
    pub file_name: String,
    pub reason: String,
}

/// Content of `variability.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariabilityResult {
    pub tic: TicId,
    pub identifier: String,
    /// Period used to fold the eclipse windows
    pub period: Option<Days>,
    /// `(mid-eclipse time, duration)` windows that were masked
    pub eclipses: Vec<(f64, f64)>,
    pub segments: Vec<SegmentVariability>,
    pub skipped: Vec<SkippedSegment>,
    pub aggregate: Aggregate,
}

/// Row of `variability_summary.csv`.
#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    tic: u64,
    identifier: &'a str,
    period: Option<Days>,
    n_segments: usize,
    variability: f64,
    variability_std: f64,
}

pub struct ResultsStage<'a> {
    config: &'a PipelineConfig,
    store: MilestoneStore,
}

impl<'a> ResultsStage<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        ResultsStage {
            config,
            store: config.milestone_store(),
        }
    }

    /// Process every target in turn.
    pub fn run(&self, targets: &[TargetRecord]) -> Result<StageReport, PipelineError> {
        let mut report = StageReport::new(Stage::Results);
        let progress = StageProgress::new("results", targets.len());

        for target in targets {
            let outcome = match self.process(target) {
                Ok(outcome) => outcome,
                Err(PipelineError::TargetUnavailable(tic)) => {
                    warn!("{tic}: no usable segment, nothing written");
                    TargetOutcome::Unavailable
                }
                Err(e) => {
                    warn!("{target}: {e}");
                    TargetOutcome::Failed(e.to_string())
                }
            };
            report.record(target.tic.to_string(), outcome);
            progress.tick();
        }
        progress.finish();

        if report.succeeded() > 0 {
            let rows = self.write_summary(targets)?;
            info!(
                "{} target(s) listed in {}",
                rows,
                self.store.layout().variability_summary()
            );
        }
        info!("{report}");
        Ok(report)
    }

    /// Process one target.
    ///
    /// Return
    /// ----------
    /// * `NotReady`, `Skipped` or `Succeeded`.
    /// * [`PipelineError::TargetUnavailable`] when no segment is usable, or the error that
    ///   stopped the target (summary, manifest, write).
    pub fn process(&self, target: &TargetRecord) -> Result<TargetOutcome, PipelineError> {
        let tic = target.tic;
        let layout = self.store.layout();
        if !self.store.is_complete(tic, Stage::Analysis) {
            info!("{target}: no analysis summary, not ready");
            return Ok(TargetOutcome::NotReady);
        }
        if self.store.is_done(tic, Stage::Results) {
            info!("{target}: results already computed, skipping");
            return Ok(TargetOutcome::Skipped);
        }

        let params = &self.config.results;
        let summary = AnalysisSummary::read(&layout.analysis_summary(tic), params.duration_scale)?;
        echo_analysis_log(&layout.analysis_log(tic));
        let period = summary.period_or(target.period);
        let windows = summary.eclipse_windows();
        for Eclipse {
            index,
            time,
            duration,
        } in &summary.eclipses
        {
            debug!("{target}: eclipse {index} at {time}, lasting {duration}");
        }

        let manifest = SegmentManifest::read(&layout.segments_manifest(tic))?;
        let download_dir = layout.download_dir(tic);
        let mut segments = Vec::new();
        let mut skipped = Vec::new();
        for descriptor in &manifest.segments {
            let measured = catch_unwind(AssertUnwindSafe(|| {
                self.measure(&download_dir, descriptor, period, &windows)
            }))
            .unwrap_or_else(|payload| {
                Err(PipelineError::segment_read(
                    &descriptor.file_name,
                    format!("reader panicked: {}", panic_message(payload.as_ref())),
                ))
            });
            match measured {
                Ok(measure) => {
                    debug!(
                        "{target}: {} variability {:.6}",
                        descriptor.file_name, measure.metric
                    );
                    segments.push(measure);
                }
                Err(e) => {
                    warn!("{target}: {e}");
                    skipped.push(SkippedSegment {
                        file_name: descriptor.file_name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let metrics: Vec<f64> = segments.iter().map(|s| s.metric).collect();
        let aggregate =
            aggregate(&metrics).ok_or_else(|| PipelineError::TargetUnavailable(tic.to_string()))?;

        let result = VariabilityResult {
            tic,
            identifier: target.identifier.clone(),
            period,
            eclipses: windows,
            segments,
            skipped,
            aggregate,
        };
        let path = layout.variability_file(tic);
        write_json_atomic(&path, &result)?;

        let milestone_params = json!({
            "flux_column": params.flux_column,
            "quality_bitmask": params.quality_bitmask,
            "duration_scale": params.duration_scale,
            "flatten": params.flatten,
            "period": period,
        });
        self.store
            .mark_done(tic, Stage::Results, milestone_params, &[VARIABILITY_FILE])?;

        info!(
            "{target}: variability {:.6} ± {:.6} over {} segment(s)",
            aggregate.mean, aggregate.std, aggregate.n_segments
        );
        Ok(TargetOutcome::Succeeded)
    }

    /// Variability of one segment file.
    fn measure(
        &self,
        download_dir: &Utf8Path,
        descriptor: &SegmentDescriptor,
        period: Option<Days>,
        windows: &[(f64, f64)],
    ) -> Result<SegmentVariability, PipelineError> {
        let params = &self.config.results;
        let path = download_dir.join(&descriptor.file_name);
        let lc = LightCurve::read(&path, &params.flux_column, params.quality_bitmask)?;

        let mask = eclipse_mask(&lc.time, period, windows);
        let trend = fit_trend(&lc.time, &lc.flux, &mask, &params.flatten)
            .map_err(|reason| PipelineError::segment_read(&path, reason))?;
        let metric = variability_metric(&residual(&lc.flux, &trend));
        if !metric.is_finite() {
            return Err(PipelineError::segment_read(&path, "variability is not finite"));
        }

        Ok(SegmentVariability {
            file_name: descriptor.file_name.clone(),
            sector: descriptor.sector,
            n_samples: lc.len(),
            n_masked: mask.iter().filter(|m| **m).count(),
            metric,
        })
    }

    /// Rewrite the catalogue-level summary; returns the number of rows.
    fn write_summary(&self, targets: &[TargetRecord]) -> Result<usize, PipelineError> {
        let layout = self.store.layout();
        let results: Vec<VariabilityResult> = targets
            .iter()
            .map(|t| layout.variability_file(t.tic))
            .filter(|p| p.is_file())
            .filter_map(|p| match read_json(&p) {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!("{p} left out of the summary: {e}");
                    None
                }
            })
            .collect();

        let mut writer = csv::Writer::from_writer(Vec::new());
        for result in &results {
            writer.serialize(SummaryRow {
                tic: result.tic.0,
                identifier: &result.identifier,
                period: result.period,
                n_segments: result.aggregate.n_segments,
                variability: result.aggregate.mean,
                variability_std: result.aggregate.std,
            })?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| PipelineError::IoError(e.into_error()))?;
        write_atomic(&layout.variability_summary(), &bytes)?;
        Ok(results.len())
    }
}
