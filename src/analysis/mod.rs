//! # Analysis stage
//!
//! Hand the selected segments of every downloaded target to the [`AnalysisEngine`], through a
//! bounded worker pool.
//!
//! ## Eligibility
//!
//! | download milestone | engine summary | overwrite | outcome                |
//! |--------------------|----------------|-----------|------------------------|
//! | absent / invalid   | any            | any       | *not ready*            |
//! | valid              | present        | no        | *skipped*              |
//! | valid              | absent         | any       | job submitted          |
//! | valid              | present        | yes       | job submitted          |
//!
//! ## Jobs
//!
//! For each eligible target the manifest is read, [`select_segments`] picks the subset sized
//! after the catalogue period, and the subset is re-ordered by sector. Jobs run on a local
//! `rayon` pool of `pool_size` threads; with a pool size of 1 they run on the calling
//! thread. Jobs share no mutable state.
//!
//! A job fails when the engine errors, when it panics, or when it returns without leaving
//! the summary file. Failures are logged with the target and never cancel other jobs.
//!
//! No milestone is written: the summary file is the completion signal, see
//! [`MilestoneStore::is_complete`].
pub mod engine;
pub mod summary;

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::catalogue::TargetRecord;
use crate::config::PipelineConfig;
use crate::milestones::{MilestoneStore, Stage};
use crate::pipeline_errors::PipelineError;
use crate::progress::StageProgress;
use crate::report::{StageReport, TargetOutcome};
use crate::segments::{select_segments, SegmentManifest};

use engine::{AnalysisEngine, AnalysisJob};

pub struct AnalysisStage<'a> {
    config: &'a PipelineConfig,
    store: MilestoneStore,
    engine: &'a dyn AnalysisEngine,
}

/// What to do with one target.
enum Plan {
    Done(TargetOutcome),
    Run(Box<AnalysisJob>),
}

impl<'a> AnalysisStage<'a> {
    pub fn new(config: &'a PipelineConfig, engine: &'a dyn AnalysisEngine) -> Self {
        AnalysisStage {
            config,
            store: config.milestone_store(),
            engine,
        }
    }

    /// Analyse every eligible target.
    ///
    /// Return
    /// ----------
    /// * One outcome per target, in roster order.
    /// * A [`PipelineError::ThreadPoolError`] if the worker pool cannot be built; per-target
    ///   failures are reported, not returned.
    pub fn run(&self, targets: &[TargetRecord]) -> Result<StageReport, PipelineError> {
        let plans: Vec<Plan> = targets.iter().map(|t| self.plan(t)).collect();
        let jobs: Vec<&AnalysisJob> = plans
            .iter()
            .filter_map(|p| match p {
                Plan::Run(job) => Some(job.as_ref()),
                Plan::Done(_) => None,
            })
            .collect();

        let pool_size = self.config.analysis.pool_size;
        info!(
            "{} of {} target(s) to analyse with {} worker(s)",
            jobs.len(),
            targets.len(),
            pool_size
        );

        let progress = StageProgress::new("analysis", jobs.len());
        let run_one = |job: &AnalysisJob| {
            let outcome = self.run_job(job);
            progress.tick();
            outcome
        };

        let results: Vec<TargetOutcome> = if pool_size <= 1 {
            jobs.iter().map(|job| run_one(job)).collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(pool_size)
                .thread_name(|idx| format!("analysis-{idx}"))
                .build()?;
            pool.install(|| jobs.par_iter().map(|job| run_one(job)).collect())
        };
        progress.finish();

        // collect() keeps job order, so outcomes line up with the `Run` plans
        let mut results = results.into_iter();
        let mut report = StageReport::new(Stage::Analysis);
        for (target, plan) in targets.iter().zip(plans) {
            let outcome = match plan {
                Plan::Done(outcome) => outcome,
                Plan::Run(_) => results
                    .next()
                    .unwrap_or_else(|| TargetOutcome::Failed("job result lost".into())),
            };
            report.record(target.tic.to_string(), outcome);
        }
        info!("{report}");
        Ok(report)
    }

    /// Decide whether `target` needs a job and build it.
    fn plan(&self, target: &TargetRecord) -> Plan {
        let tic = target.tic;
        if !self.store.is_complete(tic, Stage::Download) {
            info!("{target}: no completed download, not ready for analysis");
            return Plan::Done(TargetOutcome::NotReady);
        }
        if self.store.is_done(tic, Stage::Analysis) {
            info!("{target}: analysis summary present, skipping");
            return Plan::Done(TargetOutcome::Skipped);
        }

        match self.build_job(target) {
            Ok(job) => Plan::Run(Box::new(job)),
            Err(e) => {
                warn!("{e}");
                Plan::Done(TargetOutcome::Failed(e.to_string()))
            }
        }
    }

    /// Job of `target`: selected segments in sector order and the engine paths.
    pub fn build_job(&self, target: &TargetRecord) -> Result<AnalysisJob, PipelineError> {
        let tic = target.tic;
        let layout = self.store.layout();
        let manifest = SegmentManifest::read(&layout.segments_manifest(tic))
            .map_err(|e| PipelineError::analysis_job(&tic.to_string(), e))?;

        let mut selected =
            select_segments(&manifest.segments, target.period, &self.config.selection);
        if selected.is_empty() {
            return Err(PipelineError::analysis_job(
                &tic.to_string(),
                "download manifest lists no segment",
            ));
        }
        selected.sort_by_key(|s| s.sector.unwrap_or(u32::MAX));
        debug!(
            "{target}: {} of {} segment(s) selected",
            selected.len(),
            manifest.segments.len()
        );

        let download_dir = layout.download_dir(tic);
        Ok(AnalysisJob {
            target: target.clone(),
            files: selected
                .iter()
                .map(|s| download_dir.join(&s.file_name))
                .collect(),
            sectors: selected.iter().map(|s| s.sector).collect(),
            save_dir: layout.analysis_root(),
            target_dir: layout.analysis_dir(tic),
            summary: layout.analysis_summary(tic),
            runner_log: layout.runner_log(tic),
            overwrite: self.store.overwrite(),
        })
    }

    /// Run one job, capturing errors and panics.
    fn run_job(&self, job: &AnalysisJob) -> TargetOutcome {
        let target = &job.target;
        info!("{target}: analysing {} segment(s)", job.files.len());

        let result = match catch_unwind(AssertUnwindSafe(|| self.engine.analyse(job))) {
            Ok(result) => result,
            Err(payload) => Err(PipelineError::analysis_job(
                &target.tic.to_string(),
                format!("engine panicked: {}", panic_message(payload.as_ref())),
            )),
        }
        .and_then(|()| {
            if job.summary.is_file() {
                Ok(())
            } else {
                Err(PipelineError::analysis_job(
                    &target.tic.to_string(),
                    format!("engine finished without writing {}", job.summary),
                ))
            }
        });

        match result {
            Ok(()) => {
                info!("{target}: analysis complete");
                TargetOutcome::Succeeded
            }
            Err(e) => {
                warn!("{e}");
                TargetOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Text carried by a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}
