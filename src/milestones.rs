//! # Milestone store
//!
//! Per-target, per-stage completion markers. A milestone is a small JSON file written next to
//! the outputs of a stage once all of them are durably on disk:
//!
//! ```json
//! {
//!   "stage": "download",
//!   "completed": true,
//!   "params": { "mission": "TESS", "segments": 12 },
//!   "artifacts": ["tess2019...lc.fits", "segments.json"],
//!   "timestamp": "2026-03-02T10:41:07 UTC"
//! }
//! ```
//!
//! Stages consult [`MilestoneStore::is_done`] before doing any work, which makes every stage
//! idempotent and lets an interrupted batch resume where it stopped.
//!
//! The analysis stage is special: its outputs belong to the external engine, so no marker
//! is written and the existence of the engine summary is the only completion signal.
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use hifitime::Epoch;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalogue::TicId;
use crate::layout::{read_json, write_json_atomic, CatalogueLayout};
use crate::pipeline_errors::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Download,
    Analysis,
    Results,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Analysis => "analysis",
            Stage::Results => "results",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Content of a milestone marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneRecord {
    pub stage: Stage,
    pub completed: bool,
    /// Stage-specific parameters the outputs were produced with
    pub params: serde_json::Value,
    /// Files vouched for, relative to the stage directory
    pub artifacts: Vec<String>,
    /// UTC completion time
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct MilestoneStore {
    layout: CatalogueLayout,
    overwrite: bool,
}

impl MilestoneStore {
    pub fn new(layout: CatalogueLayout, overwrite: bool) -> Self {
        MilestoneStore { layout, overwrite }
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn layout(&self) -> &CatalogueLayout {
        &self.layout
    }

    /// Has `stage` already been completed for `tic`, so that it can be skipped?
    ///
    /// Always `false` in overwrite mode, [`MilestoneStore::is_complete`] otherwise.
    pub fn is_done(&self, tic: TicId, stage: Stage) -> bool {
        !self.overwrite && self.is_complete(tic, stage)
    }

    /// Do the outputs of `stage` exist for `tic`, whatever the overwrite mode?
    ///
    /// For the download and results stages the marker must parse, be flagged complete, and
    /// every artifact it lists must still exist. For the analysis stage only the engine
    /// summary is looked at. Downstream stages use this to decide whether their input is
    /// ready.
    pub fn is_complete(&self, tic: TicId, stage: Stage) -> bool {
        if stage == Stage::Analysis {
            return self.layout.analysis_summary(tic).is_file();
        }

        let record = match self.read(tic, stage) {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(e) => {
                debug!("unreadable {stage} milestone for {tic}: {e}");
                return false;
            }
        };
        if !record.completed || record.stage != stage {
            return false;
        }

        let dir = self.layout.stage_dir(tic, stage);
        match record
            .artifacts
            .iter()
            .find(|a| !dir.join(a.as_str()).exists())
        {
            Some(missing) => {
                debug!("{stage} milestone of {tic} vouches for missing artifact {missing}");
                false
            }
            None => true,
        }
    }

    /// Persist the completion of `stage` for `tic`.
    ///
    /// Must be called only after every artifact listed is flushed to disk. The marker itself is
    /// written atomically.
    ///
    /// Arguments
    /// -----------------
    /// * `params`: stage parameters, stored verbatim.
    /// * `artifacts`: files vouched for, as paths relative to the stage directory (absolute
    ///   paths inside the stage directory are relativised).
    ///
    /// Return
    /// ----------
    /// * The path of the written marker.
    /// * [`PipelineError::MilestoneNotWritable`] for the analysis stage.
    pub fn mark_done<P: AsRef<Utf8Path>>(
        &self,
        tic: TicId,
        stage: Stage,
        params: serde_json::Value,
        artifacts: &[P],
    ) -> Result<Utf8PathBuf, PipelineError> {
        if stage == Stage::Analysis {
            return Err(PipelineError::MilestoneNotWritable(stage.to_string()));
        }

        let dir = self.layout.stage_dir(tic, stage);
        let artifacts = artifacts
            .iter()
            .map(|a| {
                let a = a.as_ref();
                a.strip_prefix(&dir).unwrap_or(a).to_string()
            })
            .collect();

        let record = MilestoneRecord {
            stage,
            completed: true,
            params,
            artifacts,
            timestamp: Epoch::now()
                .map(|now| now.to_string())
                .unwrap_or_default(),
        };

        let path = self.layout.milestone_file(tic, stage);
        write_json_atomic(&path, &record)?;
        debug!("{stage} milestone written for {tic}");
        Ok(path)
    }

    /// Parsed marker of `stage` for `tic`, `None` when absent.
    pub fn read(&self, tic: TicId, stage: Stage) -> Result<Option<MilestoneRecord>, PipelineError> {
        let path = self.layout.milestone_file(tic, stage);
        if !path.is_file() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }
}
