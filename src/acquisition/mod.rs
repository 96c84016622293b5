//! # Acquisition stage
//!
//! For every target, search the archive, download every matching observation file into
//! `download/<TIC:010>/`, summarize their headers into `segments.json`, and mark the target
//! done.
//!
//! ## Per-target flow
//!
//! 1. Skip when the download milestone is valid (unless overwriting).
//! 2. Search with the configured mission / author / exposure time. No hit: the target is
//!    reported *empty* and not marked, so a later run retries it.
//! 3. Fetch each hit. Files already present from an interrupted run are reused since
//!    downloads are atomic; overwrite mode fetches them again in place.
//! 4. Read each file header into a [`SegmentDescriptor`]. An unreadable header is logged and
//!    the segment kept with unknown quality, ranking it last.
//! 5. Write the manifest, then the milestone.
//!
//! Any search or download failure becomes a [`PipelineError::Acquisition`] for that target
//! only; the loop carries on. Targets are processed sequentially.
pub mod download;
pub mod search;

use serde_json::json;
use tracing::{info, warn};

use crate::catalogue::TargetRecord;
use crate::config::PipelineConfig;
use crate::constants::SEGMENTS_MANIFEST;
use crate::milestones::{MilestoneStore, Stage};
use crate::pipeline_errors::PipelineError;
use crate::progress::StageProgress;
use crate::report::{StageReport, TargetOutcome};
use crate::segments::{SegmentDescriptor, SegmentManifest};

use download::Downloader;
use search::{SearchClient, SearchCriteria};

pub struct AcquisitionStage<'a> {
    config: &'a PipelineConfig,
    store: MilestoneStore,
    search: &'a dyn SearchClient,
    downloader: Downloader,
}

impl<'a> AcquisitionStage<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        search: &'a dyn SearchClient,
    ) -> Result<Self, PipelineError> {
        Ok(AcquisitionStage {
            config,
            store: config.milestone_store(),
            search,
            downloader: Downloader::new()?,
        })
    }

    fn criteria(&self) -> SearchCriteria {
        SearchCriteria {
            mission: self.config.acquisition.mission.clone(),
            author: self.config.acquisition.author.clone(),
            exptime: self.config.acquisition.exptime,
        }
    }

    /// Acquire every target in turn.
    pub fn run(&self, targets: &[TargetRecord]) -> StageReport {
        let mut report = StageReport::new(Stage::Download);
        let progress = StageProgress::new("download", targets.len());

        for target in targets {
            let outcome = match self.acquire(target) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("{e}");
                    TargetOutcome::Failed(e.to_string())
                }
            };
            report.record(target.tic.to_string(), outcome);
            progress.tick();
        }

        progress.finish();
        info!("{report}");
        report
    }

    /// Acquire one target.
    ///
    /// Return
    /// ----------
    /// * `Skipped`, `Empty` or `Succeeded`.
    /// * A [`PipelineError::Acquisition`] carrying the target and the cause.
    pub fn acquire(&self, target: &TargetRecord) -> Result<TargetOutcome, PipelineError> {
        let tic = target.tic;
        if self.store.is_done(tic, Stage::Download) {
            info!("{target}: already downloaded, skipping");
            return Ok(TargetOutcome::Skipped);
        }

        let fail = |e: PipelineError| PipelineError::acquisition(&tic.to_string(), e);
        let criteria = self.criteria();
        let hits = self.search.search(target, &criteria).map_err(fail)?;
        if hits.is_empty() {
            info!(
                "{target}: no {} {} {} light curve found",
                criteria.mission, criteria.author, criteria.exptime
            );
            return Ok(TargetOutcome::Empty);
        }
        info!("{target}: {} segment(s) to fetch", hits.len());

        let layout = self.store.layout();
        let dir = layout.download_dir(tic);
        let mut segments = Vec::with_capacity(hits.len());
        for hit in &hits {
            let dest = dir.join(&hit.file_name);
            if self.store.overwrite() || !dest.is_file() {
                self.downloader.fetch(&hit.uri, &dest).map_err(fail)?;
            }

            let descriptor = match SegmentDescriptor::from_fits(&dest, &hit.uri) {
                Ok(mut d) => {
                    d.sector = d.sector.or(hit.sector);
                    d
                }
                Err(e) => {
                    warn!("{target}: unreadable header in {}: {e}", hit.file_name);
                    SegmentDescriptor {
                        file_name: hit.file_name.clone(),
                        sector: hit.sector,
                        pdc_tot: None,
                        pdc_noi: None,
                        tstart: None,
                        tstop: None,
                        source_uri: hit.uri.clone(),
                    }
                }
            };
            segments.push(descriptor);
        }

        let manifest = SegmentManifest { tic, segments };
        manifest
            .write(&layout.segments_manifest(tic))
            .map_err(fail)?;

        let mut artifacts: Vec<String> = manifest
            .segments
            .iter()
            .map(|s| s.file_name.clone())
            .collect();
        artifacts.push(SEGMENTS_MANIFEST.to_string());

        let params = json!({
            "criteria": criteria,
            "segments": manifest.segments.len(),
            "target": target,
        });
        self.store
            .mark_done(tic, Stage::Download, params, &artifacts)
            .map_err(fail)?;

        info!("{target}: {} segment(s) downloaded", manifest.segments.len());
        Ok(TargetOutcome::Succeeded)
    }
}
