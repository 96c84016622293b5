//! # Catalogue directory layout
//!
//! Every artifact of the pipeline lives under one catalogue directory, keyed by target:
//!
//! ```text
//! <catalogue>/
//! ├── download/<TIC:010>/          segment files, segments.json, download.milestone.json
//! ├── analysis/<TIC>_analysis/     engine summary, engine log, engine checkpoints (bare TIC number)
//! └── results/
//!     ├── <TIC:010>/               variability.json, results.milestone.json
//!     └── variability_summary.csv
//! ```
//!
//! [`CatalogueLayout`] is the single place where these paths are derived, and
//! [`write_atomic`] / [`write_json_atomic`] the single way stage outputs are written.
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::catalogue::TicId;
use crate::constants::{
    MILESTONE_SUFFIX, SEGMENTS_MANIFEST, VARIABILITY_FILE, VARIABILITY_SUMMARY_FILE,
};
use crate::milestones::Stage;
use crate::pipeline_errors::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueLayout {
    root: Utf8PathBuf,
}

impl CatalogueLayout {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        CatalogueLayout { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn download_dir(&self, tic: TicId) -> Utf8PathBuf {
        self.root.join("download").join(tic.padded())
    }

    pub fn segments_manifest(&self, tic: TicId) -> Utf8PathBuf {
        self.download_dir(tic).join(SEGMENTS_MANIFEST)
    }

    /// Directory handed to the analysis engine as its save directory.
    pub fn analysis_root(&self) -> Utf8PathBuf {
        self.root.join("analysis")
    }

    /// Per-target directory of the engine (`analysis/12345_analysis`).
    ///
    /// The engine names its outputs after the bare TIC number.
    pub fn analysis_dir(&self, tic: TicId) -> Utf8PathBuf {
        self.analysis_root().join(format!("{}_analysis", tic.0))
    }

    /// Summary written by the engine, the completion signal of the analysis stage.
    pub fn analysis_summary(&self, tic: TicId) -> Utf8PathBuf {
        self.analysis_dir(tic)
            .join(format!("{}_analysis_summary.csv", tic.0))
    }

    /// Log written by the engine itself.
    pub fn analysis_log(&self, tic: TicId) -> Utf8PathBuf {
        self.analysis_dir(tic).join(format!("{}.log", tic.0))
    }

    /// Captured stdout/stderr of the engine process.
    pub fn runner_log(&self, tic: TicId) -> Utf8PathBuf {
        self.analysis_dir(tic).join(format!("{}_runner.log", tic.0))
    }

    pub fn results_root(&self) -> Utf8PathBuf {
        self.root.join("results")
    }

    pub fn results_dir(&self, tic: TicId) -> Utf8PathBuf {
        self.results_root().join(tic.padded())
    }

    pub fn variability_file(&self, tic: TicId) -> Utf8PathBuf {
        self.results_dir(tic).join(VARIABILITY_FILE)
    }

    pub fn variability_summary(&self) -> Utf8PathBuf {
        self.results_root().join(VARIABILITY_SUMMARY_FILE)
    }

    /// Directory owning the outputs of `stage` for `tic`.
    pub fn stage_dir(&self, tic: TicId, stage: Stage) -> Utf8PathBuf {
        match stage {
            Stage::Download => self.download_dir(tic),
            Stage::Analysis => self.analysis_dir(tic),
            Stage::Results => self.results_dir(tic),
        }
    }

    /// Marker file `<stage>.milestone.json`, colocated with the stage outputs.
    pub fn milestone_file(&self, tic: TicId, stage: Stage) -> Utf8PathBuf {
        self.stage_dir(tic, stage)
            .join(format!("{}.{MILESTONE_SUFFIX}", stage.name()))
    }
}

/// Durably replace `path` with `contents`.
///
/// The bytes go to a temporary file in the destination directory, are flushed to disk, and
/// the temporary file is renamed over `path`. Readers observe either the old or the new
/// content, never a partial write.
pub fn write_atomic(path: &Utf8Path, contents: &[u8]) -> Result<(), PipelineError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Pretty-printed JSON flavour of [`write_atomic`].
pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), PipelineError> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// Parse the JSON document at `path`.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Utf8Path) -> Result<T, PipelineError> {
    let file = std::fs::File::open(path)?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}
