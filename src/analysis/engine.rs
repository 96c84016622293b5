//! The analysis engine seam.
//!
//! The pipeline does not model eclipsing binaries itself: it hands the selected segment files
//! of a target to an [`AnalysisEngine`] and only looks at the summary file the engine leaves
//! behind. [`CommandEngine`] is the shipped implementation and runs an external program, one
//! child process per job.
//!
//! Argument template
//! -----------------
//! Each entry of [`AnalysisParams::args`] is rendered per job. Placeholders:
//!
//! | placeholder  | replaced by                                                        |
//! |--------------|--------------------------------------------------------------------|
//! | `{tic}`      | bare TIC number (`98853987`)                                       |
//! | `{target}`   | roster identifier                                                  |
//! | `{period}`   | catalogue period in days, `0` when unknown                         |
//! | `{save_dir}` | analysis root, under which the engine creates `<TIC>_analysis/`    |
//! | `{overwrite}`| alone: `--overwrite` or nothing; embedded: `true` / `false`        |
//! | `{files}`    | alone: one argument per segment file; embedded: comma-joined paths |
use std::fs::File;
use std::process::{Command, Stdio};

use camino::Utf8PathBuf;
use itertools::Itertools;
use tracing::debug;

use crate::catalogue::TargetRecord;
use crate::config::AnalysisParams;
use crate::pipeline_errors::PipelineError;

/// Everything an engine needs to analyse one target.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisJob {
    pub target: TargetRecord,
    /// Selected segment files, in sector order
    pub files: Vec<Utf8PathBuf>,
    pub sectors: Vec<Option<u32>>,
    /// Engine save directory, shared by all targets
    pub save_dir: Utf8PathBuf,
    /// `<save_dir>/<TIC>_analysis`
    pub target_dir: Utf8PathBuf,
    /// Summary the engine must produce
    pub summary: Utf8PathBuf,
    pub runner_log: Utf8PathBuf,
    pub overwrite: bool,
}

/// Light-curve analysis collaborator.
///
/// Implementations are called concurrently from the analysis pool, one job per call; a job
/// only ever writes below its own `target_dir`.
pub trait AnalysisEngine: Sync {
    /// Run the analysis of `job` to completion.
    ///
    /// Returning `Ok(())` does not by itself mark the job successful: the stage also
    /// checks that [`AnalysisJob::summary`] exists afterwards.
    fn analyse(&self, job: &AnalysisJob) -> Result<(), PipelineError>;
}

/// Engine running an external program.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        CommandEngine {
            program: program.into(),
            args,
        }
    }

    /// Engine configured by the `[analysis]` section.
    pub fn from_params(params: &AnalysisParams) -> Result<Self, PipelineError> {
        let program = params
            .program
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                PipelineError::InvalidConfig("analysis.program must be set to run the engine".into())
            })?;
        Ok(CommandEngine::new(program, params.args.clone()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Argument list of `job`, placeholders substituted.
    pub fn render_args(&self, job: &AnalysisJob) -> Vec<String> {
        let period = job
            .target
            .period
            .map_or_else(|| "0".to_string(), |p| p.to_string());
        let files = job.files.iter().map(|f| f.as_str()).join(",");

        let mut rendered = Vec::with_capacity(self.args.len() + job.files.len());
        for arg in &self.args {
            match arg.as_str() {
                "{files}" => rendered.extend(job.files.iter().map(|f| f.to_string())),
                "{overwrite}" => {
                    if job.overwrite {
                        rendered.push("--overwrite".to_string());
                    }
                }
                _ => rendered.push(
                    arg.replace("{tic}", &job.target.tic.0.to_string())
                        .replace("{target}", &job.target.identifier)
                        .replace("{period}", &period)
                        .replace("{save_dir}", job.save_dir.as_str())
                        .replace("{overwrite}", &job.overwrite.to_string())
                        .replace("{files}", &files),
                ),
            }
        }
        rendered
    }
}

impl AnalysisEngine for CommandEngine {
    fn analyse(&self, job: &AnalysisJob) -> Result<(), PipelineError> {
        std::fs::create_dir_all(&job.target_dir)?;
        let log = File::create(&job.runner_log)?;
        let args = self.render_args(job);
        debug!("{}: {} {}", job.target.tic, self.program, args.join(" "));

        let status = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .status()
            .map_err(|e| {
                PipelineError::analysis_job(
                    &job.target.tic.to_string(),
                    format!("cannot start {}: {e}", self.program),
                )
            })?;

        if !status.success() {
            return Err(PipelineError::analysis_job(
                &job.target.tic.to_string(),
                format!("{} exited with {status}, see {}", self.program, job.runner_log),
            ));
        }
        Ok(())
    }
}
