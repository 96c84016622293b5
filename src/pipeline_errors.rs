use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Malformed target catalogue: {0}")]
    CatalogueFormat(String),

    #[error("Acquisition failed for {target}: {reason}")]
    Acquisition { target: String, reason: String },

    #[error("Analysis job failed for {target}: {reason}")]
    AnalysisJob { target: String, reason: String },

    #[error("Unable to read segment {file}: {reason}")]
    SegmentRead { file: String, reason: String },

    #[error("No usable segment for target {0}")]
    TargetUnavailable(String),

    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid FITS content: {0}")]
    FitsFormat(String),

    #[error("Invalid analysis summary: {0}")]
    SummaryFormat(String),

    #[error("Milestones of the {0} stage are not written by the pipeline")]
    MilestoneNotWritable(String),

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("cfitsio error: {0}")]
    FitsioError(#[from] fitsio::errors::Error),

    #[error("HTTP reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("Configuration loading error: {0}")]
    FigmentError(#[from] figment::Error),

    #[error("Unable to build the analysis worker pool: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),

    #[error("Unable to move a temporary file into place: {0}")]
    PersistError(#[from] tempfile::PersistError),
}

impl PipelineError {
    /// Wrap any displayable failure as an [`PipelineError::Acquisition`] for `target`.
    pub fn acquisition(target: &str, reason: impl std::fmt::Display) -> Self {
        PipelineError::Acquisition {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Wrap any displayable failure as an [`PipelineError::AnalysisJob`] for `target`.
    pub fn analysis_job(target: &str, reason: impl std::fmt::Display) -> Self {
        PipelineError::AnalysisJob {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Wrap any displayable failure as a [`PipelineError::SegmentRead`] for `file`.
    pub fn segment_read(file: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        PipelineError::SegmentRead {
            file: file.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl PartialEq for PipelineError {
    fn eq(&self, other: &Self) -> bool {
        use PipelineError::*;
        match (self, other) {
            (CatalogueFormat(a), CatalogueFormat(b)) => a == b,
            (
                Acquisition {
                    target: ta,
                    reason: ra,
                },
                Acquisition {
                    target: tb,
                    reason: rb,
                },
            ) => ta == tb && ra == rb,
            (
                AnalysisJob {
                    target: ta,
                    reason: ra,
                },
                AnalysisJob {
                    target: tb,
                    reason: rb,
                },
            ) => ta == tb && ra == rb,
            (SegmentRead { file: fa, reason: ra }, SegmentRead { file: fb, reason: rb }) => {
                fa == fb && ra == rb
            }
            (TargetUnavailable(a), TargetUnavailable(b)) => a == b,
            (InvalidConfig(a), InvalidConfig(b)) => a == b,
            (FitsFormat(a), FitsFormat(b)) => a == b,
            (SummaryFormat(a), SummaryFormat(b)) => a == b,
            (MilestoneNotWritable(a), MilestoneNotWritable(b)) => a == b,

            // Foreign errors are not comparable: same variant means equal
            (IoError(_), IoError(_)) => true,
            (CsvError(_), CsvError(_)) => true,
            (JsonError(_), JsonError(_)) => true,
            (FitsioError(_), FitsioError(_)) => true,
            (ReqwestError(_), ReqwestError(_)) => true,
            (FigmentError(_), FigmentError(_)) => true,
            (ThreadPoolError(_), ThreadPoolError(_)) => true,
            (PersistError(_), PersistError(_)) => true,

            _ => false,
        }
    }
}
