//! Resumable TESS pipeline measuring the residual variability of eclipsing binaries.
//!
//! Three independent stages run over a filtered target roster, each keyed by target and
//! guarded by the [`milestones::MilestoneStore`]:
//!
//! * [`acquisition::AcquisitionStage`]: search and download light-curve segments.
//! * [`analysis::AnalysisStage`]: hand a ranked subset of segments to an external engine.
//! * [`results::ResultsStage`]: mask eclipses, flatten, measure variability.
pub mod acquisition;
pub mod analysis;
pub mod catalogue;
pub mod config;
pub mod constants;
pub mod layout;
pub mod milestones;
pub mod pipeline_errors;
pub mod progress;
pub mod report;
pub mod results;
pub mod segments;
