//! Outcome bookkeeping of a stage run.
//!
//! Each stage returns a [`StageReport`]: one [`TargetOutcome`] per attempted target, in the
//! order the targets were processed. `Display` prints the counts on one line; the alternate
//! form (`{:#}`) adds the failed identifiers with their reasons.
use std::fmt;

use itertools::Itertools;

use crate::milestones::Stage;

#[derive(Debug, Clone, PartialEq)]
pub enum TargetOutcome {
    /// Completion marker already present
    Skipped,
    Succeeded,
    /// Search returned nothing to download
    Empty,
    /// Upstream stage output missing
    NotReady,
    /// No usable segment for the results stage
    Unavailable,
    Failed(String),
}

impl TargetOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TargetOutcome::Skipped => "skipped",
            TargetOutcome::Succeeded => "succeeded",
            TargetOutcome::Empty => "empty",
            TargetOutcome::NotReady => "not ready",
            TargetOutcome::Unavailable => "unavailable",
            TargetOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: Stage,
    pub outcomes: Vec<(String, TargetOutcome)>,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        StageReport {
            stage,
            outcomes: Vec::new(),
        }
    }

    pub fn record(&mut self, target: impl Into<String>, outcome: TargetOutcome) {
        self.outcomes.push((target.into(), outcome));
    }

    pub fn count(&self, label: &str) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.label() == label)
            .count()
    }

    pub fn succeeded(&self) -> usize {
        self.count("succeeded")
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    pub fn failed_targets(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, TargetOutcome::Failed(_)))
            .map(|(t, _)| t.as_str())
            .collect()
    }

    /// Outcome recorded for `target`, if attempted.
    pub fn outcome_of(&self, target: &str) -> Option<&TargetOutcome> {
        self.outcomes
            .iter()
            .find(|(t, _)| t == target)
            .map(|(_, o)| o)
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = ["succeeded", "skipped", "empty", "not ready", "unavailable", "failed"]
            .iter()
            .map(|label| (label, self.count(label)))
            .filter(|(_, n)| *n > 0)
            .map(|(label, n)| format!("{n} {label}"))
            .join(", ");
        write!(
            f,
            "{} stage: {} target(s){}{}",
            self.stage,
            self.outcomes.len(),
            if counts.is_empty() { "" } else { ": " },
            counts
        )?;

        let failed = self
            .outcomes
            .iter()
            .filter_map(|(t, o)| match o {
                TargetOutcome::Failed(reason) => Some((t, reason)),
                _ => None,
            })
            .collect_vec();
        if failed.is_empty() {
            return Ok(());
        }
        if f.alternate() {
            for (target, reason) in failed {
                write!(f, "\n  - {target}: {reason}")?;
            }
            Ok(())
        } else {
            write!(f, " [{}]", failed.iter().map(|(t, _)| t).join(", "))
        }
    }
}
