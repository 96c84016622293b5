mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{fake_download, SummaryEngine, Workspace};
use platodebs::analysis::AnalysisStage;
use platodebs::catalogue::{TargetRecord, TicId};
use platodebs::config::PipelineConfig;
use platodebs::report::TargetOutcome;

fn targets(n: u64) -> Vec<TargetRecord> {
    (1..=n)
        .map(|i| TargetRecord::new(format!("TIC {i}"), TicId(i), Some(1.0)))
        .collect()
}

fn downloaded(ws: &Workspace, pool_size: usize, n: u64) -> PipelineConfig {
    let config = ws.builder().pool_size(pool_size).build().unwrap();
    for i in 1..=n {
        fake_download(&config, TicId(i), 3);
    }
    config
}

#[test]
fn test_pool_bounds_concurrency() {
    let ws = Workspace::new();
    let config = downloaded(&ws, 3, 8);
    let engine = SummaryEngine {
        delay: Duration::from_millis(60),
        ..Default::default()
    };

    let report = AnalysisStage::new(&config, &engine)
        .run(&targets(8))
        .unwrap();
    assert_eq!(report.succeeded(), 8);

    let peak = engine.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "{peak} jobs ran at once with a pool of 3");
    assert!(peak > 1, "jobs never overlapped");
    assert!(engine
        .threads
        .lock()
        .unwrap()
        .iter()
        .all(|id| *id != std::thread::current().id()));
}

#[test]
fn test_single_worker_runs_inline() {
    let ws = Workspace::new();
    let config = downloaded(&ws, 1, 3);
    let engine = SummaryEngine::default();

    let report = AnalysisStage::new(&config, &engine)
        .run(&targets(3))
        .unwrap();
    assert_eq!(report.succeeded(), 3);
    assert_eq!(engine.peak.load(Ordering::SeqCst), 1);

    let me = std::thread::current().id();
    assert!(engine.threads.lock().unwrap().iter().all(|id| *id == me));

    // roster order is kept in the report
    let order: Vec<&str> = report.outcomes.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(order, vec!["TIC1", "TIC2", "TIC3"]);
}

#[test]
fn test_failures_and_panics_are_isolated() {
    let ws = Workspace::new();
    let config = downloaded(&ws, 2, 5);
    let engine = SummaryEngine {
        fail: vec![TicId(2)],
        panic: vec![TicId(4)],
        ..Default::default()
    };

    let report = AnalysisStage::new(&config, &engine)
        .run(&targets(5))
        .unwrap();
    assert_eq!(report.succeeded(), 3);
    assert_eq!(report.failed_targets(), vec!["TIC2", "TIC4"]);
    match report.outcome_of("TIC4") {
        Some(TargetOutcome::Failed(reason)) => {
            assert!(reason.contains("engine panicked: engine crashed on TIC4"))
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let layout = config.layout();
    assert!(layout.analysis_summary(TicId(1)).is_file());
    assert!(!layout.analysis_summary(TicId(2)).exists());
    assert!(!layout.analysis_summary(TicId(4)).exists());

    // failed targets are retried on the next pass, the others skipped
    let retry = SummaryEngine::default();
    let report = AnalysisStage::new(&config, &retry)
        .run(&targets(5))
        .unwrap();
    assert_eq!(report.skipped(), 3);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(retry.job_count(), 2);
}

#[test]
fn test_selection_follows_period() {
    let ws = Workspace::new();
    let config = ws.builder().build().unwrap();
    fake_download(&config, TicId(7), 12);

    let engine = SummaryEngine::default();
    let long_period = TargetRecord::new("TIC 7", TicId(7), Some(30.0));
    let job = AnalysisStage::new(&config, &engine)
        .build_job(&long_period)
        .unwrap();
    // ceil(30 / 4) = 8 segments out of 12
    assert_eq!(job.files.len(), 8);
    assert!(job.sectors.windows(2).all(|w| w[0] < w[1]));

    let short_period = TargetRecord::new("TIC 7", TicId(7), Some(0.5));
    let job = AnalysisStage::new(&config, &engine)
        .build_job(&short_period)
        .unwrap();
    assert_eq!(job.files.len(), 5);
}
