#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread::ThreadId;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use fitsio::tables::{ColumnDataType, ColumnDescription};
use fitsio::FitsFile;
use platodebs::acquisition::search::{SearchClient, SearchCriteria, SearchHit};
use platodebs::analysis::engine::{AnalysisEngine, AnalysisJob};
use platodebs::catalogue::{TargetRecord, TicId};
use platodebs::config::{PipelineConfig, PipelineConfigBuilder};
use platodebs::layout::write_atomic;
use platodebs::pipeline_errors::PipelineError;
use tempfile::TempDir;

/// Eclipse ephemeris shared by the synthetic segments and [`SummaryEngine`].
pub const T_MEAN: f64 = 1000.0;
pub const PERIOD: f64 = 2.0;
pub const HALF_DURATION: f64 = 0.05;

/// SPOC-like light-curve file: `SECTOR` in the primary header, quality pair and span in the
/// `LIGHTCURVE` table holding `TIME`, `PDCSAP_FLUX`, `PDCSAP_FLUX_ERR` and `QUALITY`.
pub fn write_lightcurve_fits(
    path: &Utf8Path,
    sector: u32,
    pdc_tot: f64,
    pdc_noi: f64,
    time: &[f64],
    flux: &[f64],
) {
    let mut fptr = FitsFile::create(path).open().unwrap();
    let primary = fptr.primary_hdu().unwrap();
    primary
        .write_key(&mut fptr, "SECTOR", i64::from(sector))
        .unwrap();

    let column = |name: &str, kind: ColumnDataType| {
        ColumnDescription::new(name).with_type(kind).create().unwrap()
    };
    let columns = [
        column("TIME", ColumnDataType::Double),
        column("PDCSAP_FLUX", ColumnDataType::Float),
        column("PDCSAP_FLUX_ERR", ColumnDataType::Float),
        column("QUALITY", ColumnDataType::Int),
    ];
    let table = fptr.create_table("LIGHTCURVE", &columns).unwrap();
    table.write_key(&mut fptr, "PDC_TOT", pdc_tot).unwrap();
    table.write_key(&mut fptr, "PDC_NOI", pdc_noi).unwrap();
    table
        .write_key(&mut fptr, "TSTART", time.first().copied().unwrap_or(0.0))
        .unwrap();
    table
        .write_key(&mut fptr, "TSTOP", time.last().copied().unwrap_or(0.0))
        .unwrap();

    let flux: Vec<f32> = flux.iter().map(|f| *f as f32).collect();
    table.write_col(&mut fptr, "TIME", time).unwrap();
    table.write_col(&mut fptr, "PDCSAP_FLUX", &flux).unwrap();
    table
        .write_col(&mut fptr, "PDCSAP_FLUX_ERR", &vec![0.0005_f32; time.len()])
        .unwrap();
    table
        .write_col(&mut fptr, "QUALITY", &vec![0_i32; time.len()])
        .unwrap();
}

/// Six days of 0.01 d cadence: eclipses on the shared ephemeris plus a sinusoid of
/// semi-amplitude `amplitude`.
pub fn write_eclipsing_segment(path: &Utf8Path, sector: u32, pdc_tot: f64, amplitude: f64) {
    let start = T_MEAN + 30.0 * f64::from(sector);
    let time: Vec<f64> = (0..600).map(|i| start + i as f64 * 0.01).collect();
    let flux: Vec<f64> = time
        .iter()
        .map(|&t| {
            let phase = (t - T_MEAN - 0.5 + 0.5 * PERIOD).rem_euclid(PERIOD) - 0.5 * PERIOD;
            let eclipse = if phase.abs() < HALF_DURATION { 0.3 } else { 0.0 };
            1000.0 * (1.0 + amplitude * (std::f64::consts::TAU * t / 0.7).sin() - eclipse)
        })
        .collect();
    write_lightcurve_fits(path, sector, pdc_tot, 0.1, &time, &flux);
}

/// Summary as the engine writes it, matching [`write_eclipsing_segment`].
pub fn summary_csv() -> String {
    format!(
        "# analysis summary\nname,val,desc\n\
         t_mean,{T_MEAN},reference\nperiod,{PERIOD},period\np_err,0.0001,\n\
         t_1,0.5,primary\nt_1_1,{},\nt_1_2,{},\n",
        0.5 - HALF_DURATION,
        0.5 + HALF_DURATION
    )
}

/// Scratch catalogue: roster, archive of segment files and search listing.
pub struct Workspace {
    _dir: TempDir,
    pub root: Utf8PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_path_buf();
        Workspace { _dir: dir, root }
    }

    pub fn roster(&self, csv: &str) -> Utf8PathBuf {
        let path = self.root.join("roster.csv");
        std::fs::write(&path, csv).unwrap();
        path
    }

    /// Store `bytes` as `archive/<name>`, returning the listing-relative URI.
    pub fn archive_file(&self, name: &str, bytes: &[u8]) -> String {
        write_atomic(&self.root.join("archive").join(name), bytes).unwrap();
        format!("archive/{name}")
    }

    /// Store an eclipsing light curve as `archive/<name>`, returning the listing-relative URI.
    pub fn archive_segment(
        &self,
        name: &str,
        sector: u32,
        pdc_tot: f64,
        amplitude: f64,
    ) -> String {
        let archive = self.root.join("archive");
        std::fs::create_dir_all(&archive).unwrap();
        write_eclipsing_segment(&archive.join(name), sector, pdc_tot, amplitude);
        format!("archive/{name}")
    }

    /// Listing rows `(target, uri, sector)`, all TESS / SPOC / 120 s.
    pub fn listing(&self, rows: &[(&str, &str, u32)]) -> Utf8PathBuf {
        let mut csv = String::from("target,mission,author,exptime,uri,sector\n");
        for (target, uri, sector) in rows {
            csv.push_str(&format!("{target},TESS,SPOC,120,{uri},{sector}\n"));
        }
        let path = self.root.join("listing.csv");
        std::fs::write(&path, csv).unwrap();
        path
    }

    pub fn catalogue(&self) -> Utf8PathBuf {
        self.root.join("catalogue")
    }

    pub fn builder(&self) -> PipelineConfigBuilder {
        PipelineConfig::builder()
            .input_file(self.root.join("roster.csv"))
            .catalogue_dir(self.catalogue())
            .listing(self.root.join("listing.csv"))
    }
}

/// Engine writing [`summary_csv`] for every job, except for the targets told to fail or
/// panic. Keeps track of the jobs it ran and of the peak concurrency.
#[derive(Default)]
pub struct SummaryEngine {
    pub fail: Vec<TicId>,
    pub panic: Vec<TicId>,
    pub delay: Duration,
    pub jobs: Mutex<Vec<AnalysisJob>>,
    pub threads: Mutex<Vec<ThreadId>>,
    pub running: AtomicUsize,
    pub peak: AtomicUsize,
}

impl SummaryEngine {
    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

impl AnalysisEngine for SummaryEngine {
    fn analyse(&self, job: &AnalysisJob) -> Result<(), PipelineError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.jobs.lock().unwrap().push(job.clone());
        self.threads
            .lock()
            .unwrap()
            .push(std::thread::current().id());
        std::thread::sleep(self.delay);
        self.running.fetch_sub(1, Ordering::SeqCst);

        let tic = job.target.tic;
        if self.panic.contains(&tic) {
            panic!("engine crashed on {tic}");
        }
        if self.fail.contains(&tic) {
            return Err(PipelineError::analysis_job(&tic.to_string(), "model did not converge"));
        }
        write_atomic(&job.summary, summary_csv().as_bytes())
    }
}

/// Search collaborator that is unreachable for some targets and empty for the others.
pub struct FlakySearch {
    pub unreachable: Vec<TicId>,
}

impl SearchClient for FlakySearch {
    fn search(
        &self,
        target: &TargetRecord,
        _criteria: &SearchCriteria,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        if self.unreachable.contains(&target.tic) {
            return Err(PipelineError::IoError(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "archive timed out",
            )));
        }
        Ok(Vec::new())
    }
}

/// Mark `tic` downloaded with `n` placeholder segments, without going through the
/// acquisition stage.
pub fn fake_download(config: &PipelineConfig, tic: TicId, n: u32) {
    use platodebs::milestones::Stage;
    use platodebs::segments::{SegmentDescriptor, SegmentManifest};

    let store = config.milestone_store();
    let layout = store.layout();
    let segments: Vec<SegmentDescriptor> = (1..=n)
        .map(|sector| SegmentDescriptor {
            file_name: format!("s{sector:04}.fits"),
            sector: Some(sector),
            pdc_tot: Some(0.9),
            pdc_noi: Some(0.1),
            tstart: None,
            tstop: None,
            source_uri: String::new(),
        })
        .collect();
    let mut artifacts = Vec::new();
    for segment in &segments {
        write_atomic(&layout.download_dir(tic).join(&segment.file_name), b"").unwrap();
        artifacts.push(segment.file_name.clone());
    }
    SegmentManifest { tic, segments }
        .write(&layout.segments_manifest(tic))
        .unwrap();
    artifacts.push("segments.json".to_string());
    store
        .mark_done(tic, Stage::Download, serde_json::json!({}), &artifacts)
        .unwrap();
}
