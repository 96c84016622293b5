use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};

use platodebs::acquisition::search::ExposureTime;

/// Top-level parser of the `platodebs` binary.
#[derive(Debug, Parser)]
#[command(
    name = "platodebs",
    version,
    about = "Resumable TESS pipeline measuring the residual variability of eclipsing binaries"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (default: ./platodebs.toml when present)
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Search and download the light-curve segments of each target
    Download(DownloadArgs),
    /// Run the analysis engine over the best segments of each target
    Analyse(AnalyseArgs),
    /// Mask eclipses, flatten and measure the residual variability
    Results(ResultsArgs),
}

/// Target selection, shared by every stage.
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Target roster (CSV)
    pub input_file: Option<Utf8PathBuf>,

    /// Only process these identifiers or TIC numbers (comma separated or repeated)
    #[arg(short, long, value_delimiter = ',')]
    pub targets: Vec<String>,

    /// Redo work already marked complete
    #[arg(short, long)]
    pub overwrite: bool,

    /// Root of the per-target output tree
    #[arg(long)]
    pub catalogue_dir: Option<Utf8PathBuf>,

    /// Roster column to order targets by, `-COLUMN` for descending
    #[arg(long, allow_hyphen_values = true)]
    pub sort_by: Option<String>,
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(short, long)]
    pub mission: Option<String>,

    #[arg(short, long)]
    pub author: Option<String>,

    /// fast, short, long or a number of seconds
    #[arg(short, long)]
    pub exptime: Option<ExposureTime>,

    /// CSV listing backing the archive search
    #[arg(long)]
    pub listing: Option<Utf8PathBuf>,
}

#[derive(Debug, Args)]
pub struct AnalyseArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Concurrent engine jobs
    #[arg(short, long)]
    pub pool_size: Option<usize>,

    /// Engine executable
    #[arg(long)]
    pub engine: Option<String>,

    /// Engine argument template entry, repeat for each argument
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ResultsArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long)]
    pub flux_column: Option<String>,

    /// QUALITY bits dropping a sample
    #[arg(long)]
    pub quality_bitmask: Option<u32>,

    /// Multiplier applied to the engine eclipse durations
    #[arg(long)]
    pub duration_scale: Option<f64>,
}

/// Partial configuration holding only what was given on the command line.
#[derive(Debug, Default, Serialize)]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    input_file: Option<Utf8PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    catalogue_dir: Option<Utf8PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    targets: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    overwrite: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sort_by: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    acquisition: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    analysis: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    results: Map<String, Value>,
}

fn put<T: Serialize>(section: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value.and_then(|v| serde_json::to_value(v).ok()) {
        section.insert(key.to_string(), value);
    }
}

impl Command {
    pub fn common(&self) -> &CommonArgs {
        match self {
            Command::Download(args) => &args.common,
            Command::Analyse(args) => &args.common,
            Command::Results(args) => &args.common,
        }
    }

    pub fn overrides(&self) -> CliOverrides {
        let common = self.common();
        let mut overrides = CliOverrides {
            input_file: common.input_file.clone(),
            catalogue_dir: common.catalogue_dir.clone(),
            targets: (!common.targets.is_empty()).then(|| common.targets.clone()),
            overwrite: common.overwrite.then_some(true),
            sort_by: common.sort_by.clone(),
            ..CliOverrides::default()
        };

        match self {
            Command::Download(args) => {
                let section = &mut overrides.acquisition;
                put(section, "mission", args.mission.clone());
                put(section, "author", args.author.clone());
                put(section, "exptime", args.exptime);
                put(section, "listing", args.listing.clone());
            }
            Command::Analyse(args) => {
                let section = &mut overrides.analysis;
                put(section, "pool_size", args.pool_size);
                put(section, "program", args.engine.clone());
                put(
                    section,
                    "args",
                    (!args.engine_args.is_empty()).then(|| args.engine_args.clone()),
                );
            }
            Command::Results(args) => {
                let section = &mut overrides.results;
                put(section, "flux_column", args.flux_column.clone());
                put(section, "quality_bitmask", args.quality_bitmask);
                put(section, "duration_scale", args.duration_scale);
            }
        }
        overrides
    }
}
