//! # Pipeline configuration
//!
//! [`PipelineConfig`] gathers every tunable of the three stages. It is built once, validated,
//! and passed explicitly to each stage; there is no global state.
//!
//! ## Sources
//!
//! Layered with `figment`, highest priority last:
//!
//! 1. Built-in defaults ([`PipelineConfig::default`])
//! 2. `platodebs.toml` in the working directory, or the file given with `--config`
//! 3. Environment variables prefixed with `PLATODEBS_`, `__` separating nested sections
//!    (`PLATODEBS_ANALYSIS__POOL_SIZE=4` sets `analysis.pool_size`)
//! 4. Command-line flags
//!
//! ```toml
//! catalogue_dir = "catalogue"
//! targets = ["TIC 98853987"]
//!
//! [acquisition]
//! exptime = "short"
//! listing = "listing.csv"
//!
//! [analysis]
//! pool_size = 4
//! program = "eclipsing-analyse"
//! args = ["--tic", "{tic}", "--out", "{save_dir}", "{files}"]
//!
//! [results.flatten]
//! window_length = 151
//! ```
//!
//! ## Programmatic use
//!
//! ```rust,no_run
//! use platodebs::config::PipelineConfig;
//!
//! let config = PipelineConfig::builder()
//!     .input_file("tessebs_extra.csv")
//!     .catalogue_dir("/data/catalogue")
//!     .targets(vec!["TIC 98853987".into()])
//!     .pool_size(4)
//!     .build()
//!     .unwrap();
//! println!("{config:#}");
//! ```
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::acquisition::search::ExposureTime;
use crate::catalogue::CatalogueColumns;
use crate::constants::{
    quality_flags, DEFAULT_CATALOGUE_DIR, DEFAULT_CONFIG_FILE, DEFAULT_INPUT_FILE, ENV_PREFIX,
};
use crate::layout::CatalogueLayout;
use crate::milestones::MilestoneStore;
use crate::pipeline_errors::PipelineError;
use crate::results::flatten::FlattenParams;
use crate::segments::SelectionParams;

/// Search criteria and listing source of the acquisition stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionParams {
    pub mission: String,
    pub author: String,
    pub exptime: ExposureTime,
    /// CSV listing backing the search service
    pub listing: Option<Utf8PathBuf>,
}

impl Default for AcquisitionParams {
    fn default() -> Self {
        AcquisitionParams {
            mission: "TESS".into(),
            author: "SPOC".into(),
            exptime: ExposureTime::Short,
            listing: None,
        }
    }
}

/// Worker pool and external engine of the analysis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    /// Number of concurrent engine jobs; 1 runs them on the calling thread
    pub pool_size: usize,
    /// Engine executable
    pub program: Option<String>,
    /// Argument template, see [`crate::analysis::engine::CommandEngine`]
    pub args: Vec<String>,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        AnalysisParams {
            pool_size: 1,
            program: None,
            args: vec![
                "--tic".into(),
                "{tic}".into(),
                "--period".into(),
                "{period}".into(),
                "--save-dir".into(),
                "{save_dir}".into(),
                "{overwrite}".into(),
                "{files}".into(),
            ],
        }
    }
}

/// Light-curve processing of the results stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsParams {
    pub flux_column: String,
    /// Samples whose `QUALITY` intersects this mask are dropped
    pub quality_bitmask: u32,
    /// Multiplier applied to the eclipse durations reported by the engine
    pub duration_scale: f64,
    pub flatten: FlattenParams,
}

impl Default for ResultsParams {
    fn default() -> Self {
        ResultsParams {
            flux_column: "PDCSAP_FLUX".into(),
            quality_bitmask: quality_flags::DEFAULT,
            duration_scale: 1.0,
            flatten: FlattenParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Roster of targets
    pub input_file: Utf8PathBuf,
    /// Root of the per-target output tree
    pub catalogue_dir: Utf8PathBuf,
    /// Allow-list of identifiers or TIC numbers; empty means every target
    pub targets: Vec<String>,
    /// Redo completed work
    pub overwrite: bool,
    /// Roster column to sort targets by, `-` prefix for descending
    pub sort_by: Option<String>,
    pub columns: CatalogueColumns,
    pub acquisition: AcquisitionParams,
    pub selection: SelectionParams,
    pub analysis: AnalysisParams,
    pub results: ResultsParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            input_file: DEFAULT_INPUT_FILE.into(),
            catalogue_dir: DEFAULT_CATALOGUE_DIR.into(),
            targets: Vec::new(),
            overwrite: false,
            sort_by: None,
            columns: CatalogueColumns::default(),
            acquisition: AcquisitionParams::default(),
            selection: SelectionParams::default(),
            analysis: AnalysisParams::default(),
            results: ResultsParams::default(),
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }

    /// Provider chain: defaults, TOML file, environment.
    ///
    /// Arguments
    /// -----------------
    /// * `config_file`: explicit TOML file; when `None`, `platodebs.toml` is used if present.
    ///
    /// Return
    /// ----------
    /// * The figment, to which callers may merge further providers (command line).
    pub fn figment(config_file: Option<&Utf8Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));

        let path = config_file.unwrap_or(Utf8Path::new(DEFAULT_CONFIG_FILE));
        if path.is_file() {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extract and validate a configuration from `figment`.
    pub fn from_figment(figment: &Figment) -> Result<Self, PipelineError> {
        let config: PipelineConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, `platodebs.toml` and environment, validated.
    ///
    /// An explicit `config_file` must exist.
    pub fn load(config_file: Option<&Utf8Path>) -> Result<Self, PipelineError> {
        check_config_file(config_file)?;
        Self::from_figment(&Self::figment(config_file))
    }

    /// [`PipelineConfig::load`], with `overrides` merged on top of every other source.
    ///
    /// `overrides` is any serializable partial configuration; keys it leaves out keep their
    /// value from the lower layers.
    pub fn load_with_overrides<T: Serialize>(
        config_file: Option<&Utf8Path>,
        overrides: &T,
    ) -> Result<Self, PipelineError> {
        check_config_file(config_file)?;
        Self::from_figment(&Self::figment(config_file).merge(Serialized::defaults(overrides)))
    }

    pub fn layout(&self) -> CatalogueLayout {
        CatalogueLayout::new(self.catalogue_dir.clone())
    }

    pub fn milestone_store(&self) -> MilestoneStore {
        MilestoneStore::new(self.layout(), self.overwrite)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.input_file.as_str().trim().is_empty() {
            return Err(PipelineError::InvalidConfig("input_file must be set".into()));
        }
        if self.catalogue_dir.as_str().trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "catalogue_dir must be set".into(),
            ));
        }
        if self.columns.identifier.is_empty() || self.columns.period.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "identifier and period column names must be set".into(),
            ));
        }
        if self.analysis.pool_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "analysis.pool_size must be >= 1".into(),
            ));
        }
        if self.results.flux_column.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "results.flux_column must be set".into(),
            ));
        }
        if !(self.results.duration_scale > 0.0 && self.results.duration_scale.is_finite()) {
            return Err(PipelineError::InvalidConfig(
                "results.duration_scale must be > 0".into(),
            ));
        }
        self.selection.validate()?;
        self.results.flatten.validate()?;
        Ok(())
    }
}

fn check_config_file(config_file: Option<&Utf8Path>) -> Result<(), PipelineError> {
    match config_file {
        Some(path) if !path.is_file() => Err(PipelineError::InvalidConfig(format!(
            "configuration file {path} does not exist"
        ))),
        _ => Ok(()),
    }
}

/// Fluent construction of a [`PipelineConfig`], validated by [`PipelineConfigBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input_file(mut self, v: impl Into<Utf8PathBuf>) -> Self {
        self.config.input_file = v.into();
        self
    }
    pub fn catalogue_dir(mut self, v: impl Into<Utf8PathBuf>) -> Self {
        self.config.catalogue_dir = v.into();
        self
    }
    pub fn targets(mut self, v: Vec<String>) -> Self {
        self.config.targets = v;
        self
    }
    pub fn overwrite(mut self, v: bool) -> Self {
        self.config.overwrite = v;
        self
    }
    pub fn sort_by(mut self, v: impl Into<String>) -> Self {
        self.config.sort_by = Some(v.into());
        self
    }
    pub fn columns(mut self, v: CatalogueColumns) -> Self {
        self.config.columns = v;
        self
    }

    // --- Acquisition ---
    pub fn mission(mut self, v: impl Into<String>) -> Self {
        self.config.acquisition.mission = v.into();
        self
    }
    pub fn author(mut self, v: impl Into<String>) -> Self {
        self.config.acquisition.author = v.into();
        self
    }
    pub fn exptime(mut self, v: ExposureTime) -> Self {
        self.config.acquisition.exptime = v;
        self
    }
    pub fn listing(mut self, v: impl Into<Utf8PathBuf>) -> Self {
        self.config.acquisition.listing = Some(v.into());
        self
    }

    // --- Selection / analysis ---
    pub fn selection(mut self, v: SelectionParams) -> Self {
        self.config.selection = v;
        self
    }
    pub fn pool_size(mut self, v: usize) -> Self {
        self.config.analysis.pool_size = v;
        self
    }
    pub fn engine(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.config.analysis.program = Some(program.into());
        self.config.analysis.args = args;
        self
    }

    // --- Results ---
    pub fn flux_column(mut self, v: impl Into<String>) -> Self {
        self.config.results.flux_column = v.into();
        self
    }
    pub fn quality_bitmask(mut self, v: u32) -> Self {
        self.config.results.quality_bitmask = v;
        self
    }
    pub fn duration_scale(mut self, v: f64) -> Self {
        self.config.results.duration_scale = v;
        self
    }
    pub fn flatten(mut self, v: FlattenParams) -> Self {
        self.config.results.flatten = v;
        self
    }

    /// Validate and return the configuration.
    ///
    /// Validation rules
    /// -----------------
    /// * `input_file` and `catalogue_dir` are non-empty.
    /// * `pool_size >= 1`, `duration_scale > 0`.
    /// * Selection: finite threshold, `noise_penalty >= 1`, `min_segments >= 1`,
    ///   `days_per_segment > 0`.
    /// * Flattening: odd `window_length > polyorder`, `sigma > 0`, `break_tolerance > 0`.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl fmt::Display for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !f.alternate() {
            return write!(
                f,
                "PipelineConfig(input={}, catalogue={}, targets={}, overwrite={}, exptime={}, pool={}, flux={})",
                self.input_file,
                self.catalogue_dir,
                if self.targets.is_empty() {
                    "all".to_string()
                } else {
                    self.targets.len().to_string()
                },
                self.overwrite,
                self.acquisition.exptime,
                self.analysis.pool_size,
                self.results.flux_column,
            );
        }

        const PARAM_COL: usize = 44;
        macro_rules! line {
            ($fmt:expr, $val:expr, $comment:expr) => {{
                let s = format!($fmt, $val);
                let pad = " ".repeat(PARAM_COL.saturating_sub(s.len()).max(1));
                writeln!(f, "  {}{}# {}", s, pad, $comment)
            }};
        }

        writeln!(f, "Pipeline configuration")?;
        writeln!(f, "----------------------")?;
        writeln!(f, "[Catalogue]")?;
        line!("input_file      = {}", self.input_file, "Target roster")?;
        line!("catalogue_dir   = {}", self.catalogue_dir, "Output tree root")?;
        line!(
            "targets         = {}",
            if self.targets.is_empty() {
                "<all>".to_string()
            } else {
                self.targets.join(", ")
            },
            "Allow-list"
        )?;
        line!("overwrite       = {}", self.overwrite, "Redo completed work")?;
        line!(
            "sort_by         = {}",
            self.sort_by.as_deref().unwrap_or("<roster order>"),
            "Processing order"
        )?;

        writeln!(f, "\n[Acquisition]")?;
        line!("mission         = {}", self.acquisition.mission, "Search mission")?;
        line!("author          = {}", self.acquisition.author, "Pipeline author")?;
        line!("exptime         = {}", self.acquisition.exptime, "Cadence filter")?;
        line!(
            "listing         = {}",
            self.acquisition
                .listing
                .as_ref()
                .map_or("<none>", |p| p.as_str()),
            "Search listing"
        )?;

        writeln!(f, "\n[Selection]")?;
        line!(
            "noise_threshold = {:.3}",
            self.selection.noise_threshold,
            "PDC_NOI penalty threshold"
        )?;
        line!(
            "noise_penalty   = {:.1}",
            self.selection.noise_penalty,
            "Score divisor when penalised"
        )?;
        line!(
            "min_segments    = {}",
            self.selection.min_segments,
            "Selection floor"
        )?;
        line!(
            "days_per_segment= {:.1} d",
            self.selection.days_per_segment,
            "Period covered per segment"
        )?;

        writeln!(f, "\n[Analysis]")?;
        line!("pool_size       = {}", self.analysis.pool_size, "Concurrent jobs")?;
        line!(
            "program         = {}",
            self.analysis.program.as_deref().unwrap_or("<unset>"),
            "Engine executable"
        )?;
        line!("args            = {}", self.analysis.args.join(" "), "Engine arguments")?;

        writeln!(f, "\n[Results]")?;
        line!("flux_column     = {}", self.results.flux_column, "Light-curve flux")?;
        line!(
            "quality_bitmask = {}",
            self.results.quality_bitmask,
            "Dropped QUALITY flags"
        )?;
        line!(
            "duration_scale  = {:.2}",
            self.results.duration_scale,
            "Eclipse duration multiplier"
        )?;
        line!("flatten         = {}", self.results.flatten, "Trend fit")?;
        Ok(())
    }
}

#[cfg(test)]
mod config_test {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::builder().build().unwrap();
        assert_eq!(config.input_file, "tessebs_extra.csv");
        assert_eq!(config.analysis.pool_size, 1);
        assert_eq!(config.results.flux_column, "PDCSAP_FLUX");
        assert_eq!(config.results.quality_bitmask, quality_flags::DEFAULT);
    }

    #[test]
    fn test_builder_validation() {
        assert!(PipelineConfig::builder().pool_size(0).build().is_err());
        assert!(PipelineConfig::builder().duration_scale(-1.0).build().is_err());
        assert!(PipelineConfig::builder().flux_column(" ").build().is_err());
        assert!(PipelineConfig::builder()
            .selection(SelectionParams {
                min_segments: 0,
                ..SelectionParams::default()
            })
            .build()
            .is_err());
    }

    #[test]
    fn test_toml_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "platodebs.toml",
                r#"
                    catalogue_dir = "from_toml"
                    targets = ["TIC 1", "TIC 2"]

                    [analysis]
                    pool_size = 3

                    [acquisition]
                    exptime = "fast"
                "#,
            )?;
            jail.set_env("PLATODEBS_ANALYSIS__POOL_SIZE", "6");
            jail.set_env("PLATODEBS_RESULTS__FLUX_COLUMN", "SAP_FLUX");

            let config = PipelineConfig::load(None).unwrap();
            assert_eq!(config.catalogue_dir, "from_toml");
            assert_eq!(config.targets, vec!["TIC 1", "TIC 2"]);
            assert_eq!(config.analysis.pool_size, 6);
            assert_eq!(config.acquisition.exptime, ExposureTime::Fast);
            assert_eq!(config.results.flux_column, "SAP_FLUX");
            // untouched defaults survive
            assert_eq!(config.acquisition.author, "SPOC");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("PLATODEBS_ANALYSIS__POOL_SIZE", "0");
            let err = PipelineConfig::load(None).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidConfig(_)));
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        Jail::expect_with(|_jail| {
            let err = PipelineConfig::load(Some(Utf8Path::new("nope.toml"))).unwrap_err();
            assert_eq!(
                err,
                PipelineError::InvalidConfig("configuration file nope.toml does not exist".into())
            );
            Ok(())
        });
    }

    #[test]
    fn test_overrides_win() {
        Jail::expect_with(|jail| {
            jail.create_file("platodebs.toml", "overwrite = false\n[analysis]\npool_size = 3\n")?;
            jail.set_env("PLATODEBS_ANALYSIS__POOL_SIZE", "6");

            let overrides = serde_json::json!({
                "overwrite": true,
                "analysis": { "pool_size": 2 },
            });
            let config = PipelineConfig::load_with_overrides(None, &overrides).unwrap();
            assert!(config.overwrite);
            assert_eq!(config.analysis.pool_size, 2);
            assert_eq!(config.analysis.args, AnalysisParams::default().args);
            Ok(())
        });
    }

    #[test]
    fn test_display_forms() {
        let config = PipelineConfig::default();
        let short = config.to_string();
        assert!(short.starts_with("PipelineConfig(input=tessebs_extra.csv"));
        let long = format!("{config:#}");
        assert!(long.contains("[Selection]"));
        assert!(long.contains("pool_size       = 1"));
    }
}
