//! # Constants and type definitions for platodebs
//!
//! This module centralizes the **fixed thresholds**, **file naming conventions**, and
//! **common type aliases** used throughout the pipeline.
//!
//! ## Overview
//!
//! - Segment triage thresholds (noise-dominated cutoff, penalty divisor, selection floor)
//! - Light-curve flattening defaults
//! - TESS time reference (BTJD offset) and quality flag bits
//! - Names of the files written into the per-target catalogue layout
//!
//! Every value here is a *default*; the tunable ones are copied into
//! [`PipelineConfig`](crate::config::PipelineConfig) and can be overridden there.

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Time or duration in days
pub type Days = f64;

/// Time expressed as a Barycentric TESS Julian Date (BJD - 2457000)
pub type Btjd = f64;

// -------------------------------------------------------------------------------------------------
// Segment ranking & selection
// -------------------------------------------------------------------------------------------------

/// Noise-fraction (`PDC_NOI`) above which a segment is considered noise-dominated
pub const NOISE_DOMINATED_THRESHOLD: f64 = 0.99;

/// Divisor applied to the total-quality score of a noise-dominated segment
pub const NOISE_PENALTY_DIVISOR: f64 = 100.0;

/// Minimum number of segments handed to the analysis engine
pub const MIN_SELECTED_SEGMENTS: usize = 5;

/// Orbital period covered by each additional selected segment
pub const DAYS_PER_SELECTED_SEGMENT: Days = 4.0;

/// Period assumed when the catalogue gives none
pub const FALLBACK_PERIOD: Days = 1.0;

// -------------------------------------------------------------------------------------------------
// Flattening
// -------------------------------------------------------------------------------------------------

/// Number of samples in the local polynomial window
pub const FLATTEN_WINDOW_LENGTH: usize = 101;

/// Degree of the local polynomial
pub const FLATTEN_POLYORDER: usize = 2;

/// Gap (in median cadences) above which the light curve is split before fitting
pub const FLATTEN_BREAK_TOLERANCE: f64 = 5.0;

/// Sigma-clipping threshold used while fitting the trend
pub const FLATTEN_SIGMA: f64 = 3.0;

/// Number of sigma-clipping iterations
pub const FLATTEN_NITERS: usize = 3;

// -------------------------------------------------------------------------------------------------
// TESS conventions
// -------------------------------------------------------------------------------------------------

/// Offset between BTJD and BJD
pub const BTJD_OFFSET: f64 = 2_457_000.0;

/// Exposure time (seconds) below which a product is a "fast" cadence one
pub const FAST_CADENCE_MAX_S: f64 = 60.0;

/// Exposure time (seconds) up to which a product is a "short" cadence one
pub const SHORT_CADENCE_MAX_S: f64 = 120.0;

/// Quality flag bits set by the SPOC pipeline
pub mod quality_flags {
    pub const ATTITUDE_TWEAK: u32 = 1;
    pub const SAFE_MODE: u32 = 2;
    pub const COARSE_POINT: u32 = 4;
    pub const EARTH_POINT: u32 = 8;
    pub const ARGABRIGHTENING: u32 = 16;
    pub const DESAT: u32 = 32;
    pub const APERTURE_COSMIC: u32 = 64;
    pub const MANUAL_EXCLUDE: u32 = 128;
    pub const DISCONTINUITY: u32 = 256;
    pub const IMPULSIVE_OUTLIER: u32 = 512;
    pub const COLLATERAL_COSMIC: u32 = 1024;
    pub const STRAYLIGHT: u32 = 2048;
    pub const STRAYLIGHT2: u32 = 4096;
    pub const PLANET_SEARCH_EXCLUDE: u32 = 8192;
    pub const BAD_CALIBRATION_EXCLUDE: u32 = 16384;
    pub const INSUFFICIENT_TARGETS: u32 = 32768;

    pub const DEFAULT: u32 = ATTITUDE_TWEAK
        | SAFE_MODE
        | COARSE_POINT
        | EARTH_POINT
        | ARGABRIGHTENING
        | DESAT
        | MANUAL_EXCLUDE
        | IMPULSIVE_OUTLIER
        | BAD_CALIBRATION_EXCLUDE;

    pub const HARD: u32 = DEFAULT | APERTURE_COSMIC | COLLATERAL_COSMIC | STRAYLIGHT;

    pub const HARDEST: u32 = 0xFFFF;
}

// -------------------------------------------------------------------------------------------------
// Catalogue layout
// -------------------------------------------------------------------------------------------------

/// Default roster file
pub const DEFAULT_INPUT_FILE: &str = "tessebs_extra.csv";

/// Default root of the per-target output tree
pub const DEFAULT_CATALOGUE_DIR: &str = "catalogue";

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "platodebs.toml";

/// Prefix of the configuration environment variables
pub const ENV_PREFIX: &str = "PLATODEBS_";

/// Manifest of downloaded segments, one per target download directory
pub const SEGMENTS_MANIFEST: &str = "segments.json";

/// Per-target variability results
pub const VARIABILITY_FILE: &str = "variability.json";

/// Catalogue-level summary of the variability results
pub const VARIABILITY_SUMMARY_FILE: &str = "variability_summary.csv";

/// Extension of the milestone markers (`<stage>.milestone.json`)
pub const MILESTONE_SUFFIX: &str = "milestone.json";
