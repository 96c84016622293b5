use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::debug;

use platodebs::acquisition::search::ListingSearchClient;
use platodebs::acquisition::AcquisitionStage;
use platodebs::analysis::engine::CommandEngine;
use platodebs::analysis::AnalysisStage;
use platodebs::catalogue::load_targets;
use platodebs::config::PipelineConfig;
use platodebs::pipeline_errors::PipelineError;
use platodebs::results::ResultsStage;

mod cli;

use cli::{Cli, Command};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("platodebs error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    let config =
        PipelineConfig::load_with_overrides(cli.config.as_deref(), &cli.command.overrides())
            .context("invalid configuration")?;
    debug!("\n{config:#}");

    let targets = load_targets(&config)
        .with_context(|| format!("cannot load the target roster {}", config.input_file))?;

    let report = match &cli.command {
        Command::Download(_) => {
            let listing = config.acquisition.listing.as_deref().ok_or_else(|| {
                PipelineError::InvalidConfig(
                    "acquisition.listing must point to a search listing (--listing)".into(),
                )
            })?;
            let search = ListingSearchClient::from_path(listing)
                .with_context(|| format!("cannot read the search listing {listing}"))?;
            AcquisitionStage::new(&config, &search)?.run(&targets)
        }
        Command::Analyse(_) => {
            let engine = CommandEngine::from_params(&config.analysis)?;
            AnalysisStage::new(&config, &engine).run(&targets)?
        }
        Command::Results(_) => ResultsStage::new(&config).run(&targets)?,
    };

    println!("{report:#}");
    Ok(())
}

/// Install the `tracing` subscriber; `PLATODEBS_LOG` wins over the `-v` / `-q` flags.
fn init_tracing(quiet: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("PLATODEBS_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;
    Ok(())
}
