use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use tracing_subscriber::EnvFilter;

use soakdiff::config::{Config, load_config, load_config_from_path};
use soakdiff::logcat::RuleSet;
use soakdiff::parse::load_round;
use soakdiff::report;

#[derive(Parser)]
#[command(
    name = "soakdiff",
    about = "Differential resource-usage reports for endurance test rounds"
)]
struct Cli {
    /// Round directories in chronological order, the first being the
    /// initial state
    #[arg(required = true, num_args = 2..)]
    rounds: Vec<PathBuf>,

    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Graph every process, bypassing the significance filter
    #[arg(long)]
    show_all: bool,

    /// Write a machine-readable summary to this path
    #[arg(long)]
    json: Option<PathBuf>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config_for_cli(&cli);

    let classifier = RuleSet::from_config(&config.logcat)
        .map_err(|err| eyre!("bad log classification rule: {err}"))?;

    let rounds = cli
        .rounds
        .iter()
        .map(|dir| load_round(dir, &classifier))
        .collect::<Result<Vec<_>, _>>()?;

    let data = report::analyze(&rounds, &config);
    if let Err(err) = report::write_error_pages(&rounds, &data) {
        tracing::warn!("could not write per-round error pages: {err}");
    }

    let stdout = io::stdout().lock();
    let mut out = BufWriter::new(stdout);
    report::write_report(&mut out, &rounds, &data, &config)?;
    out.flush()?;

    if let Some(path) = &cli.json {
        report::summary::write_json(path, &rounds, &data)?;
    }
    Ok(())
}

fn load_config_for_cli(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };
    if cli.show_all {
        config.report.show_all_processes = true;
    }
    config
}
