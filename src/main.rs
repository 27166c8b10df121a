// src/main.rs

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use std::path::PathBuf;
use tracing::{info, warn};

mod app;
mod config;
mod core;
mod logging;

use app::{App, RunOptions, Settings};
use crate::core::scanner::Shutdown;

/// Discovers TLS endpoints in the configured networks and reports the
/// certificates they present.
#[derive(Parser, Debug)]
#[command(name = "certainty-agent", author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Send the report to the configured test_api_url
    #[arg(long)]
    test_mode: bool,

    /// Print every discovered certificate to stdout
    #[arg(long)]
    dump: bool,

    /// Scan without sending the report
    #[arg(long)]
    no_send: bool,

    /// Also write the report to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "certainty_agent=trace"
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            test_mode: self.test_mode,
            send: !self.no_send,
            dump: self.dump,
            output: self.output.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let log_path = logging::initialize_logging(cli.log_level.as_deref())?;

    let config_path = cli.config.clone().unwrap_or_else(app::default_config_path);
    info!(config = %config_path.display(), log = %log_path.display(), "Starting agent.");

    // Configuration problems are the only thing that stops a run.
    let config = config::load_config(&config_path)?;
    let settings = Settings::resolve(config, &cli.run_options()).wrap_err("invalid configuration")?;

    let (stop, shutdown) = Shutdown::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight probes.");
            let _ = stop.send(true);
        }
    });

    let report = App::new(settings).run(shutdown).await?;
    info!(endpoints = report.endpoints.len(), "Agent finished.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_send_disables_delivery() {
        let cli = Cli::parse_from(["certainty-agent", "--no-send", "--dump", "-c", "lab.yaml"]);
        let options = cli.run_options();

        assert!(!options.send);
        assert!(options.dump);
        assert!(!options.test_mode);
        assert_eq!(cli.config, Some(PathBuf::from("lab.yaml")));
    }
}
