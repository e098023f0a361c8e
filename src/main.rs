//! Orepool job manager daemon — entry point.
//!
//! Loads the job manager configuration, validates it, wires up the
//! `Supervisor`, and runs until interrupted.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::{error, info};

use orepool_jobmanager::{JobManagerConfig, Supervisor};

/// Command line arguments for the job manager daemon.
#[derive(Parser)]
#[clap(name = "orepool-jobmanager")]
#[clap(about = "Upstream RPC fleet management and merged-mining job assembly")]
struct Cli {
    /// Path to the job manager's TOML/JSON config file.
    #[clap(short, long, value_name = "FILE", default_value = "jobmanager.toml")]
    config: PathBuf,

    /// Verbosity level (0-5).
    #[clap(short, long, default_value = "3")]
    verbosity: u8,
}

fn load_config(path: &PathBuf) -> Result<JobManagerConfig, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::from(path.as_path()))
        .add_source(config::Environment::with_prefix("OREPOOL").separator("__"))
        .build()?
        .try_deserialize()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    orepool_util::init_logging(cli.verbosity);

    info!("starting orepool job manager");

    let raw_config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load config from {}: {e}", cli.config.display());
            process::exit(1);
        }
    };

    let validated = match raw_config.validate() {
        Ok(validated) => validated,
        Err(e) => {
            error!("invalid configuration: {e}");
            process::exit(1);
        }
    };

    let supervisor = Supervisor::start(validated).await;

    for signum in [1, 10, 12] {
        // SIGHUP, SIGUSR1, SIGUSR2 — conventionally used by merged chains
        // to request an immediate work refresh instead of waiting out
        // their poll interval.
        supervisor.spawn_signal_dispatch(signum);
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!("failed to listen for shutdown signal: {e}"),
    }

    supervisor.shutdown().await;
    info!("orepool job manager stopped");
}
