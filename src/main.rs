//! Microservice Simulator - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use microservice_sim::telemetry::{init_logging, init_tracing, parse_level};
use microservice_sim::{server, Dispatcher, SimulatorConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(
    name = "microservice-sim",
    about = "Microservice simulator for building demo application topologies",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "sim.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short = 'L', long)]
    log_level: Option<Level>,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Print default config if requested
    if args.print_config {
        let default_config = include_str!("../config/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    // Load configuration
    let config_found = args.config.exists();
    let config = if config_found {
        SimulatorConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        SimulatorConfig::default()
    };

    // Validate and exit if requested
    if args.validate {
        println!(
            "Configuration is valid ({} endpoints defined)",
            config.endpoints.len()
        );
        return Ok(());
    }

    // Initialize logging
    let level = args
        .log_level
        .unwrap_or_else(|| parse_level(&config.log_level));
    init_logging(level)?;

    if config_found {
        info!(path = ?args.config, "Loaded configuration");
    } else {
        info!(path = ?args.config, "Configuration file not found, using defaults (no endpoints)");
    }

    let (_telemetry, propagator) = init_tracing(&config.telemetry, &config.service_name)?;
    let dispatcher = Arc::new(Dispatcher::with_propagator(&config, propagator)?);

    server::run(&config.address, config.port, dispatcher).await
}
