//! `attest` — diagnostics CLI for the verification engine.
//!
//! `attest replay` drives the full engine (frame pump, pipeline, state
//! machine) from a recorded scenario file with stubbed model and location
//! collaborators, printing the state trace and fired effects. `attest
//! geofence` is a one-shot containment check.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use attest_core::{DeviceFix, GeofenceValidator, Location};
use attest_engine::Config;

mod replay;

#[derive(Parser)]
#[command(name = "attest", about = "Identity + location verification diagnostics")]
struct Cli {
    /// Optional TOML config file; falls back to ATTEST_* environment
    /// variables and built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a recorded scenario file through the engine.
    Replay {
        /// Path to the scenario JSON file.
        scenario: PathBuf,
    },
    /// Evaluate a single geofence containment check.
    Geofence {
        #[arg(long)]
        expected_lat: f64,
        #[arg(long)]
        expected_lon: f64,
        #[arg(long)]
        actual_lat: f64,
        #[arg(long)]
        actual_lon: f64,
        #[arg(long, default_value_t = 100.0)]
        radius_m: f64,
        /// Treat the actual location as coming from a mock provider.
        #[arg(long)]
        mocked: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env(),
    };

    match cli.command {
        Command::Replay { scenario } => replay::run(&scenario, config).await,
        Command::Geofence {
            expected_lat,
            expected_lon,
            actual_lat,
            actual_lon,
            radius_m,
            mocked,
        } => {
            let validator = GeofenceValidator::new(radius_m);
            let expected = Location {
                lat: expected_lat,
                lon: expected_lon,
            };
            let fix = DeviceFix {
                location: Location {
                    lat: actual_lat,
                    lon: actual_lon,
                },
                mocked,
            };
            let outcome = validator.evaluate(expected, Some(&fix));
            println!("{outcome:?}");
            Ok(())
        }
    }
}
