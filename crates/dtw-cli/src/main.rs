//! CLI frontend for the dtw logistics simulator.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "dtw",
    about = "dtw - discrete-event simulation of dredging and transport logistics",
    version,
    propagate_version = true
)]
struct Cli {
    /// More output: -v shows the event log and info logs, -vv debug, -vvv trace
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file and print the final state
    Run {
        /// Path to the scenario JSON file
        scenario: PathBuf,

        /// Stop at this many simulated seconds instead of running to the end
        #[arg(short, long)]
        until: Option<f64>,

        /// Print the event log as JSON instead of tables
        #[arg(long)]
        json: bool,
    },

    /// Validate a scenario file without running it
    Check {
        /// Path to the scenario JSON file
        scenario: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            scenario,
            until,
            json,
        } => commands::run::run(&scenario, until, json, cli.verbose > 0),
        Commands::Check { scenario } => commands::check::run(&scenario),
    }
}
