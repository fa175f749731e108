//! OpenRaaS simulator CLI.
//!
//! Commands:
//! - `oraas run` - Run one simulation and write its telemetry record
//! - `oraas sweep` - Run a parameter grid concurrently

use anyhow::Result;
use clap::{Parser, Subcommand};
use oraas_sim::PolicyKind;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "oraas")]
#[command(about = "Discrete-event simulator for OpenRaaS microservice composition")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one simulation
    Run {
        /// Path to a YAML configuration file
        #[arg(short, long)]
        config: Option<String>,

        /// Inline overrides, e.g. `--set N=500 --set cloud_model=4`
        #[arg(long = "set", value_name = "KEY=VALUE")]
        sets: Vec<String>,

        /// Scheduling policy (greedy or random)
        #[arg(short, long, default_value = "greedy")]
        policy: PolicyKind,

        /// Directory receiving the experiment folder
        #[arg(short, long, default_value = "results")]
        results: String,
    },

    /// Run a parameter grid concurrently
    Sweep {
        /// Path to a YAML configuration file
        #[arg(short, long)]
        config: Option<String>,

        /// Inline overrides applied to the base configuration
        #[arg(long = "set", value_name = "KEY=VALUE")]
        sets: Vec<String>,

        /// Client counts to sweep, comma separated (e.g. `500,1000,2000`)
        #[arg(long, value_delimiter = ',')]
        clients: Vec<usize>,

        /// Cloud models to sweep, comma separated codes 0..=5
        #[arg(long, value_delimiter = ',')]
        models: Vec<i64>,

        /// Worker rates to sweep, comma separated
        #[arg(long, value_delimiter = ',')]
        worker_rates: Vec<f64>,

        /// Scheduling policy (greedy or random)
        #[arg(short, long, default_value = "greedy")]
        policy: PolicyKind,

        /// Directory receiving the experiment folder
        #[arg(short, long, default_value = "results")]
        results: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            config,
            sets,
            policy,
            results,
        } => commands::run::run(config.as_deref(), &sets, policy, &results),
        Commands::Sweep {
            config,
            sets,
            clients,
            models,
            worker_rates,
            policy,
            results,
        } => commands::sweep::run(
            config.as_deref(),
            &sets,
            &clients,
            &models,
            &worker_rates,
            policy,
            &results,
        ),
    }
}
