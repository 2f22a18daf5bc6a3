use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;

#[derive(Parser)]
#[command(name = "btmux")]
#[command(about = "btmux - multi-device wireless session manager", long_about = None)]
struct Cli {
    /// Path to a btmux.toml config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run optimization cycles over a simulated device fleet
    Simulate {
        /// Number of optimization cycles to run
        #[arg(long, default_value_t = 5)]
        cycles: u32,
        /// Milliseconds of simulated traffic between cycles
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            cycles,
            interval_ms,
        } => commands::simulate::run(cycles, interval_ms, cli.config).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show(cli.config)?,
        },
    }

    Ok(())
}
