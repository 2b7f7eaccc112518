//! Stateless indexer agent binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use hermes::{agent, config};

#[derive(Parser)]
#[command(
    name = "hermes-agent",
    about = "Hermes indexer agent — scans a source workspace and submits documents",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/hermes.toml")]
    config: PathBuf,

    /// Log filter (e.g. info, hermes=debug)
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Exchange the bootstrap token for a long-lived API token
    Register,

    /// Run the heartbeat and scan/submit loops until terminated
    Run,

    /// Enumerate and hash candidates without submitting
    Scan {
        /// Report counts only; never submit
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&cli.log)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Register => agent::run_register(&cfg).await?,
        Commands::Run => agent::run_agent(&cfg).await?,
        Commands::Scan { dry_run } => {
            if !dry_run {
                anyhow::bail!("scan requires --dry-run; use `run` for a live scan loop");
            }
            agent::run_dry_scan(&cfg).await?;
        }
    }

    Ok(())
}
