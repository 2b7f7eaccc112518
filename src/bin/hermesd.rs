//! Central server binary: schema init, the admission + admin API, and a
//! store status view.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use hermes::{config, db, migrate, server, store::CatalogStore};

#[derive(Parser)]
#[command(
    name = "hermesd",
    about = "Hermes central server — document catalog, admission API, and search",
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
    /// Initialize or upgrade the catalog schema
    Init,

    /// Start the admission and admin API server
    Serve,

    /// Print instance identity, schema version, and backlog counters
    Status,
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
        Commands::Init => {
            let pool = db::connect(&cfg.store.path).await?;
            migrate::run_migrations(&pool).await?;
            println!(
                "Catalog initialized at {} (schema version {}).",
                cfg.store.path.display(),
                migrate::SCHEMA_VERSION
            );
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Status => {
            let pool = db::connect(&cfg.store.path).await?;
            migrate::check_schema_version(&pool).await?;
            let store = CatalogStore::new(pool.clone());

            match store.get_instance().await? {
                Some(instance) => {
                    println!("instance: {} ({})", instance.instance_name, instance.instance_uuid);
                    println!("base_url: {}", instance.base_url);
                    println!("environment: {}", instance.environment);
                }
                None => println!("instance: (not yet created; starts with `hermesd serve`)"),
            }

            let version = migrate::schema_version(&pool).await?.unwrap_or(0);
            println!("schema_version: {}", version);
            println!("documents: {}", store.document_count().await?);
            println!("revisions: {}", store.revision_count().await?);

            let backlog = store.backlog().await?;
            println!("enrichment_pending: {}", backlog.enrichment_pending);
            println!("outbox_pending: {}", backlog.outbox_pending);
            println!("conflicts_pending: {}", backlog.conflicts_pending);
        }
    }

    Ok(())
}
