//! Query coordinator binary

use clap::{Parser, Subcommand};
use querycoord::{Coordinator, CoordinatorConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "querycoord")]
#[command(about = "Query coordinator: load jobs, resource groups and shard leader routing")]
#[command(version = querycoord::BUILD_INFO)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordinator server
    Serve {
        /// Node ID (overrides the config file)
        #[arg(long)]
        id: Option<i64>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<String>,

        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Base URL of the catalog service
        #[arg(long)]
        broker: Option<String>,

        /// Parallel job workers
        #[arg(long)]
        job_workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            id,
            bind,
            config,
            broker,
            job_workers,
        } => {
            // file and environment first, CLI flags have priority
            let mut coord_config = CoordinatorConfig::load(config.as_deref())?;
            if let Some(id) = id {
                coord_config.node_id = id;
            }
            if let Some(bind) = bind {
                coord_config.bind_addr = bind.parse()?;
            }
            if let Some(broker) = broker {
                coord_config.broker_addr = broker;
            }
            if let Some(workers) = job_workers {
                coord_config.job_workers = workers;
            }
            coord_config.validate()?;

            let level = coord_config.log_level.clone();
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| level.into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            Coordinator::new(coord_config).serve().await?;
        }
    }

    Ok(())
}
