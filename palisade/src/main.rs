mod commands;
mod config;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::*;

use crate::logging::init_logging;

#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, default_value = "/etc/palisade.yaml")]
    config: PathBuf,

    #[arg(long, short, action = clap::ArgAction::Count)]
    debug: u8,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the admission engine and its background tasks
    Run,
    /// Validate the config file
    Check,
    /// Run one-shot admission check for an envelope
    Admit {
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        method: Option<String>,
        #[arg(long)]
        country: Option<String>,
    },
    /// Classify a network address
    Classify {
        address: String,
        #[arg(long)]
        bypass_cache: bool,
    },
    /// Run the retention sweeps once and exit
    Cleanup,
}

async fn _main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli);

    match &cli.command {
        Commands::Run => crate::commands::run::command(&cli).await,
        Commands::Check => crate::commands::check::command(&cli).await,
        Commands::Admit {
            address,
            api_key,
            path,
            method,
            country,
        } => {
            crate::commands::admit::command(
                &cli,
                address.clone(),
                api_key.clone(),
                path.clone(),
                method.clone(),
                country.clone(),
            )
            .await
        }
        Commands::Classify {
            address,
            bypass_cache,
        } => crate::commands::classify::command(&cli, address, *bypass_cache).await,
        Commands::Cleanup => crate::commands::cleanup::command(&cli).await,
    }
}

#[tokio::main]
async fn main() {
    if let Err(error) = _main().await {
        error!(?error, "Fatal error");
        std::process::exit(1);
    }
}
