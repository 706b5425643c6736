//! stagecache - cache freshness registry and staging-table locks
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use stagecache::cli::{Cli, Commands};
use stagecache::config::{Config, ConfigManager};
use stagecache::error::StageCacheResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> StageCacheResult<()> {
    let cli = Cli::parse();

    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };

    // Config command manages the file itself and must work when it is broken
    if let Commands::Config(args) = cli.command {
        init_logging(cli.verbose, &Config::default());
        return stagecache::cli::commands::config(args, &config_manager).await;
    }

    let config = config_manager.load().await?;
    init_logging(cli.verbose, &config);
    debug!("Loaded configuration from {}", config_manager.path().display());

    match cli.command {
        Commands::Config(_) => unreachable!("Config handled above"),
        Commands::Init => stagecache::cli::commands::init(&config).await,
        Commands::Get(args) => stagecache::cli::commands::get(args, &config).await,
        Commands::Delete(args) => stagecache::cli::commands::delete(args, &config).await,
        Commands::Locks(args) => stagecache::cli::commands::locks(args, &config).await,
        Commands::Release(args) => stagecache::cli::commands::release(args, &config).await,
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `general.verbose` counts as one level
fn init_logging(verbose: u8, config: &Config) {
    let level = verbose.max(u8::from(config.general.verbose));
    let filter = match level {
        0 => EnvFilter::new("stagecache=warn"),
        1 => EnvFilter::new("stagecache=info"),
        _ => EnvFilter::new("stagecache=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
