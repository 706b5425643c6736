//! Init command - create the registry tables

use crate::cli::commands::open_repository;
use crate::config::Config;
use crate::error::StageCacheResult;
use console::style;

/// Execute the init command
pub async fn execute(config: &Config) -> StageCacheResult<()> {
    let mut repo = open_repository(config).await?;
    repo.ensure_schema().await?;

    println!(
        "{} Registry tables ready ({}, {})",
        style("✓").green(),
        style(&config.schema.entry_table).cyan(),
        style(&config.schema.lock_table).cyan()
    );
    Ok(())
}
