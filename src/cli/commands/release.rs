//! Release command - release staging table locks

use crate::cli::args::ReleaseArgs;
use crate::cli::commands::open_repository;
use crate::config::Config;
use crate::error::{StageCacheError, StageCacheResult};
use console::{style, Term};
use tracing::debug;

/// Execute the release command
pub async fn execute(args: ReleaseArgs, config: &Config) -> StageCacheResult<()> {
    if let Some(owner) = args.owner {
        let mut repo = open_repository(config).await?;
        let released = repo.release_lock(&owner).await?;
        println!(
            "{} Released {} lock(s) held by {}",
            style("✓").green(),
            released,
            style(&owner).cyan()
        );
        return Ok(());
    }

    if !confirm_release_all(args.yes, Term::stdout().is_term()).await? {
        println!("{} Aborted, no locks released", style("!").yellow());
        return Ok(());
    }

    let mut repo = open_repository(config).await?;
    let released = repo.release_all_lock().await?;
    debug!(released, "Crash-recovery sweep finished");
    println!("{} Released {} lock(s)", style("✓").green(), released);
    Ok(())
}

/// A sweep also frees locks of loaders that are still running
async fn confirm_release_all(auto_yes: bool, interactive: bool) -> StageCacheResult<bool> {
    if auto_yes {
        return Ok(true);
    }
    if !interactive {
        return Err(StageCacheError::User(
            "Refusing to release every lock without confirmation; pass --yes".to_string(),
        ));
    }

    let result = tokio::task::spawn_blocking(|| {
        cliclack::confirm("Release every table lock, including those of running loaders?")
            .initial_value(false)
            .interact()
    })
    .await
    .map_err(|e| StageCacheError::User(format!("Prompt task failed: {}", e)))?;

    result.map_err(|e| StageCacheError::User(format!("Prompt failed: {}", e)))
}
