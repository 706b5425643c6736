//! Delete command - remove one cache entry

use crate::cli::args::DeleteArgs;
use crate::cli::commands::open_repository;
use crate::config::Config;
use crate::error::StageCacheResult;
use console::style;

/// Execute the delete command
pub async fn execute(args: DeleteArgs, config: &Config) -> StageCacheResult<()> {
    let mut repo = open_repository(config).await?;

    if repo.delete_cache_info(&args.id).await? {
        println!(
            "{} Deleted cache entry {}",
            style("✓").green(),
            style(&args.id).cyan()
        );
    } else {
        println!(
            "{} No cache entry {}",
            style("!").yellow(),
            style(&args.id).cyan()
        );
    }
    Ok(())
}
