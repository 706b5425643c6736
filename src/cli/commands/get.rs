//! Get command - show one cache entry

use crate::cli::args::{GetArgs, OutputFormat};
use crate::cli::commands::open_repository;
use crate::config::Config;
use crate::error::StageCacheResult;
use crate::model::CacheEntry;
use chrono::{DateTime, Utc};
use console::style;

/// Execute the get command
pub async fn execute(args: GetArgs, config: &Config) -> StageCacheResult<()> {
    let mut repo = open_repository(config).await?;
    let entry = repo.get_cache_info(&args.id).await?;

    let output = render(&args.id, entry.as_ref(), args.format)?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

/// Text to print for a lookup; a missing entry is not an error
fn render(id: &str, entry: Option<&CacheEntry>, format: OutputFormat) -> StageCacheResult<String> {
    let Some(entry) = entry else {
        return Ok(match format {
            OutputFormat::Json => "null".to_string(),
            OutputFormat::Plain => String::new(),
            OutputFormat::Table => {
                format!("{} No cache entry {}", style("!").yellow(), style(id).cyan())
            }
        });
    };

    Ok(match format {
        OutputFormat::Table => table(entry),
        OutputFormat::Json => serde_json::to_string_pretty(entry)?,
        OutputFormat::Plain => plain_line(entry),
    })
}

fn table(entry: &CacheEntry) -> String {
    let rows = [
        ("ID", entry.id.clone()),
        ("TABLE", entry.table_name.clone()),
        ("PATH", entry.path.clone()),
        ("LOCAL", format_timestamp(entry.local_timestamp)),
        ("REMOTE", format_timestamp(entry.remote_timestamp)),
    ];
    rows.iter()
        .map(|(label, value)| format!("{:<8} {}", style(label).bold(), value))
        .collect::<Vec<_>>()
        .join("\n")
}

fn plain_line(entry: &CacheEntry) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}",
        entry.id,
        entry.table_name,
        entry.path,
        format_timestamp(entry.local_timestamp),
        format_timestamp(entry.remote_timestamp)
    )
}

fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
}
