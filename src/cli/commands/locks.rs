//! Locks command - list staging table locks

use crate::cli::args::{LocksArgs, OutputFormat};
use crate::cli::commands::open_repository;
use crate::config::Config;
use crate::error::StageCacheResult;
use crate::model::LockRecord;
use console::style;

/// Execute the locks command
pub async fn execute(args: LocksArgs, config: &Config) -> StageCacheResult<()> {
    let mut repo = open_repository(config).await?;
    let records = repo.list_locks(args.owner.as_deref()).await?;

    if records.is_empty() {
        match args.format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => println!("{} No table locks held", style("i").blue()),
        }
        return Ok(());
    }

    match args.format {
        OutputFormat::Table => print_table(&records),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        OutputFormat::Plain => {
            for record in &records {
                println!("{}\t{}\t{}", record.table_name, record.owner_id, record.holder);
            }
        }
    }
    Ok(())
}

fn print_table(records: &[LockRecord]) {
    println!(
        "{:<32} {:<24} {:<24}",
        style("TABLE").bold(),
        style("OWNER").bold(),
        style("HOLDER").bold()
    );
    println!("{}", "-".repeat(80));

    for record in records {
        let holder = if record.holder.is_empty() {
            "-"
        } else {
            record.holder.as_str()
        };
        println!(
            "{:<32} {:<24} {:<24}",
            record.table_name, record.owner_id, holder
        );
    }

    println!();
    println!("{} lock(s)", records.len());
}
