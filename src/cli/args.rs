//! CLI argument definitions using clap derive

use clap::{ArgAction, ArgGroup, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// stagecache - cache freshness registry and staging-table locks
///
/// Operator tooling for the registry shared by bulk loaders: inspect and
/// delete cache entries, list table locks, and release locks left behind
/// by crashed loaders.
#[derive(Parser, Debug)]
#[command(name = "stagecache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STAGECACHE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the registry tables if they do not exist
    Init,

    /// Show a cache entry
    Get(GetArgs),

    /// Delete a cache entry
    Delete(DeleteArgs),

    /// List staging table locks
    Locks(LocksArgs),

    /// Release staging table locks
    Release(ReleaseArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the get command
#[derive(Parser, Debug)]
pub struct GetArgs {
    /// Cache entry id
    pub id: String,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the delete command
#[derive(Parser, Debug)]
pub struct DeleteArgs {
    /// Cache entry id
    pub id: String,
}

/// Arguments for the locks command
#[derive(Parser, Debug)]
pub struct LocksArgs {
    /// Only show locks held by this owner
    #[arg(short, long)]
    pub owner: Option<String>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the release command
#[derive(Parser, Debug)]
#[command(group(ArgGroup::new("target").required(true).args(["owner", "all"])))]
pub struct ReleaseArgs {
    /// Release every lock held by this owner
    #[arg(short, long)]
    pub owner: Option<String>,

    /// Release every lock (crash recovery)
    #[arg(long, conflicts_with = "owner")]
    pub all: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for get and locks
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Tab-separated text (one record per line)
    Plain,
}
