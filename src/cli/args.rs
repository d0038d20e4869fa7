//! Command line argument parsing for the barrels CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// barrels - inspect and maintain on-disk inverted-index barrels
#[derive(Parser, Debug, Clone)]
#[command(name = "barrels")]
#[command(about = "Inspect and maintain on-disk inverted-index barrels")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct BarrelsArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Index configuration file (JSON)
    #[arg(short, long, env = "BARRELS_CONFIG", value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl BarrelsArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1, // Default to normal
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show the barrel directory of an index
    Info(InfoArgs),

    /// List the vocabulary of one field of a barrel
    Terms(TermsArgs),

    /// Merge flushed barrels
    Merge(MergeArgs),
}

/// Arguments for showing the barrel directory
#[derive(Parser, Debug, Clone)]
pub struct InfoArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Include the field table of every barrel
    #[arg(short, long)]
    pub fields: bool,
}

/// Arguments for listing terms
#[derive(Parser, Debug, Clone)]
pub struct TermsArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Barrel name
    #[arg(value_name = "BARREL")]
    pub barrel: String,

    /// Field name
    #[arg(value_name = "FIELD")]
    pub field: String,

    /// Maximum number of terms to list
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Only list terms starting with this prefix
    #[arg(long)]
    pub prefix: Option<String>,
}

/// Arguments for merging
#[derive(Parser, Debug, Clone)]
pub struct MergeArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Barrels to merge (default: every flushed barrel)
    #[arg(value_name = "BARREL")]
    pub barrels: Vec<String>,
}

/// Output formats for CLI
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}
