//! Command-line argument parsing for databrew
//!
//! This module defines the CLI structure using clap derive macros: record
//! listing, path resolution, fetching and catalog initialisation.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::app::DateSelector;
use crate::errors::SelectorResult;

/// databrew - mirror date-stamped scientific datasets
#[derive(Parser, Debug)]
#[command(
    name = "databrew",
    version,
    about = "Mirror date-stamped scientific datasets into a local store",
    long_about = "Resolves date-templated remote URLs into local paths and fetches the files that are missing.
Supports FTP, SFTP, HTTP(S) and the Copernicus Climate Data Store."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Catalog file path
    #[arg(long, global = true, value_name = "FILE")]
    pub catalog: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the records of the catalog
    List(ListArgs),

    /// Print the remote and local paths of a record for some dates
    Paths(PathsArgs),

    /// Make sure the files of a record are in the local store
    Fetch(FetchArgs),

    /// Write a default catalog
    Init(InitArgs),
}

/// Arguments for the list command
#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Show templates and variables of every record
    #[arg(short, long)]
    pub long: bool,
}

/// Arguments for the paths command
#[derive(Args, Debug, Clone)]
pub struct PathsArgs {
    /// Record name
    pub record: String,

    /// Dates: YYYY-MM-DD, START:STOP[:STEP], D1,D2,... or `today`
    #[arg(value_parser = parse_selector)]
    pub dates: DateSelector,

    /// Also print the data path of this pipeline
    #[arg(short, long)]
    pub pipeline: Option<String>,
}

/// Arguments for the fetch command
#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Record name
    pub record: String,

    /// Dates: YYYY-MM-DD, START:STOP[:STEP], D1,D2,... or `today`
    #[arg(value_parser = parse_selector)]
    pub dates: DateSelector,

    /// Fetch missing files without asking
    #[arg(short, long)]
    pub yes: bool,

    /// Number of parallel connections
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Fetch every file, not only the missing ones, and print the report
    #[arg(long)]
    pub all: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the init command
#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    /// Where to write the catalog; defaults to the user config directory
    #[arg(value_name = "FILE")]
    pub path: Option<PathBuf>,
}

fn parse_selector(text: &str) -> SelectorResult<DateSelector> {
    DateSelector::parse(text)
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the logging level based on global arguments
    pub fn log_level(&self) -> tracing::Level {
        if self.global.quiet {
            tracing::Level::ERROR
        } else if self.global.very_verbose {
            tracing::Level::DEBUG
        } else if self.global.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }
}

impl FetchArgs {
    /// Reject argument combinations clap cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.jobs == Some(0) {
            return Err("Number of jobs must be greater than 0".to_string());
        }
        Ok(())
    }
}
