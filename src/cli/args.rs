//! CLI argument definitions using clap
//!
//! Commands:
//! - oplog-rollback simulate --scenario <path> [--config <path>]
//! - oplog-rollback inspect-archive --file <path>
//! - oplog-rollback check-config --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Oplog rollback for diverged replica set members
#[derive(Parser, Debug)]
#[command(name = "oplog-rollback")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Roll back an in-memory node described by a scenario file
    Simulate {
        /// Path to scenario file
        #[arg(long)]
        scenario: PathBuf,

        /// Path to rollback configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the documents saved in a rollback data file
    InspectArchive {
        /// Path to rollback data file
        #[arg(long)]
        file: PathBuf,
    },

    /// Validate a rollback configuration file
    CheckConfig {
        /// Path to rollback configuration file
        #[arg(long, default_value = "./rollback.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
