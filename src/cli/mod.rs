//! CLI module for oplog-rollback
//!
//! Provides command-line interface for:
//! - simulate: Roll back an in-memory node described by a scenario
//! - inspect-archive: Read a rollback data file
//! - check-config: Validate a rollback configuration

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{check_config, inspect_archive, run, run_command, simulate};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
