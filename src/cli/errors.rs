//! CLI-specific error types
//!
//! Every CLI error ends the process with a non-zero exit code.

use std::fmt;
use std::io;

use crate::memory::ScenarioError;
use crate::rollback::config::ConfigError;
use crate::rollback::errors::RollbackError;
use crate::rollback::remove_saver::RemoveSaverError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// Scenario file error
    ScenarioError,
    /// Rollback data file error
    ArchiveError,
    /// Rollback failed unrecoverably
    RollbackFailed,
    /// I/O error (stdout)
    IoError,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "ROLLBACK_CLI_CONFIG_ERROR",
            Self::ScenarioError => "ROLLBACK_CLI_SCENARIO_ERROR",
            Self::ArchiveError => "ROLLBACK_CLI_ARCHIVE_ERROR",
            Self::RollbackFailed => "ROLLBACK_CLI_ROLLBACK_FAILED",
            Self::IoError => "ROLLBACK_CLI_IO_ERROR",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Config error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    /// Scenario error
    pub fn scenario_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ScenarioError, msg)
    }

    /// Archive error
    pub fn archive_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ArchiveError, msg)
    }

    /// Rollback failed
    pub fn rollback_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::RollbackFailed, msg)
    }

    /// I/O error
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    /// Get the error code
    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::config_error(e.to_string())
    }
}

impl From<ScenarioError> for CliError {
    fn from(e: ScenarioError) -> Self {
        Self::scenario_error(e.to_string())
    }
}

impl From<RemoveSaverError> for CliError {
    fn from(e: RemoveSaverError) -> Self {
        Self::archive_error(e.to_string())
    }
}

impl From<RollbackError> for CliError {
    fn from(e: RollbackError) -> Self {
        Self::rollback_failed(e.to_string())
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
