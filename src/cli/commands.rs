//! CLI command implementations
//!
//! Every command writes exactly one JSON response line to stdout.

use std::path::Path;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};

use crate::memory::Scenario;
use crate::observability::{log_event_with_fields, Event};
use crate::rollback::config::RollbackConfig;
use crate::rollback::orchestrator::RollbackOutcome;
use crate::rollback::remove_saver;

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};

/// Run the CLI with parsed arguments
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run a specific command
pub fn run_command(cmd: Command) -> CliResult<()> {
    let result = match cmd {
        Command::Simulate { scenario, config } => simulate(&scenario, config.as_deref()),
        Command::InspectArchive { file } => inspect_archive(&file),
        Command::CheckConfig { config } => check_config(&config),
    };

    match result {
        Ok(data) => write_response(data),
        Err(e) => {
            write_error(e.code_str(), e.message())?;
            Err(e)
        }
    }
}

fn load_config(path: Option<&Path>) -> CliResult<RollbackConfig> {
    let config = match path {
        Some(path) => RollbackConfig::load(path)?,
        None => RollbackConfig::default(),
    };
    let source = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "default".to_string());
    log_event_with_fields(Event::ConfigLoaded, &[("source", &source)]);
    Ok(config)
}

fn outcome_str(outcome: RollbackOutcome) -> &'static str {
    match outcome {
        RollbackOutcome::Completed => "completed",
        RollbackOutcome::RetryLater => "retry_later",
        RollbackOutcome::TransitionRefused => "transition_refused",
    }
}

/// simulate command
///
/// Builds both nodes of the scenario in memory, rolls the local node back
/// against the remote one and reports the local node afterwards.
pub fn simulate(scenario_path: &Path, config_path: Option<&Path>) -> CliResult<Value> {
    let config = load_config(config_path)?;
    let scenario = Scenario::load(scenario_path)?;
    let nodes = scenario.build()?;

    let sleep = |secs: u64| thread::sleep(Duration::from_secs(secs));
    let outcome = nodes.run(config, &sleep)?;

    Ok(json!({
        "outcome": outcome_str(outcome),
        "node": nodes.report(),
    }))
}

/// inspect-archive command
pub fn inspect_archive(file: &Path) -> CliResult<Value> {
    let documents = remove_saver::read_all(file)?;
    Ok(json!({
        "file": file.display().to_string(),
        "count": documents.len(),
        "documents": documents,
    }))
}

/// check-config command
pub fn check_config(path: &Path) -> CliResult<Value> {
    let config = RollbackConfig::load(path)?;
    serde_json::to_value(&config).map_err(CliError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_check_config_rejects_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rollback.json");
        fs::write(&path, "{not json").unwrap();
        let err = check_config(&path).unwrap_err();
        assert_eq!(err.code_str(), "ROLLBACK_CLI_CONFIG_ERROR");
    }

    #[test]
    fn test_check_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rollback.json");
        fs::write(&path, r#"{"retry_backoff_secs": 1}"#).unwrap();
        let config = check_config(&path).unwrap();
        assert_eq!(config["retry_backoff_secs"], json!(1));
        assert_eq!(config["enable_majority_read_concern"], json!(true));
    }

    #[test]
    fn test_simulate_missing_scenario() {
        let err = simulate(Path::new("/nonexistent/scenario.json"), None).unwrap_err();
        assert_eq!(err.code_str(), "ROLLBACK_CLI_SCENARIO_ERROR");
    }

    #[test]
    fn test_inspect_missing_archive() {
        let err = inspect_archive(Path::new("/nonexistent/test.c.1.bson")).unwrap_err();
        assert_eq!(err.code_str(), "ROLLBACK_CLI_ARCHIVE_ERROR");
    }
}
