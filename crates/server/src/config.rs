//! Server configuration.
//!
//! Settings come from command-line flags with environment variable
//! fallbacks (`RETRY_HARNESS__*`). The scenario table is either the built-in
//! one or a TOML file given with `--scenarios`.

use std::{
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
};

use clap::{Args, Parser, Subcommand, ValueEnum};
use otlp_retry_harness::{ScenarioFile, ScenarioTable};
use snafu::ResultExt;

use crate::{
    error::{
        ParseScenarioFileSnafu, ReadScenarioFileSnafu, RenderExampleSnafu, RenderSchemaSnafu,
        Result, ScenariosSnafu,
    },
    registry::PortLayout,
};

/// Default first port; each scenario listens on `base_port + code`.
pub const DEFAULT_BASE_PORT: u16 = 30000;

/// Command-line interface.
#[derive(Debug, Parser)]
#[command(name = "otlp-retry-harness", version)]
#[command(about = "Fails OTLP trace exports with every gRPC status code and checks how clients retry")]
pub struct Cli {
    /// Optional subcommand; the server runs when omitted.
    #[command(subcommand)]
    pub command: Option<CliCommand>,

    /// Server settings.
    #[command(flatten)]
    pub config: Config,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Scenario configuration helpers.
    Config {
        /// What to print.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// `config` subcommand actions.
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ConfigAction {
    /// Print the built-in scenario table as a TOML scenario file.
    Example,
    /// Print the JSON schema of the scenario file.
    Schema,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text.
    Text,
    /// JSON lines.
    Json,
    /// JSON when stderr is not a terminal, text otherwise.
    Auto,
}

/// Server settings.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Address every scenario endpoint listens on.
    #[arg(long, env = "RETRY_HARNESS__LISTEN_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub listen_host: IpAddr,

    /// Port offset; the endpoint for status code N listens on base_port + N.
    #[arg(long, env = "RETRY_HARNESS__BASE_PORT", default_value_t = DEFAULT_BASE_PORT)]
    pub base_port: u16,

    /// TOML scenario file replacing the built-in table.
    #[arg(long, env = "RETRY_HARNESS__SCENARIOS")]
    pub scenarios: Option<PathBuf>,

    /// Log output format.
    #[arg(long, env = "RETRY_HARNESS__LOG_FORMAT", value_enum, default_value_t = LogFormat::Auto)]
    pub log_format: LogFormat,

    /// Log every retry at debug level.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Port assignment for this configuration.
    #[must_use]
    pub fn port_layout(&self) -> PortLayout {
        PortLayout { host: self.listen_host, base_port: self.base_port }
    }

    /// Loads the scenario table: the file if one is configured, the
    /// built-in table otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load_scenarios(&self) -> Result<ScenarioTable> {
        match &self.scenarios {
            Some(path) => load_scenario_file(path),
            None => Ok(ScenarioTable::defaults()),
        }
    }
}

/// Loads and validates a TOML scenario file.
///
/// # Errors
///
/// Returns [`ServerError::ReadScenarioFile`](crate::error::ServerError::ReadScenarioFile)
/// or [`ServerError::ParseScenarioFile`](crate::error::ServerError::ParseScenarioFile)
/// if the file cannot be read or deserialized and
/// [`ServerError::Scenarios`](crate::error::ServerError::Scenarios) if the
/// table is invalid.
pub fn load_scenario_file(path: &Path) -> Result<ScenarioTable> {
    let contents = std::fs::read_to_string(path).context(ReadScenarioFileSnafu { path })?;
    let file: ScenarioFile = toml::from_str(&contents).context(ParseScenarioFileSnafu { path })?;
    ScenarioTable::try_from(file).context(ScenariosSnafu)
}

/// Renders the built-in scenario table as a TOML scenario file.
///
/// # Errors
///
/// Returns an error if TOML serialization fails.
pub fn generate_scenario_example() -> Result<String> {
    toml::to_string_pretty(&ScenarioTable::defaults().to_file()).context(RenderExampleSnafu)
}

/// Renders the JSON schema of the scenario file.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn generate_scenario_schema() -> Result<String> {
    let schema = schemars::schema_for!(ScenarioFile);
    serde_json::to_string_pretty(&schema).context(RenderSchemaSnafu)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{io::Write, time::Duration};

    use tonic::Code;

    use super::*;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["otlp-retry-harness"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config.base_port, 30000);
        assert_eq!(cli.config.listen_host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(cli.config.log_format, LogFormat::Auto);
        assert!(!cli.config.verbose);
        assert!(cli.config.scenarios.is_none());
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "otlp-retry-harness",
            "-v",
            "--base-port",
            "40000",
            "--listen-host",
            "127.0.0.1",
            "--log-format",
            "json",
            "--scenarios",
            "/etc/retry.toml",
        ])
        .unwrap();
        assert!(cli.config.verbose);
        assert_eq!(cli.config.port_layout().base_port, 40000);
        assert_eq!(cli.config.listen_host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(cli.config.log_format, LogFormat::Json);
        assert_eq!(cli.config.scenarios, Some(PathBuf::from("/etc/retry.toml")));
    }

    #[test]
    fn test_cli_config_subcommand() {
        let cli = Cli::try_parse_from(["otlp-retry-harness", "config", "example"]).unwrap();
        assert!(matches!(cli.command, Some(CliCommand::Config { action: ConfigAction::Example })));
    }

    #[test]
    fn test_without_file_uses_defaults() {
        let cli = Cli::try_parse_from(["otlp-retry-harness"]).unwrap();
        assert_eq!(cli.config.load_scenarios().unwrap(), ScenarioTable::defaults());
    }

    #[test]
    fn test_load_scenario_file() {
        let file = write_file(
            r#"
[[scenarios]]
code = "unavailable"
expected_retries = 3
min_delay = "250ms"
max_window = "5s"

[[scenarios]]
code = 3
name = "invalid argument is not retried"
"#,
        );
        let table = load_scenario_file(file.path()).unwrap();
        assert_eq!(table.len(), 2);

        let unavailable = table.get(Code::Unavailable).unwrap();
        assert_eq!(unavailable.expected_retries, 3);
        assert_eq!(unavailable.min_delay, Duration::from_millis(250));
        assert_eq!(unavailable.max_window, Duration::from_secs(5));

        let invalid = table.get(Code::InvalidArgument).unwrap();
        assert_eq!(invalid.name, "invalid argument is not retried");
        assert_eq!(invalid.expected_retries, 0);
        assert_eq!(invalid.max_window, Duration::from_secs(30));
    }

    #[test]
    fn test_load_rejects_unknown_code() {
        let file = write_file("[[scenarios]]\ncode = \"teapot\"\n");
        let err = load_scenario_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("teapot"));
    }

    #[test]
    fn test_load_rejects_duplicate_code() {
        let file = write_file("[[scenarios]]\ncode = \"aborted\"\n\n[[scenarios]]\ncode = 10\n");
        assert!(load_scenario_file(file.path()).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_scenario_file(Path::new("/nonexistent/retry-scenarios.toml")).unwrap_err();
        assert!(err.to_string().contains("retry-scenarios.toml"));
    }

    #[test]
    fn test_example_round_trips_through_loader() {
        let example = generate_scenario_example().unwrap();
        let file = write_file(&example);
        assert_eq!(load_scenario_file(file.path()).unwrap(), ScenarioTable::defaults());
    }

    #[test]
    fn test_schema_describes_scenarios() {
        let schema = generate_scenario_schema().unwrap();
        assert!(schema.contains("scenarios"));
        assert!(schema.contains("expected_retries"));
    }
}
