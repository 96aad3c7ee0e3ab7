//! OTLP retry harness server binary.
//!
//! Opens one failing OTLP trace collector per gRPC status code and prints a
//! verdict line for every export sequence it observes.
//!
//! # Usage
//!
//! ```bash
//! # Serve the built-in table on ports 30001..=30016
//! otlp-retry-harness
//!
//! # Log every retry
//! otlp-retry-harness -v
//!
//! # Use a custom scenario table
//! otlp-retry-harness config example > scenarios.toml
//! RETRY_HARNESS__SCENARIOS=scenarios.toml otlp-retry-harness
//! ```

use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use otlp_retry_harness::{StdoutSink, TallySink};
use otlp_retry_harness_server::{
    EndpointRegistry, ServerError, ShutdownCoordinator,
    config::{self, Cli, CliCommand, ConfigAction},
    error::EndpointTaskSnafu,
    logging,
};
use snafu::ResultExt;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(CliCommand::Config { action }) = cli.command {
        let rendered = match action {
            ConfigAction::Example => config::generate_scenario_example(),
            ConfigAction::Schema => config::generate_scenario_schema(),
        };
        return match rendered {
            Ok(text) => {
                print!("{text}");
                ExitCode::SUCCESS
            },
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            },
        };
    }

    logging::init_logging(&cli.config);

    match run(&cli.config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Test server failed");
            ExitCode::FAILURE
        },
    }
}

async fn run(config: &config::Config) -> Result<(), ServerError> {
    let table = config.load_scenarios()?;
    tracing::info!(
        scenarios = table.len(),
        base_port = config.base_port,
        listen_host = %config.listen_host,
        "Starting Test Server"
    );

    let tally = Arc::new(TallySink::new(StdoutSink));
    let registry = EndpointRegistry::bind(&table, config.port_layout(), tally.clone()).await?;

    let coordinator = ShutdownCoordinator::new();
    let mut serve = tokio::spawn(registry.serve(coordinator.subscribe()));

    tracing::info!("Server ready, accepting exports");
    let served = tokio::select! {
        joined = &mut serve => joined,
        () = coordinator.wait_for_signal() => serve.await,
    };

    tracing::info!(passed = tally.passed(), failed = tally.failed(), "Test server stopped");
    served.context(EndpointTaskSnafu)?
}
