//! Error types for the server binary and library using snafu.

// Snafu generates struct fields for context selectors that don't need documentation
#![allow(missing_docs)]

use std::{net::SocketAddr, path::PathBuf};

use otlp_retry_harness::ScenarioError;
use snafu::Snafu;

/// Errors raised while starting or running the endpoints.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ServerError {
    /// The scenario file could not be read.
    #[snafu(display("failed to read scenario file {}: {source}", path.display()))]
    ReadScenarioFile { path: PathBuf, source: std::io::Error },

    /// The scenario file is not valid TOML or has the wrong shape.
    #[snafu(display("failed to parse scenario file {}: {source}", path.display()))]
    ParseScenarioFile { path: PathBuf, source: toml::de::Error },

    /// The scenario table is invalid.
    #[snafu(display("invalid scenario table: {source}"))]
    Scenarios { source: ScenarioError },

    /// `base_port + code` does not fit in a port number.
    #[snafu(display("port for status code {code} overflows base port {base_port}"))]
    PortOverflow { base_port: u16, code: u16 },

    /// A listener could not be bound.
    #[snafu(display("failed to bind {addr}: {source}"))]
    Bind { addr: SocketAddr, source: std::io::Error },

    /// A gRPC server stopped with a transport error.
    #[snafu(display("endpoint {addr} failed: {source}"))]
    Serve { addr: SocketAddr, source: tonic::transport::Error },

    /// An endpoint task panicked or was aborted.
    #[snafu(display("endpoint task failed: {source}"))]
    EndpointTask { source: tokio::task::JoinError },

    /// The example scenario file could not be rendered.
    #[snafu(display("failed to render example config: {source}"))]
    RenderExample { source: toml::ser::Error },

    /// The scenario file schema could not be rendered.
    #[snafu(display("failed to render config schema: {source}"))]
    RenderSchema { source: serde_json::Error },
}

/// Result type for server operations.
pub type Result<T, E = ServerError> = std::result::Result<T, E>;
