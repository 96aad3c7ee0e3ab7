//! OTLP retry harness server library.
//!
//! Provides configuration, the per-scenario endpoint registry, logging
//! bootstrap, and shutdown handling for the `otlp-retry-harness` binary.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod registry;
pub mod shutdown;

pub use error::{Result, ServerError};
pub use registry::{Endpoint, EndpointRegistry, PortLayout};
pub use shutdown::{ShutdownCoordinator, shutdown_signal};
