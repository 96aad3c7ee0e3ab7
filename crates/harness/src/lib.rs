//! Retry validation for OTLP trace exporters.
//!
//! Each [`Scenario`] names a gRPC status code and the retry behavior a
//! conforming exporter must show when a collector answers with it. A
//! [`RetryValidationHandler`] plays that collector: it fails every export
//! with the scenario's code while it watches the exporter's retries arrive,
//! then hands a [`Verdict`] to a [`ReportSink`].
//!
//! - [`correlator`] groups attempts of one export by trace id
//! - [`tracker`] holds and evaluates the state of one observation window
//! - [`handler`] claims runs and drives the observer task
//! - [`service`] exposes a handler as an OTLP `TraceService`

#![deny(unsafe_code)]
// The handler returns tonic::Status by value.
#![allow(clippy::result_large_err)]

pub mod context;
pub mod correlator;
pub mod error;
pub mod handler;
pub mod report;
pub mod scenario;
pub mod service;
pub mod tracker;

pub use context::RequestContext;
pub use correlator::{CorrelationId, correlation_id};
pub use error::{HarnessError, ScenarioError};
pub use handler::{FAILURE_MESSAGE, RetryValidationHandler};
pub use report::{
    ChannelSink, FailureReason, Outcome, ReportSink, StdoutSink, TallySink, Verdict,
};
pub use scenario::{
    MAX_WINDOW_LIMIT, Scenario, ScenarioEntry, ScenarioFile, ScenarioTable, code_name, parse_code,
};
pub use service::RetryTraceService;
pub use tracker::{Observation, RetrySignal, RunTracker};
