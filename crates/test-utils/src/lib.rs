//! Shared test utilities for the OTLP retry harness crates.
//!
//! - [`export_request`] / [`export_request_with_spans`] - minimal OTLP export requests
//! - [`trace_id`] - distinct, deterministic trace ids
//! - [`assert_eventually`] - Poll a condition until it's true or timeout

#![deny(unsafe_code)]

mod assertions;
pub use assertions::assert_eventually;

mod requests;
pub use requests::{export_request, export_request_with_spans, trace_id};
