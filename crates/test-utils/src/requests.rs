//! OTLP export request builders.
//!
//! Span content is irrelevant to the harness; only the trace id of the
//! first span is read, so the builders fill in nothing else.

use opentelemetry_proto::tonic::{
    collector::trace::v1::ExportTraceServiceRequest,
    trace::v1::{ResourceSpans, ScopeSpans, Span},
};

/// An export request carrying one span with the given trace id.
#[must_use]
pub fn export_request(trace_id: &[u8]) -> ExportTraceServiceRequest {
    export_request_with_spans(&[trace_id])
}

/// An export request with one span per trace id, all in the first scope of
/// the first resource.
#[must_use]
pub fn export_request_with_spans(trace_ids: &[&[u8]]) -> ExportTraceServiceRequest {
    let spans = trace_ids
        .iter()
        .enumerate()
        .map(|(i, trace_id)| Span {
            trace_id: trace_id.to_vec(),
            span_id: (i as u64 + 1).to_be_bytes().to_vec(),
            name: format!("span-{i}"),
            ..Default::default()
        })
        .collect();
    ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            scope_spans: vec![ScopeSpans { spans, ..Default::default() }],
            ..Default::default()
        }],
    }
}

/// A trace id unique to `seed`, for tests that need several distinct exports.
#[must_use]
pub fn trace_id(seed: u8) -> [u8; 16] {
    let mut id = [0u8; 16];
    id[0] = 0xab;
    id[15] = seed;
    id
}
