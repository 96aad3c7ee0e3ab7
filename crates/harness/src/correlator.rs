//! Correlation of export attempts.
//!
//! A retrying exporter resends the same batch, so the trace id of the first
//! span stays stable across attempts of one logical export while unrelated
//! exports carry different ids.

use std::fmt;

use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;

use crate::error::HarnessError;

/// Identifier grouping the attempts of one logical export.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Vec<u8>);

impl CorrelationId {
    /// Creates a correlation id from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw id bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Extracts the correlation id from an export request.
///
/// Uses the trace id of the first span of the first scope of the first
/// resource.
///
/// # Errors
///
/// Returns [`HarnessError::MalformedRequest`] if any of those lists is empty.
pub fn correlation_id(request: &ExportTraceServiceRequest) -> Result<CorrelationId, HarnessError> {
    let span = request
        .resource_spans
        .first()
        .and_then(|resource| resource.scope_spans.first())
        .and_then(|scope| scope.spans.first())
        .ok_or(HarnessError::MalformedRequest)?;
    Ok(CorrelationId::new(span.trace_id.clone()))
}
