//! Per-request context: deadline and cancellation.
//!
//! The transport hands each export to the handler together with a
//! [`RequestContext`]. A caller whose context is already done gets
//! `INTERNAL`: it neither claims a run nor counts as a retry.
//!
//! Over tonic only the `grpc-timeout` deadline can make a context done;
//! [`RequestContext::cancel`] is for callers that drive
//! [`RetryValidationHandler::handle`](crate::RetryValidationHandler::handle)
//! directly.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;

/// Header name for gRPC timeout propagation.
const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Deadline and cancellation state of one inbound call.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// A context with no deadline that is never cancelled unless asked to.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Derives the deadline from the `grpc-timeout` header, if present.
    ///
    /// The returned context is never cancelled; it is done only once the
    /// deadline passes.
    #[must_use]
    pub fn from_metadata(metadata: &MetadataMap) -> Self {
        let received_at = Instant::now();
        let timeout = metadata
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_grpc_timeout);
        match timeout {
            Some(timeout) => Self::new().with_deadline(received_at + timeout),
            None => Self::new(),
        }
    }

    /// Cancels the context and every clone of it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The absolute deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once the context was cancelled or its deadline has passed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Parse the `grpc-timeout` header value as defined by the gRPC HTTP/2 protocol.
///
/// Format: `{value}{unit}` where unit is one of: H (hours), M (minutes),
/// S (seconds), m (milliseconds), u (microseconds), n (nanoseconds).
/// Value is at most 8 decimal digits.
fn parse_grpc_timeout(s: &str) -> Option<Duration> {
    if s.is_empty() || !s.is_ascii() {
        return None;
    }

    let (value_str, unit) = s.split_at(s.len() - 1);

    if value_str.is_empty() || value_str.len() > 8 {
        return None;
    }

    let value: u64 = value_str.parse().ok()?;

    match unit {
        "H" => Some(Duration::from_secs(value * 3600)),
        "M" => Some(Duration::from_secs(value * 60)),
        "S" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_millis(value)),
        "u" => Some(Duration::from_micros(value)),
        "n" => Some(Duration::from_nanos(value)),
        _ => None,
    }
}
