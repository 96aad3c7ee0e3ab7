//! Error types for the retry harness using snafu.
//!
//! Only bookkeeping failures are errors. A client that retries too soon or
//! too often produces a failing [`Verdict`](crate::Verdict), never an error
//! on the wire.

use snafu::Snafu;
use tonic::Status;

/// Errors surfaced to the caller of [`RetryValidationHandler::handle`].
///
/// Both variants map to `INTERNAL` so the client under test can tell harness
/// failures apart from the scenario's configured status code.
///
/// [`RetryValidationHandler::handle`]: crate::RetryValidationHandler::handle
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum HarnessError {
    /// The export request has no span to take a correlation id from.
    #[snafu(display("request did not have an ID"))]
    MalformedRequest,

    /// The caller's context was done before the attempt could be recorded.
    #[snafu(display("context cancelled"))]
    CancelledBeforeClaim,
}

impl From<HarnessError> for Status {
    fn from(err: HarnessError) -> Self {
        Status::internal(err.to_string())
    }
}

/// Scenario validation error.
///
/// Returned when a scenario value is outside its valid range or two
/// scenarios collide on the same status code.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ScenarioError {
    /// A scenario value is invalid.
    #[snafu(display("invalid scenario: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },
}
