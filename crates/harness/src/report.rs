//! Verdicts and where they go.
//!
//! Verdicts never travel over the wire; the client under test only ever
//! sees the scenario's status code. Each finished run is handed to a
//! [`ReportSink`] instead.

use std::{
    fmt,
    io::Write,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::mpsc;
use tonic::Code;

use crate::correlator::CorrelationId;

/// Why a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// A matching retry arrived before the scenario's minimum delay.
    RetriedTooSoon,
    /// The number of retries differed from the expected count.
    RetryCountMismatch {
        /// Retries the scenario expects.
        expected: u32,
        /// Retries seen during the window.
        observed: u32,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriedTooSoon => write!(f, "retried too soon"),
            Self::RetryCountMismatch { expected, observed } => {
                write!(f, "retry count mismatch: expected {expected}, got {observed}")
            },
        }
    }
}

/// Pass or fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The client retried as expected.
    Pass,
    /// The client misbehaved.
    Fail(FailureReason),
}

/// Result of one observed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Scenario label.
    pub scenario: String,
    /// Status code the scenario returns.
    pub code: Code,
    /// Correlation id of the observed export.
    pub correlation_id: CorrelationId,
    /// Pass or fail.
    pub outcome: Outcome,
    /// Retries the scenario expects.
    pub expected: u32,
    /// Retries counted during the window.
    pub observed: u32,
}

impl Verdict {
    /// True if the run passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }

    /// The failure reason, if the run failed.
    #[must_use]
    pub fn reason(&self) -> Option<FailureReason> {
        match self.outcome {
            Outcome::Pass => None,
            Outcome::Fail(reason) => Some(reason),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            Outcome::Pass => write!(
                f,
                "Success: {} (expected {}, observed {})",
                self.scenario, self.expected, self.observed
            ),
            // The mismatch reason already carries both counts.
            Outcome::Fail(reason @ FailureReason::RetryCountMismatch { .. }) => {
                write!(f, "Failed: {} - {reason}", self.scenario)
            },
            Outcome::Fail(reason) => write!(
                f,
                "Failed: {} - {reason} (expected {}, observed {})",
                self.scenario, self.expected, self.observed
            ),
        }
    }
}

/// Destination for verdicts.
pub trait ReportSink: Send + Sync {
    /// Records one verdict.
    fn report(&self, verdict: &Verdict);
}

/// Prints one line per verdict to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl ReportSink for StdoutSink {
    fn report(&self, verdict: &Verdict) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{verdict}") {
            tracing::warn!(test_name = %verdict.scenario, error = %e, "Failed to write verdict");
        }
    }
}

/// Forwards verdicts into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Verdict>,
}

impl ChannelSink {
    /// Creates a sink and the receiver its verdicts arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Verdict>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ReportSink for ChannelSink {
    fn report(&self, verdict: &Verdict) {
        if self.tx.send(verdict.clone()).is_err() {
            tracing::debug!(test_name = %verdict.scenario, "Verdict receiver dropped");
        }
    }
}

/// Counts passes and failures before handing verdicts on.
#[derive(Debug, Default)]
pub struct TallySink<S> {
    inner: S,
    passed: AtomicU64,
    failed: AtomicU64,
}

impl<S: ReportSink> TallySink<S> {
    /// Wraps a sink.
    pub fn new(inner: S) -> Self {
        Self { inner, passed: AtomicU64::new(0), failed: AtomicU64::new(0) }
    }

    /// Runs that passed so far.
    pub fn passed(&self) -> u64 {
        self.passed.load(Ordering::Relaxed)
    }

    /// Runs that failed so far.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl<S: ReportSink> ReportSink for TallySink<S> {
    fn report(&self, verdict: &Verdict) {
        if verdict.passed() {
            self.passed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.report(verdict);
    }
}
