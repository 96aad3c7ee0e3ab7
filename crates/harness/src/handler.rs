//! Retry validation handler.
//!
//! One handler serves one scenario. The first export it sees claims a run
//! and starts an observer task; later exports are forwarded to that task as
//! retry signals until the observation window closes. Every well-formed
//! export is answered with the scenario's status code, whatever the run
//! state, so the client under test cannot tell how it is doing.
//!
//! ```text
//! Idle --claim--> Observing --deadline--> Evaluating --drain+release--> Idle
//! ```

use std::sync::Arc;

use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use parking_lot::Mutex;
use tokio::{sync::mpsc, time::Instant};
use tonic::Status;

use crate::{
    context::RequestContext,
    correlator::correlation_id,
    error::HarnessError,
    report::{ReportSink, Verdict},
    scenario::Scenario,
    tracker::{Observation, RetrySignal, RunTracker},
};

/// Message returned alongside the scenario's status code.
pub const FAILURE_MESSAGE: &str = "test failed successfully";

/// Claim state shared between callers and the observer task.
///
/// The sender exists exactly as long as a run is claimed; dropping it is
/// the release.
#[derive(Debug)]
enum RunSlot {
    Idle,
    Observing {
        signals: mpsc::UnboundedSender<RetrySignal>,
    },
}

/// Serves one scenario and judges the retries it provokes.
#[derive(Clone)]
pub struct RetryValidationHandler {
    scenario: Arc<Scenario>,
    slot: Arc<Mutex<RunSlot>>,
    sink: Arc<dyn ReportSink>,
}

impl std::fmt::Debug for RetryValidationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryValidationHandler")
            .field("scenario", &self.scenario.name)
            .field("observing", &self.is_observing())
            .finish_non_exhaustive()
    }
}

impl RetryValidationHandler {
    /// Creates an idle handler for a scenario.
    pub fn new(scenario: Scenario, sink: Arc<dyn ReportSink>) -> Self {
        Self { scenario: Arc::new(scenario), slot: Arc::new(Mutex::new(RunSlot::Idle)), sink }
    }

    /// The scenario this handler serves.
    #[must_use]
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// True while a run is claimed.
    #[must_use]
    pub fn is_observing(&self) -> bool {
        matches!(*self.slot.lock(), RunSlot::Observing { .. })
    }

    /// Handles one export attempt.
    ///
    /// Always returns a failure: the scenario's status code for well-formed
    /// requests, `INTERNAL` for a request without a correlation id or a
    /// caller whose context is already done. Never waits on the run.
    ///
    /// Must be called from within a Tokio runtime; claiming a run spawns the
    /// observer task.
    pub fn handle(&self, ctx: &RequestContext, request: &ExportTraceServiceRequest) -> Status {
        let id = match correlation_id(request) {
            Ok(id) => id,
            Err(err) => {
                tracing::debug!(test_name = %self.scenario.name, "Rejecting export without spans");
                return err.into();
            },
        };
        if ctx.is_done() {
            return HarnessError::CancelledBeforeClaim.into();
        }

        let claimed = {
            let mut slot = self.slot.lock();
            // Stamped under the lock so arrival order matches claim order.
            let received_at = Instant::now();
            match &mut *slot {
                RunSlot::Observing { signals } => {
                    // Fails only while the observer is finalizing; such
                    // attempts belong to no run.
                    if signals.send(RetrySignal { id, received_at }).is_err() {
                        tracing::debug!(
                            test_name = %self.scenario.name,
                            "Discarding attempt received while run is finalizing"
                        );
                    }
                    None
                },
                idle @ RunSlot::Idle => {
                    // The tracker exists before the slot changes, so a claim
                    // always has an observer to release it.
                    match RunTracker::start(&self.scenario, id, received_at) {
                        Some(tracker) => {
                            let (signals, receiver) = mpsc::unbounded_channel();
                            *idle = RunSlot::Observing { signals };
                            Some((tracker, receiver))
                        },
                        None => {
                            tracing::error!(
                                test_name = %self.scenario.name,
                                max_window = ?self.scenario.max_window,
                                "Observation window does not fit the clock, run not started"
                            );
                            None
                        },
                    }
                },
            }
        };

        if let Some((tracker, receiver)) = claimed {
            let observer = Observer {
                scenario: self.scenario.clone(),
                sink: self.sink.clone(),
                _release: Release { slot: self.slot.clone() },
            };
            tokio::spawn(observer.run(tracker, receiver));
        }

        self.failure()
    }

    fn failure(&self) -> Status {
        Status::new(self.scenario.code, FAILURE_MESSAGE)
    }
}

/// Resets the slot to idle when dropped.
struct Release {
    slot: Arc<Mutex<RunSlot>>,
}

impl Drop for Release {
    fn drop(&mut self) {
        *self.slot.lock() = RunSlot::Idle;
    }
}

/// The task that owns a claimed run until its window closes.
struct Observer {
    scenario: Arc<Scenario>,
    sink: Arc<dyn ReportSink>,
    _release: Release,
}

impl Observer {
    async fn run(self, mut tracker: RunTracker, mut signals: mpsc::UnboundedReceiver<RetrySignal>) {
        tracing::info!(
            test_name = %self.scenario.name,
            correlation_id = %tracker.correlation_id(),
            "Starting test"
        );

        let window = tokio::time::sleep_until(tracker.deadline());
        tokio::pin!(window);
        loop {
            tokio::select! {
                biased;
                () = &mut window => break,
                Some(signal) = signals.recv() => self.note(&mut tracker, &signal),
            }
        }

        // Anything still queued was sent before the receiver closed; the
        // tracker keeps what arrived before the deadline.
        signals.close();
        while let Ok(signal) = signals.try_recv() {
            self.note(&mut tracker, &signal);
        }

        let verdict = tracker.evaluate(&self.scenario);
        self.publish(&verdict);
    }

    fn note(&self, tracker: &mut RunTracker, signal: &RetrySignal) {
        match tracker.record(signal) {
            Observation::Unrelated => {
                tracing::debug!(
                    test_name = %self.scenario.name,
                    correlation_id = %signal.id,
                    "Ignoring unrelated attempt"
                );
            },
            Observation::Late => {
                tracing::debug!(
                    test_name = %self.scenario.name,
                    "Discarding attempt received after the window closed"
                );
            },
            Observation::Retry { count, premature: true } => {
                tracing::debug!(test_name = %self.scenario.name, count, early_retry = true, "retry");
            },
            Observation::Retry { count, premature: false } => {
                tracing::debug!(test_name = %self.scenario.name, count, "retry");
            },
        }
    }

    fn publish(&self, verdict: &Verdict) {
        match verdict.reason() {
            None => tracing::info!(
                test_name = %verdict.scenario,
                observed = verdict.observed,
                "Test passed"
            ),
            Some(reason) => tracing::warn!(
                test_name = %verdict.scenario,
                expected = verdict.expected,
                observed = verdict.observed,
                reason = %reason,
                "Test failed"
            ),
        }
        self.sink.report(verdict);
    }
}
