//! Run tracking and evaluation.
//!
//! A [`RunTracker`] holds the state of one observed attempt sequence: when
//! the triggering attempt arrived, which correlation id it carried, how many
//! matching retries followed and whether any came too early. It is plain
//! data; the handler's observer task feeds it [`RetrySignal`]s and asks it
//! for a [`Verdict`] when the window closes.

use std::time::Duration;

use tokio::time::Instant;

use crate::{
    correlator::CorrelationId,
    report::{FailureReason, Outcome, Verdict},
    scenario::Scenario,
};

/// A non-triggering attempt forwarded to the active run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySignal {
    /// Correlation id of the attempt.
    pub id: CorrelationId,
    /// When the handler received the attempt.
    pub received_at: Instant,
}

impl RetrySignal {
    /// Creates a signal stamped with the current time.
    #[must_use]
    pub fn now(id: CorrelationId) -> Self {
        Self { id, received_at: Instant::now() }
    }
}

/// What a tracker did with a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The signal belongs to another export and was ignored.
    Unrelated,
    /// The signal arrived at or after the window deadline and was discarded.
    Late,
    /// The signal was counted as a retry.
    Retry {
        /// Retry count after this signal.
        count: u32,
        /// Whether this retry arrived before the minimum delay.
        premature: bool,
    },
}

/// State of one observation window.
#[derive(Debug, Clone)]
pub struct RunTracker {
    correlation_id: CorrelationId,
    started_at: Instant,
    min_delay: Duration,
    deadline: Instant,
    attempts: u32,
    premature: bool,
}

impl RunTracker {
    /// Starts tracking a run triggered by `correlation_id` at `started_at`.
    ///
    /// Returns `None` if the window's deadline does not fit the clock.
    #[must_use]
    pub fn start(
        scenario: &Scenario,
        correlation_id: CorrelationId,
        started_at: Instant,
    ) -> Option<Self> {
        let deadline = started_at.checked_add(scenario.max_window)?;
        Some(Self {
            correlation_id,
            started_at,
            min_delay: scenario.min_delay,
            deadline,
            attempts: 0,
            premature: false,
        })
    }

    /// Records a signal.
    pub fn record(&mut self, signal: &RetrySignal) -> Observation {
        if signal.id != self.correlation_id {
            return Observation::Unrelated;
        }
        if signal.received_at >= self.deadline {
            return Observation::Late;
        }
        let premature = signal.received_at < self.started_at + self.min_delay;
        self.premature |= premature;
        self.attempts += 1;
        Observation::Retry { count: self.attempts, premature }
    }

    /// Evaluates the run against the scenario's expectations.
    ///
    /// A premature retry fails the run even when the count matches.
    #[must_use]
    pub fn evaluate(&self, scenario: &Scenario) -> Verdict {
        let outcome = if self.premature {
            Outcome::Fail(FailureReason::RetriedTooSoon)
        } else if self.attempts != scenario.expected_retries {
            Outcome::Fail(FailureReason::RetryCountMismatch {
                expected: scenario.expected_retries,
                observed: self.attempts,
            })
        } else {
            Outcome::Pass
        };
        Verdict {
            scenario: scenario.name.clone(),
            code: scenario.code,
            correlation_id: self.correlation_id.clone(),
            outcome,
            expected: scenario.expected_retries,
            observed: self.attempts,
        }
    }

    /// Correlation id of the triggering attempt.
    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// When the window closes.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Retries counted so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether any counted retry was premature.
    #[must_use]
    pub fn is_premature(&self) -> bool {
        self.premature
    }
}
