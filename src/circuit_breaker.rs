//! Per-provider circuit breaker.
//!
//! The breaker record is created lazily on the first failure and deleted
//! outright when a request or probe succeeds, so a provider that never
//! failed carries no record at all.
//!
//! ```text
//!   Closed --(failure_count >= threshold)--> Open
//!   Open   --(open_timeout elapsed, admit)--> HalfOpen (one trial in flight)
//!   HalfOpen --success--> Closed (record deleted)
//!   HalfOpen --failure--> Open (fresh opened_at)
//! ```

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed,
    Open { opened_at: Instant },
    /// A trial request has been admitted and has not reported back yet.
    HalfOpen { opened_at: Instant },
}

#[derive(Debug, Clone, Copy)]
struct BreakerRecord {
    failure_count: u32,
    phase: Phase,
}

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn is_open(&self) -> bool {
        !matches!(self, CircuitState::Closed)
    }
}

/// Outcome of asking the breaker whether a request may go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The open timeout has elapsed; this caller carries the single trial.
    Trial,
    Rejected,
}

/// What a recorded failure did to the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    Unchanged,
    Opened { failure_count: u32 },
    Reopened { failure_count: u32 },
}

#[derive(Debug, Default)]
pub struct CircuitBreaker {
    record: Mutex<Option<BreakerRecord>>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides whether a request may use the provider now.
    ///
    /// Only one half-open trial is admitted at a time; concurrent callers are
    /// rejected until the trial reports back or is abandoned.
    pub fn admit(&self, open_timeout: Duration) -> Admission {
        let mut guard = self.record.lock();
        let Some(record) = guard.as_mut() else {
            return Admission::Allowed;
        };

        match record.phase {
            Phase::Closed => Admission::Allowed,
            Phase::HalfOpen { .. } => Admission::Rejected,
            Phase::Open { opened_at } => {
                if opened_at.elapsed() >= open_timeout {
                    record.phase = Phase::HalfOpen { opened_at };
                    Admission::Trial
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    /// Like [`admit`](Self::admit) but never claims the trial slot.
    pub fn would_admit(&self, open_timeout: Duration) -> bool {
        match self.record.lock().as_ref().map(|r| r.phase) {
            None | Some(Phase::Closed) => true,
            Some(Phase::HalfOpen { .. }) => false,
            Some(Phase::Open { opened_at }) => opened_at.elapsed() >= open_timeout,
        }
    }

    /// Clears the breaker. Returns `true` if it was open or half-open.
    pub fn on_success(&self) -> bool {
        let previous = self.record.lock().take();
        matches!(
            previous.map(|r| r.phase),
            Some(Phase::Open { .. } | Phase::HalfOpen { .. })
        )
    }

    pub fn on_failure(&self, threshold: u32) -> BreakerTransition {
        let mut guard = self.record.lock();
        let record = guard.get_or_insert(BreakerRecord {
            failure_count: 0,
            phase: Phase::Closed,
        });
        record.failure_count = record.failure_count.saturating_add(1);

        match record.phase {
            Phase::Closed if record.failure_count >= threshold => {
                record.phase = Phase::Open {
                    opened_at: Instant::now(),
                };
                BreakerTransition::Opened {
                    failure_count: record.failure_count,
                }
            }
            Phase::HalfOpen { .. } => {
                record.phase = Phase::Open {
                    opened_at: Instant::now(),
                };
                BreakerTransition::Reopened {
                    failure_count: record.failure_count,
                }
            }
            // Further failures while open keep the original timestamp.
            Phase::Closed | Phase::Open { .. } => BreakerTransition::Unchanged,
        }
    }

    /// Returns an admitted trial slot that never reported an outcome.
    ///
    /// The breaker goes back to open with its original timestamp, so the next
    /// caller is admitted as a trial straight away.
    pub fn abandon_trial(&self) {
        if let Some(record) = self.record.lock().as_mut() {
            if let Phase::HalfOpen { opened_at } = record.phase {
                record.phase = Phase::Open { opened_at };
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.record.lock().as_ref().map(|r| r.phase) {
            None | Some(Phase::Closed) => CircuitState::Closed,
            Some(Phase::Open { .. }) => CircuitState::Open,
            Some(Phase::HalfOpen { .. }) => CircuitState::HalfOpen,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.record.lock().as_ref().map_or(0, |r| r.failure_count)
    }

    pub fn opened_at(&self) -> Option<Instant> {
        match self.record.lock().as_ref()?.phase {
            Phase::Closed => None,
            Phase::Open { opened_at } | Phase::HalfOpen { opened_at } => Some(opened_at),
        }
    }
}

/// Keeps a half-open trial slot from leaking when the request future is
/// dropped before it reports an outcome.
pub(crate) struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl<'a> TrialGuard<'a> {
    pub(crate) fn new(breaker: &'a CircuitBreaker, admission: Admission) -> Self {
        Self {
            breaker,
            armed: admission == Admission::Trial,
        }
    }

    /// Marks the trial as reported; the caller records success or failure itself.
    pub(crate) fn resolve(mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_trial();
        }
    }
}
