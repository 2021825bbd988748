//! Circuit breaker gating reconnect attempts.
//!
//! # States
//! - Closed: normal operation, attempts pass through
//! - Open: target assumed broken, attempts fail fast
//! - Half-Open: testing whether the target recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure count >= threshold
//! Open → Half-Open: cooldown elapsed since last failure
//! Half-Open → Closed: test attempt succeeds
//! Half-Open → Open: test attempt fails
//! ```
//!
//! # Design Decisions
//! - Per-guild breaker, not global
//! - Exactly one test request when crossing into Half-Open; further attempts
//!   are rejected until the test resolves
//! - Any failure in Half-Open reopens immediately, regardless of count

use std::time::{Duration, Instant};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, attempts pass through.
    Closed,
    /// Failing fast, attempts are rejected.
    Open,
    /// Testing recovery, one probe attempt allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Outcome of asking the breaker whether an attempt may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    /// Attempt may proceed.
    Permit,
    /// Circuit is open; check again after the contained duration.
    Defer(Duration),
    /// A half-open test is already outstanding; no further attempts until it
    /// resolves.
    Reject,
}

impl CircuitDecision {
    pub fn is_permitted(&self) -> bool {
        matches!(self, Self::Permit)
    }
}

/// Per-guild circuit breaker.
///
/// Mutated only from the owning guild's task chain, so plain fields suffice.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    test_request_allowed: bool,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            last_failure: None,
            test_request_allowed: false,
            threshold,
            cooldown,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failures
    }

    /// Record a failed attempt. Returns the new state when it changed.
    pub fn record_failure(&mut self) -> Option<CircuitState> {
        self.failures += 1;
        self.last_failure = Some(Instant::now());

        match self.state {
            CircuitState::HalfOpen => {
                // The test request failed; reopen regardless of count.
                self.state = CircuitState::Open;
                self.test_request_allowed = false;
                Some(CircuitState::Open)
            }
            CircuitState::Closed if self.failures >= self.threshold => {
                self.state = CircuitState::Open;
                Some(CircuitState::Open)
            }
            _ => None,
        }
    }

    /// Record a successful attempt: reset the count and force Closed.
    /// Returns the new state when it changed.
    pub fn record_success(&mut self) -> Option<CircuitState> {
        let old_state = self.state;

        self.failures = 0;
        self.state = CircuitState::Closed;
        self.test_request_allowed = false;

        (old_state != CircuitState::Closed).then_some(CircuitState::Closed)
    }

    /// Decide whether an attempt may proceed right now.
    ///
    /// Crossing the cooldown moves the breaker to Half-Open and permits that
    /// one call as the test request; later calls are rejected until the test
    /// resolves through [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn evaluate(&mut self) -> CircuitDecision {
        match self.state {
            CircuitState::Closed => CircuitDecision::Permit,
            CircuitState::Open => {
                let elapsed = self
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(self.cooldown);

                if elapsed >= self.cooldown {
                    self.state = CircuitState::HalfOpen;
                    self.test_request_allowed = false;
                    CircuitDecision::Permit
                } else {
                    CircuitDecision::Defer(self.cooldown - elapsed)
                }
            }
            CircuitState::HalfOpen => {
                if self.test_request_allowed {
                    self.test_request_allowed = false;
                    CircuitDecision::Permit
                } else {
                    CircuitDecision::Reject
                }
            }
        }
    }
}
