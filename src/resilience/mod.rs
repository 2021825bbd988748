//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Reconnect attempt:
//!     → circuit_breaker.rs (is this guild allowed to try?)
//!     → backoff.rs (how long to wait before trying)
//!     → On failure: breaker records it, next attempt backs off further
//!     → On success: breaker closes, attempt counter resets
//! ```
//!
//! # Design Decisions
//! - Breaker and backoff are per-guild; one flapping channel never slows
//!   another guild down
//! - Jitter is multiplicative and only ever lengthens delays
//! - Sustained heartbeat stability also closes the breaker (see the
//!   supervisor's stability reset)

pub mod backoff;
pub mod circuit_breaker;

pub use backoff::reconnect_delay;
pub use circuit_breaker::{CircuitBreaker, CircuitDecision, CircuitState};
