//! Configuration validation.
//!
//! Semantic checks on top of what serde already enforces syntactically.
//! Returns all validation errors, not just the first, so a broken config can
//! be fixed in one pass.

use crate::config::schema::SupervisorConfig;

/// A single semantic validation failure.
#[derive(Debug)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration before it is accepted into the system.
pub fn validate_config(config: &SupervisorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut fail = |field: &'static str, message: String| {
        errors.push(ValidationError { field, message });
    };

    let r = &config.reconnect;
    if r.multiplier < 1.0 {
        fail(
            "reconnect.multiplier",
            format!("must be >= 1.0, got {}", r.multiplier),
        );
    }
    if !(0.0..=1.0).contains(&r.jitter) {
        fail(
            "reconnect.jitter",
            format!("must be within [0.0, 1.0], got {}", r.jitter),
        );
    }
    if r.max_delay_ms < r.base_delay_ms {
        fail(
            "reconnect.max_delay_ms",
            format!(
                "must be >= base_delay_ms ({}), got {}",
                r.base_delay_ms, r.max_delay_ms
            ),
        );
    }
    if r.max_attempts == 0 {
        fail("reconnect.max_attempts", "must be > 0".to_string());
    }

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        fail("circuit_breaker.failure_threshold", "must be > 0".to_string());
    }
    if cb.cooldown_ms == 0 {
        fail("circuit_breaker.cooldown_ms", "must be > 0".to_string());
    }

    let hb = &config.heartbeat;
    if hb.interval_ms == 0 {
        fail("heartbeat.interval_ms", "must be > 0".to_string());
    }
    if hb.max_failures == 0 {
        fail("heartbeat.max_failures", "must be > 0".to_string());
    }

    let j = &config.join;
    if j.validation_attempts == 0 {
        fail("join.validation_attempts", "must be > 0".to_string());
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        fail(
            "observability.metrics_address",
            format!(
                "not a valid socket address: {}",
                config.observability.metrics_address
            ),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
