//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! supervisor. All types derive Serde traits for deserialization from config
//! files, and every timing knob the reconnect machinery uses lives here so
//! deployments (and tests) can compress or stretch the time scale.

use serde::{Deserialize, Serialize};

/// Root configuration for the voice supervisor.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Join and membership validation settings.
    pub join: JoinConfig,

    /// Reconnect backoff settings.
    pub reconnect: ReconnectConfig,

    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Heartbeat liveness probe settings.
    pub heartbeat: HeartbeatConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Join and membership validation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JoinConfig {
    /// Delay before the first roster check after a connect call, in ms.
    /// Voice state takes a moment to propagate platform-side.
    pub propagation_delay_ms: u64,

    /// Number of roster checks before a join is declared failed.
    pub validation_attempts: u32,

    /// Delay between roster checks in ms.
    pub validation_retry_ms: u64,

    /// Pause between leaving one channel and joining another in ms.
    pub rejoin_pause_ms: u64,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            propagation_delay_ms: 2_000,
            validation_attempts: 4,
            validation_retry_ms: 3_000,
            rejoin_pause_ms: 500,
        }
    }
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First-attempt delay in ms.
    pub base_delay_ms: u64,

    /// Upper bound on any computed delay in ms.
    pub max_delay_ms: u64,

    /// Exponential growth factor per attempt.
    pub multiplier: f64,

    /// Maximum added jitter as a fraction of the computed delay.
    /// 0.3 means each delay is multiplied by a uniform draw from [1.0, 1.3).
    pub jitter: f64,

    /// Attempts before the supervisor gives up on a guild.
    pub max_attempts: u32,

    /// Minimum delay before re-checking an open circuit breaker, in ms.
    pub breaker_recheck_floor_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            max_delay_ms: 300_000,
            multiplier: 1.5,
            jitter: 0.3,
            max_attempts: 10,
            breaker_recheck_floor_ms: 5_000,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Time the circuit stays open before allowing a test request, in ms.
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 120_000,
        }
    }
}

/// Heartbeat liveness probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Interval between roster probes in ms.
    pub interval_ms: u64,

    /// Consecutive mismatches before the connection is treated as dropped.
    pub max_failures: u32,

    /// How long a connection must stay clean before reconnect attempts and
    /// the circuit breaker are reset, in ms.
    pub stable_threshold_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            max_failures: 3,
            stable_threshold_ms: 120_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable the Prometheus metrics exporter.
    pub metrics_enabled: bool,

    /// Bind address for the metrics endpoint.
    pub metrics_address: String,

    /// Default tracing filter when RUST_LOG is unset.
    pub log_filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9095".to_string(),
            log_filter: "voicekeeper=info".to_string(),
        }
    }
}
