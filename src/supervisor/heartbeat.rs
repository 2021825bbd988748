//! Heartbeat liveness monitoring.
//!
//! # Responsibilities
//! - Periodically compare the gateway roster against the expected channel
//! - Trigger the drop path after consecutive mismatches
//! - Reset reconnect bookkeeping once a connection has proven stable
//!
//! # Design Decisions
//! - The probe consults the roster, not the transport handle; it catches
//!   silent drops the event stream misses
//! - Probe errors are transient lookup noise, they never count as mismatches
//! - Sustained stability closes the circuit breaker without an explicit
//!   success signal; that is a tunable policy, not a correctness guarantee

use std::sync::Arc;
use std::time::Duration;

use crate::gateway::GuildId;
use crate::lifecycle::TaskGuard;
use crate::observability::metrics;
use crate::supervisor::VoiceSupervisor;

/// Whether the heartbeat loop keeps running after a pass.
#[derive(Debug, PartialEq, Eq)]
enum HeartbeatOutcome {
    Continue,
    Stop,
}

impl VoiceSupervisor {
    /// Start (or restart) the heartbeat loop for a guild.
    pub(crate) fn start_heartbeat(self: &Arc<Self>, guild: GuildId) {
        self.stop_heartbeat(&guild);
        self.registry.heartbeat_failures.insert(guild.clone(), 0);

        let interval = Duration::from_millis(self.config.heartbeat.interval_ms);
        let mut shutdown_rx = self.shutdown.subscribe();
        let weak = Arc::downgrade(self);
        let g = guild.clone();

        let guard = TaskGuard::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        let Some(sup) = weak.upgrade() else { break };
                        if sup.heartbeat_pass(&g).await == HeartbeatOutcome::Stop {
                            break;
                        }
                    }
                }
            }
        });

        self.registry.heartbeats.insert(guild, guard);
    }

    /// Stop the heartbeat loop and forget its failure counter.
    pub(crate) fn stop_heartbeat(&self, guild: &GuildId) {
        self.registry.heartbeats.remove(guild);
        self.registry.heartbeat_failures.remove(guild);
    }

    async fn heartbeat_pass(self: &Arc<Self>, guild: &GuildId) -> HeartbeatOutcome {
        if self.shutdown.is_shutting_down() {
            return HeartbeatOutcome::Stop;
        }

        let expected = self
            .registry
            .connections
            .get(guild)
            .map(|r| r.value().channel_id.clone());
        let Some(expected) = expected else {
            return HeartbeatOutcome::Stop;
        };

        let actual = match self.gateway.own_voice_channel(guild).await {
            Ok(actual) => actual,
            Err(e) => {
                tracing::debug!(guild = %guild, error = %e, "Heartbeat roster check failed");
                return HeartbeatOutcome::Continue;
            }
        };

        if actual.as_ref() != Some(&expected) {
            let failures = {
                let mut entry = self
                    .registry
                    .heartbeat_failures
                    .entry(guild.clone())
                    .or_insert(0);
                *entry += 1;
                *entry
            };
            metrics::record_heartbeat_miss();

            let corr = self.correlation(guild);
            if failures >= self.config.heartbeat.max_failures {
                tracing::warn!(
                    corr = %corr,
                    failures,
                    "Heartbeat found wrong channel, triggering reconnect"
                );
                // Detach our own guard so the drop path's cleanup cannot
                // abort the work this task is about to do.
                if let Some((_, guard)) = self.registry.heartbeats.remove(guild) {
                    guard.disarm();
                }
                self.handle_drop(guild, "heartbeat_failure").await;
                return HeartbeatOutcome::Stop;
            }

            tracing::debug!(
                corr = %corr,
                failures,
                max = self.config.heartbeat.max_failures,
                "Heartbeat mismatch"
            );
            return HeartbeatOutcome::Continue;
        }

        self.registry.heartbeat_failures.insert(guild.clone(), 0);
        self.maybe_reset_reconnect_attempts(guild);

        HeartbeatOutcome::Continue
    }

    /// Treat sustained stability as recovery: once a connection has been
    /// clean for the stability threshold, spent reconnect attempts are
    /// forgiven and the circuit breaker is forced closed.
    fn maybe_reset_reconnect_attempts(&self, guild: &GuildId) {
        let threshold = Duration::from_millis(self.config.heartbeat.stable_threshold_ms);
        let stable_for = self
            .registry
            .stable_since
            .get(guild)
            .map(|r| r.value().elapsed());
        let Some(stable_for) = stable_for else { return };
        if stable_for < threshold {
            return;
        }

        let attempts = self
            .registry
            .attempts
            .get(guild)
            .map(|r| *r.value())
            .unwrap_or(0);
        if attempts == 0 {
            return;
        }

        let corr = self.correlation(guild);
        tracing::info!(
            corr = %corr,
            stable_secs = stable_for.as_secs(),
            "Connection stable, resetting reconnect attempts"
        );
        self.registry.attempts.remove(guild);
        self.record_breaker_success(guild);
    }
}
