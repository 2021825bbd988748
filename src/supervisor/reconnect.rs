//! Drop handling and reconnect scheduling.
//!
//! # Data Flow
//! ```text
//! Drop detected (event or heartbeat):
//!     → handle_drop: state Disconnecting, heartbeat stopped
//!     → channel still resolvable? schedule_reconnect : full cleanup
//!
//! schedule_reconnect:
//!     → circuit breaker gate (defer / reject / permit)
//!     → attempt budget check
//!     → backoff timer armed, fires handle_reconnect
//!
//! handle_reconnect:
//!     → channel gone? remove persisted target, full cleanup
//!     → rejoin; success closes the breaker, failure feeds it and
//!       reschedules until the budget runs out
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::gateway::{ChannelId, GuildId};
use crate::lifecycle::CancellableTimer;
use crate::observability::metrics;
use crate::resilience::{self, CircuitDecision};
use crate::supervisor::{ConnectionState, VoiceSupervisor};

impl VoiceSupervisor {
    /// React to an unexpected loss of voice membership.
    pub(crate) async fn handle_drop(self: &Arc<Self>, guild: &GuildId, reason: &str) {
        let corr = self.correlation(guild);

        if self.shutdown.is_shutting_down() {
            tracing::info!(corr = %corr, "Not reconnecting, shutdown in progress");
            return;
        }

        let Some((_, record)) = self.registry.connections.remove(guild) else {
            return;
        };
        self.set_state(guild, ConnectionState::Disconnecting);
        self.stop_heartbeat(guild);
        metrics::record_active_connections(self.registry.connections.len());

        match self.gateway.resolve_voice_channel(&record.channel_id) {
            Some(info) => {
                tracing::info!(corr = %corr, reason, "Scheduling reconnect");
                self.schedule_reconnect(guild.clone(), info.id, record.self_mute, record.self_deaf);
            }
            None => {
                tracing::warn!(corr = %corr, "Cannot reconnect, channel no longer available");
                self.cleanup_guild_state(guild);
            }
        }
    }

    /// Arm (or defer) the next reconnect attempt for a guild.
    pub(crate) fn schedule_reconnect(
        self: &Arc<Self>,
        guild: GuildId,
        channel: ChannelId,
        self_mute: bool,
        self_deaf: bool,
    ) {
        if self.shutdown.is_shutting_down() {
            return;
        }

        let corr = self.correlation(&guild);

        match self.breaker_decision(&guild) {
            CircuitDecision::Permit => {}
            CircuitDecision::Defer(remaining) => {
                // Not abandoned: re-check once the breaker could be half-open.
                let floor = Duration::from_millis(self.config.reconnect.breaker_recheck_floor_ms);
                let delay = (remaining + Duration::from_secs(1)).max(floor);

                let weak = Arc::downgrade(self);
                let g = guild.clone();
                let timer = CancellableTimer::start(delay, async move {
                    let Some(sup) = weak.upgrade() else { return };
                    if let Some((_, t)) = sup.registry.reconnect_timers.remove(&g) {
                        t.disarm();
                    }
                    sup.schedule_reconnect(g, channel, self_mute, self_deaf);
                });
                self.registry.reconnect_timers.insert(guild, timer);
                return;
            }
            CircuitDecision::Reject => return,
        }

        let attempts = self
            .registry
            .attempts
            .get(&guild)
            .map(|r| *r.value())
            .unwrap_or(0);
        if attempts >= self.config.reconnect.max_attempts {
            tracing::error!(corr = %corr, channel = %channel, "Max reconnect attempts reached");
            self.cleanup_guild_state(&guild);
            return;
        }
        self.registry.attempts.insert(guild.clone(), attempts + 1);
        self.set_state(&guild, ConnectionState::Reconnecting);

        let delay = resilience::reconnect_delay(attempts, &self.config.reconnect);
        tracing::info!(
            corr = %corr,
            attempt = attempts + 1,
            max = self.config.reconnect.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnect attempt scheduled"
        );
        metrics::record_reconnect_scheduled();

        let weak = Arc::downgrade(self);
        let g = guild.clone();
        let timer = CancellableTimer::start(delay, async move {
            let Some(sup) = weak.upgrade() else { return };
            // Fired: clear our own slot without aborting ourselves.
            if let Some((_, t)) = sup.registry.reconnect_timers.remove(&g) {
                t.disarm();
            }
            sup.handle_reconnect(g, channel, self_mute, self_deaf).await;
        });
        self.registry.reconnect_timers.insert(guild, timer);
    }

    async fn handle_reconnect(
        self: &Arc<Self>,
        guild: GuildId,
        channel: ChannelId,
        self_mute: bool,
        self_deaf: bool,
    ) {
        let corr = self.correlation(&guild);

        if self.shutdown.is_shutting_down() {
            tracing::info!(corr = %corr, "Not reconnecting, shutdown in progress");
            return;
        }

        let already_connected = self
            .registry
            .connections
            .get(&guild)
            .map(|r| r.value().channel_id == channel)
            .unwrap_or(false);
        if already_connected {
            tracing::debug!(corr = %corr, "Already connected to target channel, skipping reconnect");
            return;
        }

        let Some(info) = self.gateway.resolve_voice_channel(&channel) else {
            // The channel was deleted while we were backing off; this cycle
            // can never succeed and the persisted target is pointless now.
            tracing::warn!(corr = %corr, channel = %channel, "Channel no longer exists, abandoning reconnect");
            if let Some(store) = &self.store {
                if let Err(e) = store.delete_target(&guild).await {
                    tracing::warn!(corr = %corr, error = %e, "Failed to remove persisted voice target");
                }
            }
            self.cleanup_guild_state(&guild);
            return;
        };

        match self.join_inner(info, self_mute, self_deaf, false).await {
            Ok(record) => {
                tracing::info!(corr = %corr, channel = %record.channel_name, "Reconnected to voice channel");
                self.record_breaker_success(&guild);
                metrics::record_join("reconnect");
            }
            Err(e) => {
                tracing::error!(corr = %corr, error = %e, "Reconnect failed");
                self.record_breaker_failure(&guild);

                let attempts = self
                    .registry
                    .attempts
                    .get(&guild)
                    .map(|r| *r.value())
                    .unwrap_or(0);
                if attempts < self.config.reconnect.max_attempts {
                    self.schedule_reconnect(guild, channel, self_mute, self_deaf);
                } else {
                    tracing::error!(corr = %corr, "Max reconnect attempts exhausted");
                    self.cleanup_guild_state(&guild);
                }
            }
        }
    }
}
