//! Voice connection supervisor.
//!
//! # Architecture Overview
//!
//! ```text
//!   command layer                     gateway events
//!        │                                 │
//!        ▼                                 ▼
//!  join / disconnect             handle_voice_state_update
//!        │                                 │
//!        ▼                                 ▼
//!  ┌──────────────┐  drop detected  ┌──────────────┐
//!  │ state machine│◀───────────────▶│ drop handler │
//!  │  (per guild) │                 └──────┬───────┘
//!  └──────┬───────┘                        │
//!         │ validated join                 ▼
//!         ▼                        ┌──────────────┐   gate   ┌─────────┐
//!  ┌──────────────┐   mismatch x3  │  reconnect   │◀────────▶│ circuit │
//!  │  heartbeat   │───────────────▶│  scheduler   │          │ breaker │
//!  └──────────────┘                └──────┬───────┘          └─────────┘
//!                                         │ backoff timer
//!                                         ▼
//!                                    join (again)
//! ```
//!
//! # Design Decisions
//! - One registry struct holds every per-guild map; all of a guild's state is
//!   mutated only from that guild's own task chain (join call, heartbeat
//!   task, reconnect timer), so the maps need no extra locking discipline
//! - Every background task is held through an abort-on-drop guard; cleanup
//!   paths remove the guard and the task dies with it
//! - Background task failures are logged, never propagated; the command
//!   layer gets typed results from `join`/`disconnect` only

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::SupervisorConfig;
use crate::gateway::{
    ChannelId, ChannelInfo, GatewayError, GuildId, VoiceGateway, VoiceStateEvent,
};
use crate::lifecycle::{CancellableTimer, Shutdown, TaskGuard};
use crate::observability::metrics;
use crate::persistence::{VoiceTarget, VoiceTargetStore};
use crate::resilience::{CircuitBreaker, CircuitDecision, CircuitState};

pub mod connection;
pub mod heartbeat;
pub mod reconnect;
pub mod status;

pub use connection::{ConnectionRecord, ConnectionState};
pub use status::ConnectionStatus;

/// Why a join failed.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("channel {0} is not a joinable voice channel")]
    InvalidChannel(ChannelId),

    #[error("supervisor is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("voice membership was never confirmed")]
    ValidationTimeout,
}

/// Every per-guild map in one place. A guild appearing in none of these maps
/// is fully idle; cleanup must return it to that state.
#[derive(Default)]
struct Registry {
    connections: DashMap<GuildId, ConnectionRecord>,
    states: DashMap<GuildId, ConnectionState>,
    breakers: DashMap<GuildId, CircuitBreaker>,
    attempts: DashMap<GuildId, u32>,
    heartbeat_failures: DashMap<GuildId, u32>,
    stable_since: DashMap<GuildId, Instant>,
    correlation: DashMap<GuildId, Uuid>,
    heartbeats: DashMap<GuildId, TaskGuard>,
    reconnect_timers: DashMap<GuildId, CancellableTimer>,
}

/// Supervisor for voice channel connections with reconnection logic.
pub struct VoiceSupervisor {
    gateway: Arc<dyn VoiceGateway>,
    store: Option<Arc<dyn VoiceTargetStore>>,
    config: SupervisorConfig,
    shutdown: Arc<Shutdown>,
    registry: Registry,
    event_pump: Mutex<Option<TaskGuard>>,
}

impl VoiceSupervisor {
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        store: Option<Arc<dyn VoiceTargetStore>>,
        config: SupervisorConfig,
        shutdown: Arc<Shutdown>,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            store,
            config,
            shutdown,
            registry: Registry::default(),
            event_pump: Mutex::new(None),
        })
    }

    /// Start listening for gateway voice events and restore any persisted
    /// targets whose channel still exists. Targets pointing at deleted
    /// channels are removed from the store.
    pub async fn initialize(self: &Arc<Self>) {
        self.spawn_event_pump();

        let Some(store) = self.store.clone() else {
            tracing::info!("No persistence store attached, voice targets will not persist");
            return;
        };

        let targets = match store.load_all_enabled().await {
            Ok(targets) => targets,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load persisted voice targets");
                return;
            }
        };

        for target in targets {
            match self.gateway.resolve_voice_channel(&target.channel_id) {
                Some(info) => {
                    let corr = self.reset_correlation(&target.guild_id);
                    tracing::info!(corr = %corr, channel = %info.name, "Restoring voice connection");
                    match self.join_inner(info, target.self_mute, target.self_deaf, false).await {
                        Ok(_) => metrics::record_join("restore"),
                        Err(e) => tracing::warn!(
                            guild = %target.guild_id,
                            error = %e,
                            "Failed to restore voice connection"
                        ),
                    }
                }
                None => {
                    tracing::warn!(
                        guild = %target.guild_id,
                        channel = %target.channel_id,
                        "Voice channel no longer exists, removing persisted target"
                    );
                    if let Err(e) = store.delete_target(&target.guild_id).await {
                        tracing::warn!(error = %e, "Failed to remove persisted voice target");
                    }
                }
            }
        }
    }

    /// Join a voice channel and stay there.
    ///
    /// Joining the channel the guild is already connected to returns the
    /// existing record without touching the transport. Joining a different
    /// channel disconnects from the old one first.
    pub async fn join(
        self: &Arc<Self>,
        channel: &ChannelId,
        self_mute: bool,
        self_deaf: bool,
    ) -> Result<ConnectionRecord, JoinError> {
        let Some(info) = self.gateway.resolve_voice_channel(channel) else {
            tracing::error!(channel = %channel, "Not a joinable voice channel");
            return Err(JoinError::InvalidChannel(channel.clone()));
        };

        let record = self.join_inner(info, self_mute, self_deaf, true).await?;
        metrics::record_join("fresh");
        Ok(record)
    }

    pub(crate) async fn join_inner(
        self: &Arc<Self>,
        info: ChannelInfo,
        self_mute: bool,
        self_deaf: bool,
        persist: bool,
    ) -> Result<ConnectionRecord, JoinError> {
        if self.shutdown.is_shutting_down() {
            return Err(JoinError::ShuttingDown);
        }

        let guild = info.guild_id.clone();

        let existing = self
            .registry
            .connections
            .get(&guild)
            .map(|r| r.value().clone());
        if let Some(record) = &existing {
            if record.channel_id == info.id {
                tracing::warn!(
                    guild = %guild,
                    channel = %record.channel_name,
                    "Already connected to requested channel"
                );
                return Ok(record.clone());
            }
        }

        if existing.is_some() {
            // Connected elsewhere in this guild; leave before rejoining.
            self.disconnect(&guild, false).await;
            tokio::time::sleep(Duration::from_millis(self.config.join.rejoin_pause_ms)).await;
        }

        // New attempt sequence, new correlation id.
        let corr = self.reset_correlation(&guild);
        self.set_state(&guild, ConnectionState::Connecting);

        tracing::info!(corr = %corr, guild = %guild, channel = %info.name, "Joining voice channel");

        let propagation = Duration::from_millis(self.config.join.propagation_delay_ms);

        let handle = match self.gateway.connect(&info.id, self_mute, self_deaf).await {
            Ok(handle) => Some(handle),
            Err(e) if e.is_transient() => {
                // The connect call can fail while the membership is actually
                // established; believe the roster, not the call.
                tracing::warn!(
                    corr = %corr,
                    error = %e,
                    "Connect call failed, checking roster before giving up"
                );
                tokio::time::sleep(propagation).await;
                if self.validate_membership(&guild, &info.id).await {
                    tracing::info!(corr = %corr, "Voice membership confirmed despite connect error");
                    None
                } else {
                    self.set_state(&guild, ConnectionState::Idle);
                    return Err(JoinError::Gateway(e));
                }
            }
            Err(e) => {
                tracing::error!(corr = %corr, error = %e, "Failed to join voice channel");
                self.set_state(&guild, ConnectionState::Idle);
                return Err(JoinError::Gateway(e));
            }
        };

        if let Some(handle) = handle {
            tracing::info!(corr = %corr, "Waiting for voice state to propagate");
            tokio::time::sleep(propagation).await;

            if !self.validate_membership(&guild, &info.id).await {
                tracing::warn!(corr = %corr, "Connection did not become ready in time");
                if let Err(e) = self.gateway.disconnect(handle).await {
                    tracing::debug!(corr = %corr, error = %e, "Teardown after failed validation");
                }
                self.set_state(&guild, ConnectionState::Idle);
                return Err(JoinError::ValidationTimeout);
            }
        }

        let record = ConnectionRecord {
            guild_id: guild.clone(),
            guild_name: info.guild_name,
            channel_id: info.id,
            channel_name: info.name,
            handle,
            self_mute,
            self_deaf,
            joined_at: Instant::now(),
        };

        self.registry.connections.insert(guild.clone(), record.clone());
        self.registry.stable_since.insert(guild.clone(), Instant::now());
        self.set_state(&guild, ConnectionState::Connected);
        metrics::record_active_connections(self.registry.connections.len());

        if persist {
            if let Some(store) = &self.store {
                let target = VoiceTarget {
                    guild_id: guild.clone(),
                    channel_id: record.channel_id.clone(),
                    enabled: true,
                    self_mute,
                    self_deaf,
                };
                if let Err(e) = store.save_target(&target).await {
                    tracing::warn!(corr = %corr, error = %e, "Failed to persist voice target");
                }
            }
        }

        tracing::info!(corr = %corr, channel = %record.channel_name, "Joined voice channel");
        self.start_heartbeat(guild);

        Ok(record)
    }

    /// Confirm the guild's roster entry points at `expected`, retrying while
    /// voice state propagates. This is the authoritative success check for a
    /// join; the connect call's return value alone is not trusted.
    pub(crate) async fn validate_membership(&self, guild: &GuildId, expected: &ChannelId) -> bool {
        let attempts = self.config.join.validation_attempts.max(1);
        let retry = Duration::from_millis(self.config.join.validation_retry_ms);

        for attempt in 1..=attempts {
            match self.gateway.own_voice_channel(guild).await {
                Ok(actual) => {
                    if actual.as_ref() == Some(expected) {
                        return true;
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        guild = %guild,
                        attempt,
                        error = %e,
                        "Membership validation attempt failed"
                    );
                }
            }
            if attempt < attempts {
                tokio::time::sleep(retry).await;
            }
        }

        false
    }

    /// Disconnect from the guild's voice channel.
    ///
    /// Cancels any pending reconnect, stops the heartbeat and clears all
    /// per-guild bookkeeping. Returns false when no live connection existed;
    /// an in-flight reconnect cycle is still torn down in that case.
    pub async fn disconnect(&self, guild: &GuildId, remove_persisted: bool) -> bool {
        let record = self
            .registry
            .connections
            .get(guild)
            .map(|r| r.value().clone());
        let Some(record) = record else {
            if self.has_group_state(guild) {
                self.cleanup_guild_state(guild);
            }
            return false;
        };

        let corr = self.correlation(guild);
        self.set_state(guild, ConnectionState::Disconnecting);
        self.stop_heartbeat(guild);
        self.clear_reconnect_timer(guild);

        if let Some(handle) = record.handle {
            if let Err(e) = self.gateway.disconnect(handle).await {
                tracing::warn!(corr = %corr, error = %e, "Transport disconnect failed");
            }
        }

        if remove_persisted {
            if let Some(store) = &self.store {
                if let Err(e) = store.delete_target(guild).await {
                    tracing::warn!(corr = %corr, error = %e, "Failed to remove persisted voice target");
                }
            }
        }

        tracing::info!(corr = %corr, channel = %record.channel_name, "Disconnected from voice channel");
        self.cleanup_guild_state(guild);
        true
    }

    /// Gateway notification that our own voice membership changed.
    ///
    /// Leaving voice entirely while a connection is recorded is a drop and
    /// enters the reconnect pipeline; channel-to-channel moves are only
    /// logged.
    pub async fn handle_voice_state_update(self: &Arc<Self>, event: VoiceStateEvent) {
        let guild = event.guild_id.clone();

        tracing::info!(
            guild = %guild,
            old = event.old_channel.as_ref().map(|c| c.0.as_str()).unwrap_or("null"),
            new = event.new_channel.as_ref().map(|c| c.0.as_str()).unwrap_or("null"),
            "Voice state update"
        );

        if event.old_channel.is_some() && event.new_channel.is_none() {
            let channel_name = self
                .registry
                .connections
                .get(&guild)
                .map(|r| r.value().channel_name.clone());
            if let Some(name) = channel_name {
                let corr = self.correlation(&guild);
                tracing::warn!(corr = %corr, channel = %name, "Detected disconnect from voice channel");
                self.handle_drop(&guild, "voice_state_update").await;
            }
        } else if let (Some(old), Some(new)) = (&event.old_channel, &event.new_channel) {
            if old != new {
                tracing::info!(guild = %guild, from = %old, to = %new, "Voice channel moved");
            }
        }
    }

    /// Shut down the supervisor.
    ///
    /// With `disconnect` set the transport sessions are closed; without it
    /// they are left standing for a planned restart to pick up. Either way
    /// every timer and heartbeat stops and all registries empty out.
    pub async fn shutdown(&self, disconnect: bool) {
        tracing::info!("Cleaning up voice connections");
        self.shutdown.trigger();

        let records: Vec<ConnectionRecord> = self
            .registry
            .connections
            .iter()
            .map(|r| r.value().clone())
            .collect();

        if disconnect {
            for record in records {
                let corr = self.correlation(&record.guild_id);
                tracing::info!(corr = %corr, channel = %record.channel_name, "Disconnecting from voice channel");
                self.stop_heartbeat(&record.guild_id);
                self.clear_reconnect_timer(&record.guild_id);
                if let Some(handle) = record.handle {
                    if let Err(e) = self.gateway.disconnect(handle).await {
                        tracing::debug!(corr = %corr, error = %e, "Error during disconnect");
                    }
                }
            }
        } else {
            for record in &records {
                self.stop_heartbeat(&record.guild_id);
                self.clear_reconnect_timer(&record.guild_id);
            }
            tracing::info!("Voice state preserved for planned restart");
        }

        self.registry.heartbeats.clear();
        self.registry.reconnect_timers.clear();
        self.registry.connections.clear();
        self.registry.states.clear();
        self.registry.breakers.clear();
        self.registry.attempts.clear();
        self.registry.heartbeat_failures.clear();
        self.registry.stable_since.clear();
        self.registry.correlation.clear();
        metrics::record_active_connections(0);

        tracing::info!("Voice connection cleanup complete");
    }

    // --- Introspection ---

    /// Current state for a guild; `Idle` when nothing is tracked.
    pub fn connection_state(&self, guild: &GuildId) -> ConnectionState {
        self.registry
            .states
            .get(guild)
            .map(|r| *r.value())
            .unwrap_or_default()
    }

    /// Whether the guild has a validated, live connection.
    pub fn is_connected(&self, guild: &GuildId) -> bool {
        self.registry.connections.contains_key(guild)
            && self.connection_state(guild) == ConnectionState::Connected
    }

    /// Reconnect attempts consumed by the current cycle.
    pub fn reconnect_attempts(&self, guild: &GuildId) -> u32 {
        self.registry
            .attempts
            .get(guild)
            .map(|r| *r.value())
            .unwrap_or(0)
    }

    /// Circuit breaker state; `Closed` when no breaker exists yet.
    pub fn circuit_state(&self, guild: &GuildId) -> CircuitState {
        self.registry
            .breakers
            .get(guild)
            .map(|r| r.value().state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Whether any per-guild bookkeeping remains for `guild`. Cleanup paths
    /// leave this false.
    pub fn has_group_state(&self, guild: &GuildId) -> bool {
        self.registry.connections.contains_key(guild)
            || self.registry.states.contains_key(guild)
            || self.registry.breakers.contains_key(guild)
            || self.registry.attempts.contains_key(guild)
            || self.registry.heartbeat_failures.contains_key(guild)
            || self.registry.stable_since.contains_key(guild)
            || self.registry.correlation.contains_key(guild)
            || self.registry.heartbeats.contains_key(guild)
            || self.registry.reconnect_timers.contains_key(guild)
    }

    // --- Internal plumbing ---

    fn spawn_event_pump(self: &Arc<Self>) {
        let mut events = self.gateway.subscribe_voice_events();
        let mut shutdown_rx = self.shutdown.subscribe();
        let weak = Arc::downgrade(self);

        let guard = TaskGuard::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    event = events.recv() => match event {
                        Ok(event) => {
                            let Some(sup) = weak.upgrade() else { break };
                            sup.handle_voice_state_update(event).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Voice event stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        *self.event_pump.lock().unwrap() = Some(guard);
    }

    /// Record a state transition. No-op transitions are not logged.
    pub(crate) fn set_state(&self, guild: &GuildId, state: ConnectionState) {
        let old = self
            .registry
            .states
            .get(guild)
            .map(|r| *r.value())
            .unwrap_or_default();
        self.registry.states.insert(guild.clone(), state);

        if old != state {
            let corr = self.correlation(guild);
            tracing::info!(
                corr = %corr,
                guild = %guild,
                from = %old,
                to = %state,
                "Connection state transition"
            );
        }
    }

    /// Correlation id for the guild's current attempt sequence.
    pub(crate) fn correlation(&self, guild: &GuildId) -> Uuid {
        *self
            .registry
            .correlation
            .entry(guild.clone())
            .or_insert_with(Uuid::new_v4)
    }

    /// Start a new attempt sequence under a fresh correlation id.
    pub(crate) fn reset_correlation(&self, guild: &GuildId) -> Uuid {
        let corr = Uuid::new_v4();
        self.registry.correlation.insert(guild.clone(), corr);
        corr
    }

    fn with_breaker<T>(&self, guild: &GuildId, f: impl FnOnce(&mut CircuitBreaker) -> T) -> T {
        let mut entry = self.registry.breakers.entry(guild.clone()).or_insert_with(|| {
            CircuitBreaker::new(
                self.config.circuit_breaker.failure_threshold,
                Duration::from_millis(self.config.circuit_breaker.cooldown_ms),
            )
        });
        f(entry.value_mut())
    }

    pub(crate) fn record_breaker_failure(&self, guild: &GuildId) {
        let (transition, failures) =
            self.with_breaker(guild, |b| (b.record_failure(), b.failure_count()));

        if transition.is_some() {
            let corr = self.correlation(guild);
            tracing::warn!(corr = %corr, failures, "Circuit breaker opened");
            metrics::record_circuit_opened();
        }
    }

    pub(crate) fn record_breaker_success(&self, guild: &GuildId) {
        let transition = self.with_breaker(guild, |b| b.record_success());

        if transition.is_some() {
            let corr = self.correlation(guild);
            tracing::info!(corr = %corr, "Circuit breaker closed");
        }
    }

    pub(crate) fn breaker_decision(&self, guild: &GuildId) -> CircuitDecision {
        let (decision, state) = self.with_breaker(guild, |b| (b.evaluate(), b.state()));
        let corr = self.correlation(guild);

        match decision {
            CircuitDecision::Permit if state == CircuitState::HalfOpen => {
                tracing::info!(corr = %corr, "Circuit breaker half-open, allowing test request");
            }
            CircuitDecision::Defer(remaining) => {
                tracing::warn!(
                    corr = %corr,
                    cooldown_remaining_secs = remaining.as_secs(),
                    "Circuit breaker open, pausing reconnects"
                );
            }
            _ => {}
        }

        decision
    }

    pub(crate) fn clear_reconnect_timer(&self, guild: &GuildId) {
        self.registry.reconnect_timers.remove(guild);
    }

    /// Drop every trace of a guild: record, state, breaker, counters,
    /// correlation id, timers. The terminal step of every failure path.
    pub(crate) fn cleanup_guild_state(&self, guild: &GuildId) {
        self.registry.connections.remove(guild);
        self.registry.states.remove(guild);
        self.registry.breakers.remove(guild);
        self.registry.attempts.remove(guild);
        self.registry.stable_since.remove(guild);
        self.registry.correlation.remove(guild);
        self.clear_reconnect_timer(guild);
        self.stop_heartbeat(guild);
        metrics::record_active_connections(self.registry.connections.len());
    }
}
