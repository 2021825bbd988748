//! Shared harness for integration testing: a programmable mock gateway and
//! target store, plus a time-compressed configuration.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use voicekeeper::gateway::{
    ChannelId, ChannelInfo, GatewayError, GuildId, VoiceGateway, VoiceHandle, VoiceStateEvent,
};
use voicekeeper::persistence::{StoreError, VoiceTarget, VoiceTargetStore};
use voicekeeper::supervisor::VoiceSupervisor;
use voicekeeper::{Shutdown, SupervisorConfig};

/// Scripted outcome for an upcoming connect call. Unscripted calls succeed.
#[allow(dead_code)]
pub enum ConnectScript {
    /// Fail with a non-transient error.
    Fail,
    /// Fail with a transient error; membership is not established.
    FailTransient,
    /// Fail with a transient error, but the membership lands anyway.
    FailTransientButJoined,
}

/// In-memory voice gateway with a programmable roster.
pub struct MockGateway {
    channels: DashMap<ChannelId, ChannelInfo>,
    own_channel: DashMap<GuildId, ChannelId>,
    handles: DashMap<u64, GuildId>,
    scripted: Mutex<VecDeque<ConnectScript>>,
    pub connect_calls: AtomicU32,
    pub disconnect_calls: AtomicU32,
    /// When set, connect succeeds but the roster never reflects the join, so
    /// membership validation cannot pass.
    pub suppress_roster: AtomicBool,
    /// When set, roster lookups fail with a transient error.
    pub roster_errors: AtomicBool,
    next_handle: AtomicU64,
    events: broadcast::Sender<VoiceStateEvent>,
}

#[allow(dead_code)]
impl MockGateway {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            channels: DashMap::new(),
            own_channel: DashMap::new(),
            handles: DashMap::new(),
            scripted: Mutex::new(VecDeque::new()),
            connect_calls: AtomicU32::new(0),
            disconnect_calls: AtomicU32::new(0),
            suppress_roster: AtomicBool::new(false),
            roster_errors: AtomicBool::new(false),
            next_handle: AtomicU64::new(1),
            events,
        })
    }

    pub fn add_channel(&self, guild: &str, channel: &str) {
        self.channels.insert(
            ChannelId::from(channel),
            ChannelInfo {
                id: ChannelId::from(channel),
                name: format!("channel-{}", channel),
                guild_id: GuildId::from(guild),
                guild_name: format!("guild-{}", guild),
            },
        );
    }

    pub fn delete_channel(&self, channel: &str) {
        self.channels.remove(&ChannelId::from(channel));
    }

    pub fn script_connect(&self, script: ConnectScript) {
        self.scripted.lock().unwrap().push_back(script);
    }

    /// Simulate an external kick: roster cleared, event broadcast.
    pub fn kick_from_voice(&self, guild: &str) {
        let guild = GuildId::from(guild);
        let old = self.own_channel.remove(&guild).map(|(_, c)| c);
        let _ = self.events.send(VoiceStateEvent {
            guild_id: guild,
            old_channel: old,
            new_channel: None,
        });
    }

    /// Corrupt the roster without any event, as a silent drop would.
    pub fn set_own_channel(&self, guild: &str, channel: Option<&str>) {
        let guild = GuildId::from(guild);
        match channel {
            Some(c) => {
                self.own_channel.insert(guild, ChannelId::from(c));
            }
            None => {
                self.own_channel.remove(&guild);
            }
        }
    }

    pub fn connect_count(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> u32 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceGateway for MockGateway {
    fn resolve_voice_channel(&self, channel: &ChannelId) -> Option<ChannelInfo> {
        self.channels.get(channel).map(|r| r.value().clone())
    }

    async fn connect(
        &self,
        channel: &ChannelId,
        _self_mute: bool,
        _self_deaf: bool,
    ) -> Result<VoiceHandle, GatewayError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let info = self
            .channels
            .get(channel)
            .map(|r| r.value().clone())
            .ok_or_else(|| GatewayError::Other(format!("no such channel: {}", channel)))?;

        if let Some(script) = self.scripted.lock().unwrap().pop_front() {
            return match script {
                ConnectScript::Fail => Err(GatewayError::Other("scripted failure".into())),
                ConnectScript::FailTransient => Err(GatewayError::Timeout),
                ConnectScript::FailTransientButJoined => {
                    self.own_channel.insert(info.guild_id, channel.clone());
                    Err(GatewayError::Timeout)
                }
            };
        }

        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.handles.insert(id, info.guild_id.clone());
        if !self.suppress_roster.load(Ordering::SeqCst) {
            self.own_channel.insert(info.guild_id, channel.clone());
        }
        Ok(VoiceHandle(id))
    }

    async fn disconnect(&self, handle: VoiceHandle) -> Result<(), GatewayError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((_, guild)) = self.handles.remove(&handle.0) {
            self.own_channel.remove(&guild);
        }
        Ok(())
    }

    async fn own_voice_channel(&self, guild: &GuildId) -> Result<Option<ChannelId>, GatewayError> {
        if self.roster_errors.load(Ordering::SeqCst) {
            return Err(GatewayError::Roster("scripted lookup failure".into()));
        }
        Ok(self.own_channel.get(guild).map(|r| r.value().clone()))
    }

    fn subscribe_voice_events(&self) -> broadcast::Receiver<VoiceStateEvent> {
        self.events.subscribe()
    }
}

/// In-memory target store.
#[derive(Default)]
pub struct MockStore {
    pub targets: DashMap<GuildId, VoiceTarget>,
    pub fail_saves: AtomicBool,
}

#[allow(dead_code)]
impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, guild: &str, channel: &str, enabled: bool) {
        self.targets.insert(
            GuildId::from(guild),
            VoiceTarget {
                guild_id: GuildId::from(guild),
                channel_id: ChannelId::from(channel),
                enabled,
                self_mute: true,
                self_deaf: true,
            },
        );
    }

    pub fn contains(&self, guild: &str) -> bool {
        self.targets.contains_key(&GuildId::from(guild))
    }
}

#[async_trait]
impl VoiceTargetStore for MockStore {
    async fn load_all_enabled(&self) -> Result<Vec<VoiceTarget>, StoreError> {
        Ok(self
            .targets
            .iter()
            .filter(|r| r.value().enabled)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn save_target(&self, target: &VoiceTarget) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("scripted save failure".into()));
        }
        self.targets.insert(target.guild_id.clone(), target.clone());
        Ok(())
    }

    async fn set_enabled(&self, guild: &GuildId, enabled: bool) -> Result<bool, StoreError> {
        match self.targets.get_mut(guild) {
            Some(mut entry) => {
                entry.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_target(&self, guild: &GuildId) -> Result<bool, StoreError> {
        Ok(self.targets.remove(guild).is_some())
    }
}

/// Configuration with every interval compressed to test time scales.
#[allow(dead_code)]
pub fn fast_config() -> SupervisorConfig {
    let mut config = SupervisorConfig::default();
    config.join.propagation_delay_ms = 5;
    config.join.validation_attempts = 2;
    config.join.validation_retry_ms = 10;
    config.join.rejoin_pause_ms = 5;
    config.reconnect.base_delay_ms = 25;
    config.reconnect.max_delay_ms = 300;
    config.reconnect.multiplier = 1.5;
    config.reconnect.jitter = 0.0;
    config.reconnect.max_attempts = 5;
    config.reconnect.breaker_recheck_floor_ms = 50;
    config.circuit_breaker.failure_threshold = 5;
    config.circuit_breaker.cooldown_ms = 150;
    config.heartbeat.interval_ms = 60;
    config.heartbeat.max_failures = 3;
    config.heartbeat.stable_threshold_ms = 150;
    config
}

/// Fully wired supervisor over mocks.
#[allow(dead_code)]
pub struct Harness {
    pub gateway: Arc<MockGateway>,
    pub store: Arc<MockStore>,
    pub shutdown: Arc<Shutdown>,
    pub supervisor: Arc<VoiceSupervisor>,
}

#[allow(dead_code)]
pub fn harness(config: SupervisorConfig) -> Harness {
    let gateway = MockGateway::new();
    let store = MockStore::new();
    let shutdown = Arc::new(Shutdown::new());
    let supervisor = VoiceSupervisor::new(
        gateway.clone(),
        Some(store.clone() as Arc<dyn VoiceTargetStore>),
        config,
        shutdown.clone(),
    );
    Harness {
        gateway,
        store,
        shutdown,
        supervisor,
    }
}

/// Poll `cond` until it holds or `timeout_ms` elapses.
#[allow(dead_code)]
pub async fn wait_for<F: Fn() -> bool>(cond: F, timeout_ms: u64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
