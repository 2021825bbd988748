//! Connection state machine types.
//!
//! # States
//! - Idle: no connection, nothing scheduled
//! - Connecting: join in flight, membership not yet validated
//! - Connected: membership validated, heartbeat running
//! - Disconnecting: tearing down, explicit or drop-initiated
//! - Reconnecting: drop detected, backoff timer armed
//!
//! # State Transitions
//! ```text
//! Idle → Connecting: join request
//! Connecting → Connected: join validated against the roster
//! Connecting → Idle: join failed or validation timed out
//! Connected → Disconnecting: explicit disconnect or detected drop
//! Disconnecting → Reconnecting: target channel still resolvable
//! Disconnecting → Idle: explicit disconnect or channel gone
//! Reconnecting → Connecting: backoff fired and breaker permits
//! ```

use std::time::Instant;

use crate::gateway::{ChannelId, GuildId, VoiceHandle};

/// Connection lifecycle state for one guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Live voice connection bookkeeping for one guild.
///
/// A record exists in the connected registry iff the guild's state is
/// `Connected`.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub guild_id: GuildId,
    pub guild_name: String,
    pub channel_id: ChannelId,
    pub channel_name: String,
    /// Transport handle. `None` when membership was confirmed out-of-band
    /// after a failed connect call; the gateway owns that session.
    pub handle: Option<VoiceHandle>,
    pub self_mute: bool,
    pub self_deaf: bool,
    pub joined_at: Instant,
}
