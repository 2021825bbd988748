//! Platform gateway collaborator.
//!
//! # Responsibilities
//! - Open and tear down voice transport sessions
//! - Answer authoritative roster lookups ("which channel are we in?")
//! - Publish own-voice-state change notifications
//!
//! # Design Decisions
//! - The supervisor never talks to the platform directly; everything goes
//!   through this trait so the transport can be swapped or mocked
//! - Roster lookups must reflect current state, not a cached join result
//! - Events are a broadcast channel; slow consumers lag rather than block

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Identifier of a guild. One guild holds at most one voice connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuildId(pub String);

impl std::fmt::Display for GuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GuildId {
    fn from(val: &str) -> Self {
        Self(val.to_string())
    }
}

/// Identifier of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(val: &str) -> Self {
        Self(val.to_string())
    }
}

/// Metadata for a resolved voice channel.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub guild_id: GuildId,
    pub guild_name: String,
}

/// Own-voice-membership change reported by the gateway.
///
/// `old_channel` present and `new_channel` absent means the bot left (or was
/// removed from) voice entirely.
#[derive(Debug, Clone)]
pub struct VoiceStateEvent {
    pub guild_id: GuildId,
    pub old_channel: Option<ChannelId>,
    pub new_channel: Option<ChannelId>,
}

/// Errors surfaced by the gateway.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The connect call timed out before the transport handshake finished.
    #[error("voice connect timed out")]
    Timeout,

    /// The underlying transport dropped or refused the connection.
    #[error("voice transport error: {0}")]
    Connection(String),

    /// Roster lookup failed (member fetch error, cache miss, rate limit).
    #[error("roster lookup failed: {0}")]
    Roster(String),

    /// Anything else the platform reports.
    #[error("gateway error: {0}")]
    Other(String),
}

impl GatewayError {
    /// True for errors where the voice state may nonetheless have been
    /// established on the platform side. The connect call can report a
    /// timeout while the membership is already live.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connection(_))
    }
}

/// Opaque handle to an established voice transport session.
///
/// Absent from a [`ConnectionRecord`](crate::supervisor::ConnectionRecord)
/// when the membership was confirmed out-of-band after a failed connect call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceHandle(pub u64);

/// Voice transport collaborator.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Resolve a channel id to voice channel metadata. Returns `None` when
    /// the channel does not exist or is not a voice channel.
    fn resolve_voice_channel(&self, channel: &ChannelId) -> Option<ChannelInfo>;

    /// Open a voice transport session to `channel`.
    async fn connect(
        &self,
        channel: &ChannelId,
        self_mute: bool,
        self_deaf: bool,
    ) -> Result<VoiceHandle, GatewayError>;

    /// Tear down a previously opened session.
    async fn disconnect(&self, handle: VoiceHandle) -> Result<(), GatewayError>;

    /// The channel the bot currently occupies in `guild` according to the
    /// platform's authoritative roster, `None` when not in voice.
    async fn own_voice_channel(&self, guild: &GuildId) -> Result<Option<ChannelId>, GatewayError>;

    /// Subscribe to own-voice-state change notifications.
    fn subscribe_voice_events(&self) -> broadcast::Receiver<VoiceStateEvent>;
}
