//! Persisted voice target storage.
//!
//! # Responsibilities
//! - Remember which channel each guild should occupy across restarts
//! - Hand the supervisor all enabled targets on startup
//!
//! # Design Decisions
//! - The store is a collaborator trait; the schema behind it is not this
//!   crate's concern
//! - A JSON file implementation ships as the default backend
//! - Persistence failures never fail the voice operation that triggered them

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::{ChannelId, GuildId};

pub mod file;

pub use file::FileTargetStore;

/// Persisted voice target for one guild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceTarget {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    /// Auto-join enabled. Disabled targets are kept but not restored.
    pub enabled: bool,
    pub self_mute: bool,
    pub self_deaf: bool,
}

/// Errors surfaced by a target store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Persistence collaborator.
#[async_trait]
pub trait VoiceTargetStore: Send + Sync {
    /// All targets with the enabled flag set.
    async fn load_all_enabled(&self) -> Result<Vec<VoiceTarget>, StoreError>;

    /// Upsert the target for `target.guild_id`.
    async fn save_target(&self, target: &VoiceTarget) -> Result<(), StoreError>;

    /// Flip the enabled flag for a guild. Returns false when no target exists.
    async fn set_enabled(&self, guild: &GuildId, enabled: bool) -> Result<bool, StoreError>;

    /// Remove the target for a guild. Returns false when no target existed.
    async fn delete_target(&self, guild: &GuildId) -> Result<bool, StoreError>;
}
