//! Voicekeeper: a voice channel connection supervisor.
//!
//! Keeps a bot parked in one voice channel per guild on a Discord-style chat
//! platform, surviving gateway flaps, silent drops and channel churn. The
//! platform transport and the persistence backend are collaborators behind
//! traits; this crate owns the connection state machine, the reconnect
//! pipeline (exponential backoff gated by a per-guild circuit breaker) and a
//! heartbeat that checks the authoritative roster instead of trusting the
//! transport's event stream.

pub mod config;
pub mod gateway;
pub mod lifecycle;
pub mod observability;
pub mod persistence;
pub mod resilience;
pub mod supervisor;

pub use config::SupervisorConfig;
pub use gateway::{ChannelId, GuildId, VoiceGateway};
pub use lifecycle::Shutdown;
pub use supervisor::VoiceSupervisor;
