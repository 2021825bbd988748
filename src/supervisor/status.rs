//! Status reporting for the command layer.

use std::time::Duration;

use uuid::Uuid;

use crate::gateway::{ChannelId, GuildId};
use crate::supervisor::{ConnectionState, VoiceSupervisor};

/// Point-in-time view of one guild's connection.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub guild_id: GuildId,
    pub guild_name: String,
    pub channel_id: ChannelId,
    pub channel_name: String,
    pub state: ConnectionState,
    pub self_mute: bool,
    pub self_deaf: bool,
    pub connected_for: Duration,
    pub correlation_id: Uuid,
}

impl VoiceSupervisor {
    /// Status snapshot for a guild, `None` when no connection is recorded.
    pub fn get_connection_status(&self, guild: &GuildId) -> Option<ConnectionStatus> {
        let record = self
            .registry
            .connections
            .get(guild)
            .map(|r| r.value().clone())?;

        Some(ConnectionStatus {
            guild_id: record.guild_id,
            guild_name: record.guild_name,
            channel_id: record.channel_id,
            channel_name: record.channel_name,
            state: self.connection_state(guild),
            self_mute: record.self_mute,
            self_deaf: record.self_deaf,
            connected_for: record.joined_at.elapsed(),
            correlation_id: self.correlation(guild),
        })
    }

    /// Human-readable summary for one guild, or for every connection when
    /// `guild` is `None`.
    pub fn get_status(&self, guild: Option<&GuildId>) -> String {
        match guild {
            Some(guild) => match self.get_connection_status(guild) {
                None => "Voice status: not connected".to_string(),
                Some(status) => format!(
                    "Voice status: {}\nChannel: {}\nServer: {}\nSelf mute: {}\nSelf deaf: {}\nDuration: {}",
                    status.state,
                    status.channel_name,
                    status.guild_name,
                    yes_no(status.self_mute),
                    yes_no(status.self_deaf),
                    format_duration(status.connected_for),
                ),
            },
            None => {
                let mut lines: Vec<String> = self
                    .registry
                    .connections
                    .iter()
                    .map(|r| {
                        let record = r.value();
                        format!(
                            "{} - {} ({}) [{}]",
                            record.guild_name,
                            record.channel_name,
                            format_duration(record.joined_at.elapsed()),
                            self.connection_state(&record.guild_id),
                        )
                    })
                    .collect();

                if lines.is_empty() {
                    return "Voice status: no active connections".to_string();
                }

                lines.sort();
                format!(
                    "Voice status: {} active connection(s)\n{}",
                    lines.len(),
                    lines.join("\n")
                )
            }
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Format a duration as `1h 2m 3s`, dropping leading zero units.
pub(crate) fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
