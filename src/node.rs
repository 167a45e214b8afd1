//! Audio node adapter boundary and its wire messages.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::LinkError;
use crate::model::Snowflake;

/// A message addressed to the audio node. The node connection is shared by
/// every link on it; each message carries its own guild id, so no ordering is
/// required between guilds.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum NodeMessage {
    /// The merged session + server credential for one guild.
    VoiceUpdate {
        guild_id: Snowflake,
        session_id: String,
        event: Value,
    },
    /// Drop everything the node holds for the guild. Best-effort; the sender
    /// ignores failures.
    Destroy { guild_id: Snowflake },
}

#[async_trait]
pub trait Node: Send + Sync {
    async fn send(&self, message: NodeMessage) -> Result<(), LinkError>;
}
