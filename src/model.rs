//! Wire payloads exchanged with the gateway and forwarded to the node.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Snowflake = String;

/// Voice state update request, sent over the gateway to join or leave a
/// channel. `channel_id: None` means "leave".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceStateUpdate {
    pub guild_id: Snowflake,
    pub channel_id: Option<Snowflake>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

/// The gateway's acknowledgment of our own voice state, carrying the session
/// id the node needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceStateAck {
    pub user_id: Snowflake,
    pub guild_id: Snowflake,
    pub channel_id: Option<Snowflake>,
    pub session_id: String,
    #[serde(default)]
    pub self_mute: bool,
    #[serde(default)]
    pub self_deaf: bool,
}

/// A voice server assignment from the gateway.
///
/// Only `guild_id` is interpreted (it routes the payload to the right link);
/// everything else -- endpoint, token, whatever the gateway adds next year --
/// is kept opaque and handed to the node as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceServerUpdate {
    pub guild_id: Snowflake,
    #[serde(flatten)]
    pub event: Value,
}

impl VoiceServerUpdate {
    /// The complete payload as the gateway delivered it, for forwarding.
    pub fn to_value(&self) -> Value {
        let mut value = self.event.clone();
        if let Value::Object(map) = &mut value {
            map.insert("guild_id".into(), Value::String(self.guild_id.clone()));
        }
        value
    }
}
