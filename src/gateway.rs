//! Gateway adapter boundary.

use async_trait::async_trait;

use crate::error::LinkError;
use crate::model::VoiceStateUpdate;

/// The control channel that carries voice state updates to the platform.
///
/// Implementations encode the payload and ship it on the given shard's
/// connection. Delivery is fire-and-forget from the link's point of view; the
/// matching [`VoiceStateAck`](crate::model::VoiceStateAck) and
/// [`VoiceServerUpdate`](crate::model::VoiceServerUpdate) arrive later through
/// the routing methods on [`LinkRegistry`](crate::registry::LinkRegistry).
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send_voice_state_update(
        &self,
        shard_id: u64,
        update: VoiceStateUpdate,
    ) -> Result<(), LinkError>;
}
