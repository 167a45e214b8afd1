//! Playback layer boundary.

use crate::error::LinkError;

/// Everything the link tells the audio consumer sitting on top of it.
///
/// One sink serves every link, so each call carries the guild id. The clear
/// methods run during teardown regardless of link state; the two notification
/// methods are informational and must not block.
pub trait Playback: Send + Sync {
    /// Stop any listeners or side-effect sources feeding this guild's player.
    fn detach_listeners(&self, guild_id: &str);

    fn clear_track(&self, guild_id: &str);

    fn clear_player(&self, guild_id: &str);

    /// The node reported a failure on an established link. The link itself
    /// stays connected; recovery is the consumer's call.
    fn voice_close(&self, guild_id: &str, error: LinkError);

    /// The audio node dropped out from under this guild's link.
    fn node_disconnect(&self, guild_id: &str);
}
