//! Per-guild voice link: the connection record, the handshake, and teardown.
//!
//! A handshake has to correlate two independently-arriving gateway events --
//! the voice state acknowledgment (which carries the session id) and the voice
//! server assignment (endpoint + token) -- into a single credential, forward
//! it to the audio node, and report the node's verdict through the one
//! one-shot the caller is holding. A 15 second timer bounds the whole thing,
//! and teardown can cut in from either side at any point.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::LinkError;
use crate::gateway::Gateway;
use crate::model::{Snowflake, VoiceServerUpdate, VoiceStateAck, VoiceStateUpdate};
use crate::node::{Node, NodeMessage};
use crate::playback::Playback;

/// How long a handshake may wait for the node's acknowledgment.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Caller-supplied parameters for [`VoiceLink::connect`].
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub channel_id: Snowflake,
    pub self_mute: bool,
    pub self_deaf: bool,
}

/// What the connect one-shot resolves with on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub guild_id: Snowflake,
    pub channel_id: Option<Snowflake>,
    pub session_id: String,
}

pub type ConnectResult = Result<LinkInfo, LinkError>;

/// The single in-flight handshake attempt. Taken (and therefore resolved) at
/// most once; the timer is aborted whenever something else resolves first.
struct PendingConnect {
    tx: oneshot::Sender<ConnectResult>,
    timer: JoinHandle<()>,
    attempt: u64,
}

/// A merged credential staged under the lock, sent to the node without it.
struct StagedForward {
    session_id: String,
    server: VoiceServerUpdate,
    attempt: Option<u64>,
}

struct LinkInner {
    user_id: Option<Snowflake>,
    channel_id: Option<Snowflake>,
    self_mute: bool,
    self_deaf: bool,
    session_id: Option<String>,
    last_server_update: Option<VoiceServerUpdate>,
    // Dedup for the forward step: the node sees each (session, server) pair once.
    last_forwarded: Option<(String, VoiceServerUpdate)>,
    state: LinkState,
    pending: Option<PendingConnect>,
    attempts: u64,
}

/// One guild-scoped voice link. Cheap to clone; all clones share the same
/// record behind a mutex, which is what serializes every state transition.
#[derive(Clone)]
pub struct VoiceLink {
    guild_id: Snowflake,
    shard_id: u64,
    inner: Arc<Mutex<LinkInner>>,
    gateway: Arc<dyn Gateway>,
    node: Arc<dyn Node>,
    playback: Arc<dyn Playback>,
}

impl VoiceLink {
    pub fn new(
        guild_id: impl Into<Snowflake>,
        shard_id: u64,
        gateway: Arc<dyn Gateway>,
        node: Arc<dyn Node>,
        playback: Arc<dyn Playback>,
    ) -> Self {
        Self {
            guild_id: guild_id.into(),
            shard_id,
            inner: Arc::new(Mutex::new(LinkInner {
                user_id: None,
                channel_id: None,
                self_mute: false,
                self_deaf: false,
                session_id: None,
                last_server_update: None,
                last_forwarded: None,
                state: LinkState::Disconnected,
                pending: None,
                attempts: 0,
            })),
            gateway,
            node,
            playback,
        }
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    pub fn shard_id(&self) -> u64 {
        self.shard_id
    }

    pub async fn state(&self) -> LinkState {
        self.inner.lock().await.state
    }

    pub async fn channel_id(&self) -> Option<Snowflake> {
        self.inner.lock().await.channel_id.clone()
    }

    pub async fn session_id(&self) -> Option<String> {
        self.inner.lock().await.session_id.clone()
    }

    pub async fn user_id(&self) -> Option<Snowflake> {
        self.inner.lock().await.user_id.clone()
    }

    /// Start a handshake towards `options.channel_id`.
    ///
    /// Returns immediately; the outcome arrives exactly once on the returned
    /// one-shot. Invalid arguments and a handshake already in flight resolve
    /// the one-shot synchronously without touching the link -- in particular
    /// a concurrent `connect` never disturbs the attempt that got there first.
    pub async fn connect(&self, options: ConnectOptions) -> oneshot::Receiver<ConnectResult> {
        let (tx, rx) = oneshot::channel();
        if options.channel_id.is_empty() {
            let _ = tx.send(Err(LinkError::InvalidArgument("channel_id")));
            return rx;
        }

        let mut inner = self.inner.lock().await;
        if inner.state == LinkState::Connecting {
            let _ = tx.send(Err(LinkError::AlreadyConnecting));
            return rx;
        }

        inner.attempts += 1;
        let attempt = inner.attempts;
        let timer = tokio::spawn({
            let link = self.clone();
            async move {
                tokio::time::sleep(CONNECT_TIMEOUT).await;
                link.expire_handshake(attempt).await;
            }
        });
        inner.pending = Some(PendingConnect { tx, timer, attempt });
        inner.state = LinkState::Connecting;
        inner.channel_id = Some(options.channel_id.clone());
        inner.self_mute = options.self_mute;
        inner.self_deaf = options.self_deaf;
        // Credentials from an earlier session don't count towards this attempt.
        inner.session_id = None;
        inner.last_server_update = None;
        inner.last_forwarded = None;
        drop(inner);

        debug!("guild {}: handshake {} started", self.guild_id, attempt);

        let update = VoiceStateUpdate {
            guild_id: self.guild_id.clone(),
            channel_id: Some(options.channel_id),
            self_mute: options.self_mute,
            self_deaf: options.self_deaf,
        };
        // Fire-and-forget: from here on, correctness rides on the gateway
        // events coming back (or the timer firing).
        if let Err(e) = self.gateway.send_voice_state_update(self.shard_id, update).await {
            warn!("guild {}: voice state update not sent: {}", self.guild_id, e);
        }

        rx
    }

    /// Merge the gateway's voice state acknowledgment into the record.
    ///
    /// Also re-attempts the forward step: if the server assignment landed
    /// first, the session id arriving here is what completes the credential.
    pub async fn apply_voice_state(&self, ack: VoiceStateAck) {
        let mut inner = self.inner.lock().await;
        inner.user_id = Some(ack.user_id);
        inner.channel_id = ack.channel_id;
        inner.self_mute = ack.self_mute;
        inner.self_deaf = ack.self_deaf;
        inner.session_id = Some(ack.session_id);
        let staged = Self::stage_forward(&mut inner);
        drop(inner);
        if let Some(staged) = staged {
            self.forward(staged).await;
        }
    }

    /// Store a voice server assignment and forward the merged credential.
    ///
    /// Stored unconditionally: the gateway also delivers these mid-session on
    /// region moves, in which case the forward is a silent background resync
    /// rather than part of a handshake.
    pub async fn apply_server_update(&self, update: VoiceServerUpdate) {
        let mut inner = self.inner.lock().await;
        inner.last_server_update = Some(update);
        let staged = Self::stage_forward(&mut inner);
        drop(inner);
        if let Some(staged) = staged {
            self.forward(staged).await;
        }
    }

    /// Decide, under the lock, whether a merged credential is ready to go
    /// out. `attempt` pins the handshake the credential belongs to, if one
    /// was pending at staging time.
    fn stage_forward(inner: &mut LinkInner) -> Option<StagedForward> {
        let (session_id, server) = match (&inner.session_id, &inner.last_server_update) {
            (Some(session), Some(server)) => (session.clone(), server.clone()),
            _ => return None,
        };
        let pair = (session_id.clone(), server.clone());
        if inner.last_forwarded.as_ref() == Some(&pair) {
            return None;
        }
        inner.last_forwarded = Some(pair);
        Some(StagedForward {
            session_id,
            server,
            attempt: inner.pending.as_ref().map(|p| p.attempt),
        })
    }

    /// Send a staged credential to the node and apply its verdict.
    ///
    /// The lock is released for the duration of the send so the handshake
    /// timer (or a teardown) can cut in while the node is slow. The verdict
    /// only lands if the staging attempt's pending slot is still live; a
    /// node response arriving after the attempt resolved is discarded.
    async fn forward(&self, staged: StagedForward) {
        let message = NodeMessage::VoiceUpdate {
            guild_id: self.guild_id.clone(),
            session_id: staged.session_id.clone(),
            event: staged.server.to_value(),
        };
        let result = self.node.send(message).await;

        let mut inner = self.inner.lock().await;
        let live = staged.attempt.is_some()
            && inner.pending.as_ref().map(|p| p.attempt) == staged.attempt;
        match result {
            Ok(()) => {
                if live {
                    inner.state = LinkState::Connected;
                    debug!("guild {}: node acknowledged, link up", self.guild_id);
                    let info = LinkInfo {
                        guild_id: self.guild_id.clone(),
                        channel_id: inner.channel_id.clone(),
                        session_id: staged.session_id,
                    };
                    Self::resolve_pending(&mut inner, Ok(info));
                }
                // Otherwise a region-move resync, or an attempt that already
                // resolved mid-send; nobody is waiting.
            }
            Err(e) => {
                if live {
                    inner.state = LinkState::Disconnected;
                    Self::resolve_pending(&mut inner, Err(LinkError::NodeRejected(e.to_string())));
                } else if staged.attempt.is_none() {
                    // The link stays up; the consumer owns recovery.
                    warn!("guild {}: node error on established link: {}", self.guild_id, e);
                    self.playback
                        .voice_close(&self.guild_id, LinkError::VoiceClosed(e.to_string()));
                }
            }
        }
    }

    async fn expire_handshake(&self, attempt: u64) {
        let mut inner = self.inner.lock().await;
        // A stale timer must never touch a newer handshake.
        if inner.pending.as_ref().map(|p| p.attempt) != Some(attempt) {
            return;
        }
        warn!("guild {}: handshake {} timed out", self.guild_id, attempt);
        inner.state = LinkState::Disconnected;
        Self::resolve_pending(&mut inner, Err(LinkError::HandshakeTimeout));
    }

    /// Resolve the pending handshake exactly once. A second call finds the
    /// slot empty and does nothing, which is what makes the timer and the
    /// node's verdict mutually exclusive.
    fn resolve_pending(inner: &mut LinkInner, result: ConnectResult) {
        if let Some(pending) = inner.pending.take() {
            pending.timer.abort();
            let _ = pending.tx.send(result);
        }
    }

    /// Tear the link down. Idempotent: callable from any state, and the
    /// leave/destroy side effects go out at most once.
    ///
    /// A handshake still in flight resolves with [`LinkError::Cancelled`]
    /// rather than being left to its timer.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        // Disconnecting means another teardown already owns the side effects.
        let teardown = !matches!(
            inner.state,
            LinkState::Disconnected | LinkState::Disconnecting
        );
        if teardown {
            inner.state = LinkState::Disconnecting;
        }
        Self::resolve_pending(&mut inner, Err(LinkError::Cancelled));

        self.playback.detach_listeners(&self.guild_id);
        self.playback.clear_track(&self.guild_id);
        self.playback.clear_player(&self.guild_id);

        inner.session_id = None;
        inner.channel_id = None;
        inner.last_server_update = None;
        inner.last_forwarded = None;
        let leave = VoiceStateUpdate {
            guild_id: self.guild_id.clone(),
            channel_id: None,
            self_mute: inner.self_mute,
            self_deaf: inner.self_deaf,
        };
        drop(inner);

        if teardown {
            // Best-effort, and off the lock: node unavailability must not
            // block teardown, and a slow adapter must not wedge the link.
            if let Err(e) = self.node.send(NodeMessage::Destroy { guild_id: self.guild_id.clone() }).await {
                debug!("guild {}: destroy ignored: {}", self.guild_id, e);
            }
            if let Err(e) = self.gateway.send_voice_state_update(self.shard_id, leave).await {
                warn!("guild {}: leave update not sent: {}", self.guild_id, e);
            }
            let mut inner = self.inner.lock().await;
            // A new handshake may have started while the sends were out.
            if inner.state == LinkState::Disconnecting {
                inner.state = LinkState::Disconnected;
            }
            debug!("guild {}: disconnected", self.guild_id);
        }
    }

    /// The audio node itself dropped, independent of guild-level teardown.
    /// Leaves the voice channel and tells the playback layer why.
    pub async fn on_node_disconnected(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = LinkState::Disconnected;
        Self::resolve_pending(&mut inner, Err(LinkError::Cancelled));
        inner.session_id = None;
        inner.last_server_update = None;
        inner.last_forwarded = None;
        let leave = VoiceStateUpdate {
            guild_id: self.guild_id.clone(),
            channel_id: None,
            self_mute: inner.self_mute,
            self_deaf: inner.self_deaf,
        };
        inner.channel_id = None;
        drop(inner);

        if let Err(e) = self.gateway.send_voice_state_update(self.shard_id, leave).await {
            warn!("guild {}: leave update not sent: {}", self.guild_id, e);
        }
        self.playback.node_disconnect(&self.guild_id);
    }

    /// The voice subsystem unilaterally dropped us from the channel.
    pub async fn on_voice_server_gone(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = LinkState::Disconnected;
        Self::resolve_pending(&mut inner, Err(LinkError::Cancelled));
        drop(inner);

        if let Err(e) = self.node.send(NodeMessage::Destroy { guild_id: self.guild_id.clone() }).await {
            debug!("guild {}: destroy ignored: {}", self.guild_id, e);
        }
    }
}
