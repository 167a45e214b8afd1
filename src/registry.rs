//! Guild-keyed registry that owns every live [`VoiceLink`].
//!
//! The registry is also where gateway deliveries enter the crate: the shard
//! reader feeds acknowledgments and server assignments here and they get
//! routed to the right link by guild id.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use tokio::sync::Mutex;

use crate::error::LinkError;
use crate::gateway::Gateway;
use crate::link::{ConnectOptions, LinkInfo, VoiceLink};
use crate::model::{Snowflake, VoiceServerUpdate, VoiceStateAck};
use crate::node::Node;
use crate::playback::Playback;

pub struct LinkRegistryBuilder {
    gateway: Option<Arc<dyn Gateway>>,
    node: Option<Arc<dyn Node>>,
    playback: Option<Arc<dyn Playback>>,
}

impl LinkRegistryBuilder {
    pub fn new() -> Self {
        Self { gateway: None, node: None, playback: None }
    }

    pub fn gateway(mut self, gateway: impl Gateway + 'static) -> Self {
        self.gateway = Some(Arc::new(gateway));
        self
    }

    pub fn node(mut self, node: impl Node + 'static) -> Self {
        self.node = Some(Arc::new(node));
        self
    }

    pub fn playback(mut self, playback: impl Playback + 'static) -> Self {
        self.playback = Some(Arc::new(playback));
        self
    }

    pub fn build(self) -> LinkRegistry {
        LinkRegistry {
            links: Mutex::new(HashMap::new()),
            gateway: self.gateway.expect("call .gateway() before .build()"),
            node: self.node.expect("call .node() before .build()"),
            playback: self.playback.expect("call .playback() before .build()"),
        }
    }
}

impl Default for LinkRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LinkRegistry {
    links: Mutex<HashMap<Snowflake, VoiceLink>>,
    gateway: Arc<dyn Gateway>,
    node: Arc<dyn Node>,
    playback: Arc<dyn Playback>,
}

impl LinkRegistry {
    pub fn builder() -> LinkRegistryBuilder {
        LinkRegistryBuilder::new()
    }

    pub async fn get(&self, guild_id: &str) -> Option<VoiceLink> {
        self.links.lock().await.get(guild_id).cloned()
    }

    pub async fn get_or_create(&self, guild_id: &str, shard_id: u64) -> VoiceLink {
        let mut links = self.links.lock().await;
        links
            .entry(guild_id.to_string())
            .or_insert_with(|| {
                debug!("guild {}: link created", guild_id);
                VoiceLink::new(
                    guild_id,
                    shard_id,
                    self.gateway.clone(),
                    self.node.clone(),
                    self.playback.clone(),
                )
            })
            .clone()
    }

    /// Connect convenience: create (or reuse) the guild's link and wait for
    /// the handshake to settle.
    pub async fn join(
        &self,
        guild_id: &str,
        shard_id: u64,
        options: ConnectOptions,
    ) -> Result<LinkInfo, LinkError> {
        let link = self.get_or_create(guild_id, shard_id).await;
        match link.connect(options).await.await {
            Ok(result) => result,
            Err(_) => Err(LinkError::Cancelled),
        }
    }

    /// Detach the guild's link and run its teardown. A no-op for guilds that
    /// never had a link.
    pub async fn disconnect(&self, guild_id: &str) {
        let link = self.links.lock().await.remove(guild_id);
        if let Some(link) = link {
            link.disconnect().await;
        }
    }

    /// Route a voice state acknowledgment delivered by the gateway.
    pub async fn voice_state_ack(&self, ack: VoiceStateAck) {
        if let Some(link) = self.get(&ack.guild_id).await {
            link.apply_voice_state(ack).await;
        }
    }

    /// Route a voice server assignment delivered by the gateway.
    pub async fn voice_server_update(&self, update: VoiceServerUpdate) {
        if let Some(link) = self.get(&update.guild_id).await {
            link.apply_server_update(update).await;
        }
    }

    /// The voice subsystem dropped the guild from its channel.
    pub async fn voice_server_gone(&self, guild_id: &str) {
        if let Some(link) = self.get(guild_id).await {
            link.on_voice_server_gone().await;
        }
    }

    /// The audio node dropped. Every link on it is dead; drain them all.
    pub async fn node_disconnected(&self) {
        let links: Vec<VoiceLink> = self.links.lock().await.drain().map(|(_, l)| l).collect();
        for link in links {
            link.on_node_disconnected().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.links.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.links.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkState;
    use crate::model::VoiceStateUpdate;
    use crate::node::NodeMessage;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct NullGateway;

    #[async_trait]
    impl Gateway for NullGateway {
        async fn send_voice_state_update(
            &self,
            _shard_id: u64,
            _update: VoiceStateUpdate,
        ) -> Result<(), LinkError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct NullNode;

    #[async_trait]
    impl Node for NullNode {
        async fn send(&self, _message: NodeMessage) -> Result<(), LinkError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingPlayback {
        node_disconnects: AtomicUsize,
    }

    impl Playback for CountingPlayback {
        fn detach_listeners(&self, _guild_id: &str) {}
        fn clear_track(&self, _guild_id: &str) {}
        fn clear_player(&self, _guild_id: &str) {}
        fn voice_close(&self, _guild_id: &str, _error: LinkError) {}
        fn node_disconnect(&self, _guild_id: &str) {
            self.node_disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn registry() -> LinkRegistry {
        LinkRegistry::builder()
            .gateway(NullGateway::default())
            .node(NullNode)
            .playback(CountingPlayback::default())
            .build()
    }

    fn ack(guild_id: &str) -> VoiceStateAck {
        VoiceStateAck {
            user_id: "9".into(),
            guild_id: guild_id.into(),
            channel_id: Some("2".into()),
            session_id: "abc".into(),
            self_mute: false,
            self_deaf: false,
        }
    }

    fn server(guild_id: &str) -> VoiceServerUpdate {
        VoiceServerUpdate {
            guild_id: guild_id.into(),
            event: json!({"endpoint": "e", "token": "t"}),
        }
    }

    #[tokio::test]
    async fn get_or_create_returns_the_same_link() {
        let registry = registry();
        let a = registry.get_or_create("1", 0).await;
        let b = registry.get_or_create("1", 0).await;
        assert_eq!(a.guild_id(), b.guild_id());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn gateway_events_route_by_guild() {
        let registry = registry();
        let one = registry.get_or_create("1", 0).await;
        let two = registry.get_or_create("2", 0).await;

        let rx = one.connect(crate::link::ConnectOptions {
            channel_id: "2".into(),
            ..Default::default()
        })
        .await;

        registry.voice_state_ack(ack("1")).await;
        registry.voice_server_update(server("1")).await;
        // Events for unknown or other guilds fall through harmlessly.
        registry.voice_server_update(server("999")).await;

        assert!(rx.await.unwrap().is_ok());
        assert_eq!(one.state().await, LinkState::Connected);
        assert_eq!(two.state().await, LinkState::Disconnected);
    }

    #[tokio::test]
    async fn join_runs_a_full_handshake() {
        let registry = Arc::new(registry());

        let joined = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.join("1", 0, crate::link::ConnectOptions {
                channel_id: "2".into(),
                ..Default::default()
            }).await })
        };

        // Let join register the link before feeding events in.
        while registry.get("1").await.is_none() {
            tokio::task::yield_now().await;
        }
        registry.voice_state_ack(ack("1")).await;
        registry.voice_server_update(server("1")).await;

        let info = joined.await.unwrap().unwrap();
        assert_eq!(info.guild_id, "1");
    }

    #[tokio::test]
    async fn disconnect_removes_the_link() {
        let registry = registry();
        registry.get_or_create("1", 0).await;
        registry.disconnect("1").await;
        assert!(registry.get("1").await.is_none());
        // Second call is a no-op.
        registry.disconnect("1").await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn node_disconnect_drains_every_link() {
        let gateway = NullGateway::default();
        let playback = Arc::new(CountingPlayback::default());
        let registry = LinkRegistry::builder()
            .gateway(gateway)
            .node(NullNode)
            .playback(ArcPlayback(playback.clone()))
            .build();

        registry.get_or_create("1", 0).await;
        registry.get_or_create("2", 0).await;

        registry.node_disconnected().await;

        assert!(registry.is_empty().await);
        assert_eq!(playback.node_disconnects.load(Ordering::SeqCst), 2);
    }

    // Playback impls are usually owned by the caller; wrap an Arc so the test
    // can keep a handle for assertions.
    struct ArcPlayback(Arc<CountingPlayback>);

    impl Playback for ArcPlayback {
        fn detach_listeners(&self, guild_id: &str) {
            self.0.detach_listeners(guild_id)
        }
        fn clear_track(&self, guild_id: &str) {
            self.0.clear_track(guild_id)
        }
        fn clear_player(&self, guild_id: &str) {
            self.0.clear_player(guild_id)
        }
        fn voice_close(&self, guild_id: &str, error: LinkError) {
            self.0.voice_close(guild_id, error)
        }
        fn node_disconnect(&self, guild_id: &str) {
            self.0.node_disconnect(guild_id)
        }
    }
}
