pub mod error;
pub mod gateway;
pub mod link;
pub mod model;
pub mod node;
pub mod playback;
pub mod registry;

pub mod prelude {
    pub use crate::error::LinkError;
    pub use crate::gateway::Gateway;
    pub use crate::link::{ConnectOptions, ConnectResult, LinkInfo, LinkState, VoiceLink};
    pub use crate::model::*;
    pub use crate::node::{Node, NodeMessage};
    pub use crate::playback::Playback;
    pub use crate::registry::{LinkRegistry, LinkRegistryBuilder};
}
