use anyhow::Result;
use async_trait::async_trait;

use crate::{
    peer::peer::PeerConfig,
    serializer::serializer::SerializerType,
};

/// An established network connection to a router, along with the serializer both sides agreed
/// on.
pub struct Connection<S> {
    pub stream: S,
    pub serializer: SerializerType,
}

/// Opens network connections to a router.
#[async_trait]
pub trait Connector<S> {
    /// Connects to the router at the given URI, offering the serializers in the peer's
    /// configuration.
    async fn connect(&self, config: &PeerConfig, uri: &str) -> Result<Connection<S>>;
}

/// Creates a new [`Connector`] for each connection attempt.
pub trait ConnectorFactory<S>: Send + Sync {
    fn new_connector(&self) -> Box<dyn Connector<S> + Send + Sync>;
}
