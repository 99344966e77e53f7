use anyhow::{
    Error,
    Result,
};
use async_trait::async_trait;
use log::debug;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream,
    WebSocketStream,
    connect_async,
    tungstenite::{
        ClientRequestBuilder,
        http::header::SEC_WEBSOCKET_PROTOCOL,
    },
};

use crate::{
    peer::{
        connector::connector::{
            Connection,
            Connector,
            ConnectorFactory,
        },
        peer::PeerConfig,
    },
    serializer::serializer::SerializerType,
};

type WebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Negotiates the serializer through the WebSocket sub-protocol.
#[derive(Default)]
struct WebSocketConnector {}

impl WebSocketConnector {
    fn negotiated_serializer(
        config: &PeerConfig,
        protocol: Option<&str>,
    ) -> Result<SerializerType> {
        let protocol =
            protocol.ok_or_else(|| Error::msg("router did not select a sub-protocol"))?;
        let serializer = SerializerType::try_from(protocol).map_err(Error::msg)?;
        if !config.serializers.contains(&serializer) {
            return Err(Error::msg(format!(
                "router selected {protocol}, which was not offered"
            )));
        }
        Ok(serializer)
    }
}

#[async_trait]
impl Connector<WebSocket> for WebSocketConnector {
    async fn connect(&self, config: &PeerConfig, uri: &str) -> Result<Connection<WebSocket>> {
        let mut request = ClientRequestBuilder::new(uri.try_into()?);
        if !config.agent.is_empty() {
            request = request.with_header("User-Agent", &config.agent);
        }
        for serializer in &config.serializers {
            request = request.with_sub_protocol(serializer.uri().to_string());
        }
        if let Some(web_socket) = &config.web_socket {
            for (key, value) in &web_socket.headers {
                request = request.with_header(key, value);
            }
        }

        debug!("Peer {} opening WebSocket to {uri}", config.name);
        let (stream, response) = connect_async(request).await?;
        let protocol = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .map(|protocol| protocol.to_str())
            .transpose()?;
        let serializer = Self::negotiated_serializer(config, protocol)?;
        Ok(Connection { stream, serializer })
    }
}

/// A factory for [`Connector`]s that open WebSocket connections.
#[derive(Default)]
pub struct WebSocketConnectorFactory {}

impl ConnectorFactory<WebSocket> for WebSocketConnectorFactory {
    fn new_connector(&self) -> Box<dyn Connector<WebSocket> + Send + Sync> {
        Box::new(WebSocketConnector::default())
    }
}
