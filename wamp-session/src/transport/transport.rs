use std::fmt::Debug;

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    Sink,
    Stream,
};

use crate::serializer::serializer::SerializerType;

/// Data received from or sent to a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportData {
    /// A health check, which is answered with the same payload.
    Ping(Vec<u8>),
    /// One encoded WAMP message.
    Message(Vec<u8>),
}

/// A duplex channel of framed WAMP messages.
///
/// The stream ends when the other side closes the connection. Framing errors are reported as
/// stream items so that higher layers can decide how to tear down the session.
pub trait Transport:
    Send + Stream<Item = Result<TransportData>> + Sink<TransportData, Error = Error> + Unpin + Debug
{
}

/// A factory for creating a new [`Transport`].
pub trait TransportFactory<S>: Send + Sync {
    /// Creates a new [`Transport`] over an established connection.
    fn new_transport(&self, stream: S, serializer_type: SerializerType) -> Box<dyn Transport>;
}
