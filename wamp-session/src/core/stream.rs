use std::{
    pin::Pin,
    task,
};

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    Sink,
    SinkExt,
    Stream,
    StreamExt,
};
use tokio::sync::mpsc::{
    UnboundedReceiver,
    UnboundedSender,
};

use crate::{
    core::{
        error::InteractionError,
        types::Integer,
    },
    message::message::Message,
    serializer::serializer::Serializer,
    transport::transport::{
        Transport,
        TransportData,
    },
};

/// An item of a [`MessageStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// A health check to answer.
    Ping(Vec<u8>),
    /// A WAMP message.
    Message(Message),
    /// A well-formed message with a type tag this library does not understand.
    Unknown(Integer),
}

/// A stream of WAMP messages, as seen by the service that owns a connection.
pub trait MessageStream:
    Send + Stream<Item = Result<StreamMessage>> + Sink<StreamMessage, Error = Error> + Unpin
{
    /// Name of the stream, mostly for logging.
    fn message_stream_type(&self) -> &'static str;
}

/// A [`MessageStream`] over a [`Transport`], encoding messages with a [`Serializer`].
pub struct TransportMessageStream {
    transport: Box<dyn Transport>,
    serializer: Box<dyn Serializer>,
}

impl TransportMessageStream {
    pub fn new(transport: Box<dyn Transport>, serializer: Box<dyn Serializer>) -> Self {
        Self {
            transport,
            serializer,
        }
    }

    fn decode(&self, data: &[u8]) -> Result<StreamMessage> {
        match self.serializer.deserialize(data) {
            Ok(message) => Ok(StreamMessage::Message(message)),
            Err(err) => match self.serializer.message_tag(data) {
                Ok(tag) if !Message::is_known_tag(tag) => Ok(StreamMessage::Unknown(tag)),
                _ => Err(InteractionError::ProtocolViolation(format!(
                    "failed to decode message: {err:#}"
                ))
                .into()),
            },
        }
    }
}

impl MessageStream for TransportMessageStream {
    fn message_stream_type(&self) -> &'static str {
        "transport"
    }
}

impl Stream for TransportMessageStream {
    type Item = Result<StreamMessage>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        match futures_util::ready!(self.transport.poll_next_unpin(cx)) {
            Some(Ok(TransportData::Ping(data))) => {
                task::Poll::Ready(Some(Ok(StreamMessage::Ping(data))))
            }
            Some(Ok(TransportData::Message(data))) => task::Poll::Ready(Some(self.decode(&data))),
            Some(Err(err)) => task::Poll::Ready(Some(Err(err))),
            None => task::Poll::Ready(None),
        }
    }
}

impl Sink<StreamMessage> for TransportMessageStream {
    type Error = Error;

    fn poll_ready(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.transport.poll_ready_unpin(cx)
    }

    fn start_send(
        mut self: Pin<&mut Self>,
        item: StreamMessage,
    ) -> std::result::Result<(), Self::Error> {
        let data = match item {
            StreamMessage::Ping(data) => TransportData::Ping(data),
            StreamMessage::Message(message) => {
                TransportData::Message(self.serializer.serialize(&message)?)
            }
            StreamMessage::Unknown(tag) => {
                return Err(Error::msg(format!("cannot send unknown message type {tag}")));
            }
        };
        self.transport.start_send_unpin(data)
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.transport.poll_flush_unpin(cx)
    }

    fn poll_close(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.transport.poll_close_unpin(cx)
    }
}

/// A [`MessageStream`] that passes messages over in-process channels, skipping serialization.
///
/// Used to connect a peer directly to a router running in the same process.
pub struct DirectMessageStream {
    message_tx: UnboundedSender<Message>,
    message_rx: UnboundedReceiver<Message>,
}

impl DirectMessageStream {
    /// Creates a new stream that sends messages to `message_tx` and receives them from
    /// `message_rx`.
    pub fn new(message_tx: UnboundedSender<Message>, message_rx: UnboundedReceiver<Message>) -> Self {
        Self {
            message_tx,
            message_rx,
        }
    }
}

impl MessageStream for DirectMessageStream {
    fn message_stream_type(&self) -> &'static str {
        "direct"
    }
}

impl Stream for DirectMessageStream {
    type Item = Result<StreamMessage>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        self.message_rx
            .poll_recv(cx)
            .map(|message| message.map(|message| Ok(StreamMessage::Message(message))))
    }
}

impl Sink<StreamMessage> for DirectMessageStream {
    type Error = Error;

    fn poll_ready(
        self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        task::Poll::Ready(Ok(()))
    }

    fn start_send(
        self: Pin<&mut Self>,
        item: StreamMessage,
    ) -> std::result::Result<(), Self::Error> {
        match item {
            StreamMessage::Message(message) => self.message_tx.send(message).map_err(Error::new),
            // There is no connection to keep alive.
            StreamMessage::Ping(_) => Ok(()),
            StreamMessage::Unknown(tag) => {
                Err(Error::msg(format!("cannot send unknown message type {tag}")))
            }
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        task::Poll::Ready(Ok(()))
    }

    fn poll_close(
        mut self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.message_rx.close();
        task::Poll::Ready(Ok(()))
    }
}
