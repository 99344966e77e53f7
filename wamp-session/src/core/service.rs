use std::time::Duration;

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    SinkExt,
    StreamExt,
};
use log::{
    debug,
    error,
    warn,
};
use tokio::{
    sync::{
        broadcast,
        mpsc::{
            UnboundedReceiver,
            UnboundedSender,
            unbounded_channel,
        },
    },
    task::JoinHandle,
};

use crate::{
    core::{
        error::InteractionError,
        stream::{
            MessageStream,
            StreamMessage,
        },
    },
    message::{
        common::abort_message_for_error,
        message::Message,
    },
};

/// How long a connection may stay silent before the service gives up on it.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// A handle to an asynchronously-running [`Service`].
pub struct ServiceHandle {
    start_handle: JoinHandle<()>,
    cancel_tx: broadcast::Sender<()>,
    message_tx: UnboundedSender<Message>,
}

impl ServiceHandle {
    /// Joins the task running the service.
    pub async fn join(self) -> Result<()> {
        self.start_handle.await.map_err(Error::new)
    }

    /// Cancels the service.
    ///
    /// Cancellation is the correct way to cleanly exit a service. No ABORT is sent.
    pub fn cancel(&self) -> Result<()> {
        self.cancel_tx.send(()).map(|_| ()).map_err(Error::new)
    }

    /// The message transmission channel.
    pub fn message_tx(&self) -> UnboundedSender<Message> {
        self.message_tx.clone()
    }
}

/// The asynchronous service that sends and receives WAMP messages over a [`MessageStream`].
///
/// Received messages are forwarded, in arrival order, to the channel given at construction. When
/// the service fails, the error is forwarded as the last item. When the service ends for any
/// reason, the channel is closed, which is how the receiving side learns that the connection is
/// gone.
pub struct Service {
    name: String,
    stream: Box<dyn MessageStream>,
    inbound_tx: UnboundedSender<Result<Message>>,

    user_message_tx: UnboundedSender<Message>,
    user_message_rx: UnboundedReceiver<Message>,
}

impl Service {
    /// Creates a new service over the given stream.
    pub fn new(
        name: String,
        stream: Box<dyn MessageStream>,
        inbound_tx: UnboundedSender<Result<Message>>,
    ) -> Self {
        let (user_message_tx, user_message_rx) = unbounded_channel();
        Self {
            name,
            stream,
            inbound_tx,
            user_message_tx,
            user_message_rx,
        }
    }

    /// Starts the service asynchronously.
    ///
    /// This method takes ownership of the service. All future interactions with the service should
    /// be made through the returned handle. Dropping the handle also stops the service.
    pub fn start(self) -> ServiceHandle {
        let (cancel_tx, cancel_rx) = broadcast::channel(1);
        let message_tx = self.user_message_tx.clone();
        let start_handle = tokio::spawn(self.run(cancel_rx));
        ServiceHandle {
            start_handle,
            cancel_tx,
            message_tx,
        }
    }

    async fn run(mut self, mut cancel_rx: broadcast::Receiver<()>) {
        debug!(
            "Service {} started over {} stream",
            self.name,
            self.stream.message_stream_type()
        );
        if let Err(err) = self.service_loop(&mut cancel_rx).await {
            error!("Service {} failed: {err:#}", self.name);
            self.inbound_tx.send(Err(err)).ok();
        }
        // Ignore errors with the stream, since it may already be closed.
        self.stream.close().await.ok();
        debug!("Service {} ended", self.name);
    }

    async fn service_loop(&mut self, cancel_rx: &mut broadcast::Receiver<()>) -> Result<()> {
        loop {
            tokio::select! {
                message = self.stream.next() => {
                    match message {
                        Some(Ok(StreamMessage::Ping(data))) => {
                            self.stream.send(StreamMessage::Ping(data)).await?;
                        }
                        Some(Ok(StreamMessage::Message(message))) => {
                            if self.inbound_tx.send(Ok(message)).is_err() {
                                return Err(Error::msg("inbound message channel closed"));
                            }
                        }
                        Some(Ok(StreamMessage::Unknown(tag))) => {
                            warn!("Service {} ignored message of unknown type {tag}", self.name);
                        }
                        Some(Err(err)) => {
                            // The stream is abruptly closed after this, so tell the other side why.
                            if err.downcast_ref::<InteractionError>().is_some() {
                                self.stream
                                    .send(StreamMessage::Message(abort_message_for_error(&err)))
                                    .await
                                    .ok();
                            }
                            return Err(err);
                        }
                        None => return Err(Error::msg("connection closed by the other side")),
                    }
                }
                message = self.user_message_rx.recv() => {
                    match message {
                        Some(message) => {
                            self.stream.send(StreamMessage::Message(message)).await?;
                        }
                        None => return Err(Error::msg("user message stream closed")),
                    }
                }
                // Also fires when the handle is dropped.
                _ = cancel_rx.recv() => return Ok(()),
                // Pings count as activity, so the timer lives at this layer.
                _ = tokio::time::sleep(IDLE_TIMEOUT) => {
                    return Err(Error::msg("timed out"));
                }
            }
        }
    }
}
