use std::{
    sync::Arc,
    time::Duration,
};

use anyhow::{
    Context,
    Error,
    Result,
};
use futures_util::{
    Stream,
    StreamExt,
    lock::Mutex,
};
use log::{
    info,
    warn,
};
use thiserror::Error;
use tokio::sync::{
    broadcast,
    mpsc::{
        UnboundedReceiver,
        unbounded_channel,
    },
    oneshot,
};

use crate::{
    auth::{
        AuthMethod,
        AuthenticationFlow,
        GenericClientAuthenticator,
        Identity,
        cryptosign::{
            self,
            CryptosignKey,
        },
        make_generic_client_authenticator,
        ticket,
    },
    core::{
        cancel::CallCancelMode,
        close::CloseReason,
        error::{
            InteractionError,
            SessionError,
        },
        features::{
            PubSubFeatures,
            RpcFeatures,
        },
        id::Id,
        invocation_policy::InvocationPolicy,
        match_style::MatchStyle,
        publish_options::PublishOptions,
        roles::{
            PeerRole,
            roles_details,
        },
        service::{
            Service,
            ServiceHandle,
        },
        stream::{
            MessageStream,
            TransportMessageStream,
        },
        types::{
            Dictionary,
            HashMap,
            HashSet,
            List,
            Value,
        },
        uri::{
            Uri,
            WildcardUri,
        },
    },
    message::message::{
        HelloMessage,
        Message,
    },
    peer::{
        connector::ConnectorFactory,
        handler::{
            EventHandler,
            ProcedureHandler,
        },
        session::{
            Session,
            SessionPhase,
        },
    },
    serializer::serializer::{
        SerializerType,
        new_serializer,
    },
    transport::transport::TransportFactory,
};

const DEFAULT_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));

/// Configuration for WebSocket-specific WAMP connections.
#[derive(Debug, Default)]
pub struct WebSocketConfig {
    /// Additional headers to include in the WebSocket handshake request.
    pub headers: HashMap<String, String>,
}

/// Configuration for a [`Peer`] acting as a callee.
#[derive(Debug, Default)]
pub struct CalleeConfig {
    /// Invocations that carry a timeout are canceled by the callee once the timeout expires.
    pub enforce_timeouts: bool,
}

/// Configuration for a [`Peer`].
#[derive(Debug)]
pub struct PeerConfig {
    /// Name of the peer, mostly for logging.
    pub name: String,
    /// Agent name, communicated to the router.
    pub agent: String,
    /// Roles implemented by the peer.
    pub roles: HashSet<PeerRole>,
    /// Allowed serializers, in order of preference.
    ///
    /// The actual serializer is selected when the connection with the router is established.
    pub serializers: Vec<SerializerType>,
    /// Additional configuration for WebSocket-specific connections.
    pub web_socket: Option<WebSocketConfig>,
    /// Additional configuration for the callee role.
    ///
    /// Ignored if [`PeerRole::Callee`] is not added to [`Self::roles`].
    pub callee: CalleeConfig,
}

impl PeerConfig {
    fn validate(&self) -> Result<()> {
        if self.serializers.is_empty() {
            return Err(Error::msg("at least one serializer is required"));
        }
        if self.roles.is_empty() {
            return Err(Error::msg("at least one role is required"));
        }
        Ok(())
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_AGENT.to_owned(),
            agent: DEFAULT_AGENT.to_owned(),
            roles: HashSet::from_iter([
                PeerRole::Callee,
                PeerRole::Caller,
                PeerRole::Publisher,
                PeerRole::Subscriber,
            ]),
            serializers: Vec::from_iter([SerializerType::Json, SerializerType::MessagePack]),
            web_socket: None,
            callee: CalleeConfig::default(),
        }
    }
}

/// Options for subscribing to a topic.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionOptions {
    /// How the subscription should be matched for published events.
    pub match_style: Option<MatchStyle>,
}

/// Options for registering a procedure.
#[derive(Debug, Default, Clone)]
pub struct ProcedureOptions {
    /// How the procedure should be matched for procedure calls.
    pub match_style: Option<MatchStyle>,
    /// How a callee should be selected for invocations.
    pub invocation_policy: InvocationPolicy,
    /// The caller's identity should be disclosed.
    pub disclose_caller: bool,
    /// The handler receives [`InvocationDetails`][`crate::peer::InvocationDetails`], including
    /// the progressive result emitter.
    pub pass_details: bool,
}

/// A subscription to a topic.
///
/// Each call to [`Peer::subscribe`] produces a distinct subscription, even if the router shares
/// one subscription ID between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// The subscription ID.
    pub id: Id,
    pub(crate) handler_id: u64,
}

/// A registration of a procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Procedure {
    /// The registration ID.
    pub id: Id,
}

/// A procedure call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RpcCall {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
    /// Timeout for the call, enforced by the router or callee.
    pub timeout: Option<Duration>,
}

/// A result of a procedure call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RpcResult {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
    /// More results follow.
    pub progress: bool,
}

/// An event to publish.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PublishedEvent {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
    pub options: PublishOptions,
}

struct PendingRpc {
    session: Arc<Mutex<Session>>,
    request: Id,
    result_rx: UnboundedReceiver<Result<RpcResult>>,
}

impl PendingRpc {
    async fn next(&mut self) -> Result<RpcResult> {
        match self.result_rx.recv().await {
            Some(result) => result,
            None => Err(Error::msg("procedure call finished with no result")),
        }
    }

    async fn cancel(&self, mode: CallCancelMode) -> Result<()> {
        self.session.lock().await.cancel(self.request, mode)
    }
}

impl std::fmt::Debug for PendingRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRpc")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// A simple pending RPC, which is expected to produce one result.
#[derive(Debug)]
pub struct SimplePendingRpc {
    pending: PendingRpc,
}

impl SimplePendingRpc {
    fn new(pending: PendingRpc) -> Self {
        Self { pending }
    }

    /// The request ID of the call.
    pub fn request_id(&self) -> Id {
        self.pending.request
    }

    /// Waits for the result of the procedure call.
    pub async fn result(mut self) -> Result<RpcResult> {
        self.pending.next().await
    }

    /// Cancels the pending call.
    ///
    /// [`Self::result`] fails with [`InteractionError::Canceled`] right away. Canceling a call
    /// that already finished does nothing.
    pub async fn cancel(&self) -> Result<()> {
        self.pending.cancel(CallCancelMode::default()).await
    }

    /// Cancels the pending call, asking the router to cancel the invocation with the given mode.
    pub async fn cancel_with_mode(&self, mode: CallCancelMode) -> Result<()> {
        self.pending.cancel(mode).await
    }
}

/// A progressive pending RPC, which is expected to produce one or more results.
#[derive(Debug)]
pub struct ProgressivePendingRpc {
    pending: PendingRpc,
    done: bool,
}

impl ProgressivePendingRpc {
    fn new(pending: PendingRpc) -> Self {
        Self {
            pending,
            done: false,
        }
    }

    /// The request ID of the call.
    pub fn request_id(&self) -> Id {
        self.pending.request
    }

    /// Returns true if the RPC has received all of its results.
    pub fn done(&self) -> bool {
        self.done
    }

    /// Waits for the next result of the procedure call.
    ///
    /// Returns [`None`] after the final result or error was returned.
    pub async fn next_result(&mut self) -> Result<Option<RpcResult>> {
        if self.done {
            return Ok(None);
        }
        match self.pending.next().await {
            Ok(result) => {
                self.done = !result.progress;
                Ok(Some(result))
            }
            Err(err) => {
                self.done = true;
                Err(err)
            }
        }
    }

    /// Cancels the pending call.
    ///
    /// Progressive results received before cancellation can still be read. The call then ends
    /// with [`InteractionError::Canceled`].
    pub async fn cancel(&self) -> Result<()> {
        self.pending.cancel(CallCancelMode::default()).await
    }

    /// Cancels the pending call, asking the router to cancel the invocation with the given mode.
    pub async fn cancel_with_mode(&self, mode: CallCancelMode) -> Result<()> {
        self.pending.cancel(mode).await
    }

    /// Wraps the pending RPC as a stream of results.
    ///
    /// The stream is finished on the last result or error.
    pub fn into_stream(self) -> impl Stream<Item = Result<RpcResult>> {
        futures_util::stream::unfold(self, move |mut rpc| async {
            match rpc.next_result().await {
                Ok(Some(result)) => Some((Ok(result), rpc)),
                Ok(None) => None,
                Err(err) => Some((Err(err), rpc)),
            }
        })
        .boxed()
    }
}

/// Error for a peer not being connected for some operation.
#[derive(Debug, Error)]
#[error("peer is not connected")]
pub struct PeerNotConnectedError;

/// Supported authentication types for a peer.
#[derive(Debug, Clone)]
pub enum SupportedAuthMethod {
    /// WAMP-cryptosign, signing the router's challenge with an Ed25519 key.
    Cryptosign { id: String, key: CryptosignKey },
    /// WAMP-ticket, answering the router's challenge with a static ticket.
    Ticket { id: String, ticket: String },
}

impl SupportedAuthMethod {
    /// The corresponding [`AuthMethod`].
    pub fn auth_method(&self) -> AuthMethod {
        match self {
            Self::Cryptosign { .. } => AuthMethod::Cryptosign,
            Self::Ticket { .. } => AuthMethod::Ticket,
        }
    }

    /// Creates a new authenticator for the supported authentication method.
    pub fn new_authenticator(&self) -> Box<dyn GenericClientAuthenticator> {
        match self {
            Self::Cryptosign { id, key } => make_generic_client_authenticator(Box::new(
                cryptosign::ClientAuthenticator::new(id.clone(), key.clone()),
            )),
            Self::Ticket { id, ticket } => make_generic_client_authenticator(Box::new(
                ticket::ClientAuthenticator::new(id.clone(), ticket.clone()),
            )),
        }
    }
}

struct PeerState {
    service: ServiceHandle,
    session: Arc<Mutex<Session>>,
}

/// A WAMP peer (a.k.a., client) that connects to a WAMP router, establishes sessions in a realm,
/// and interacts with resources in the realm.
///
/// One connection carries at most one session at a time. After leaving a realm, the same
/// connection can be used to join again.
pub struct Peer<S> {
    config: PeerConfig,
    connector_factory: Box<dyn ConnectorFactory<S>>,
    transport_factory: Box<dyn TransportFactory<S>>,

    drop_tx: broadcast::Sender<()>,
    peer_state: Arc<Mutex<Option<PeerState>>>,
}

impl<S> Peer<S>
where
    S: Send + 'static,
{
    /// Creates a new peer.
    pub fn new(
        config: PeerConfig,
        connector_factory: Box<dyn ConnectorFactory<S>>,
        transport_factory: Box<dyn TransportFactory<S>>,
    ) -> Result<Self> {
        config.validate()?;
        let (drop_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            connector_factory,
            transport_factory,
            drop_tx,
            peer_state: Arc::new(Mutex::new(None)),
        })
    }

    /// The current session ID, as given by the router.
    ///
    /// Since a peer is reused across multiple router sessions, this ID is subject to change at any
    /// point.
    pub async fn current_session_id(&self) -> Option<Id> {
        let session = self.session().await.ok()?;
        session.lock().await.session_id()
    }

    /// The identity the current session was authenticated as.
    pub async fn current_identity(&self) -> Option<Identity> {
        let session = self.session().await.ok()?;
        session.lock().await.identity()
    }

    /// The lifecycle phase of the current session.
    pub async fn state(&self) -> SessionPhase {
        match self.session().await {
            Ok(session) => session.lock().await.phase(),
            Err(_) => SessionPhase::Closed,
        }
    }

    /// Connects to a router.
    ///
    /// This method merely establishes a network connection with the router. It does not establish
    /// any WAMP session. This allows the underlying network connection to be reused across multiple
    /// WAMP sessions, if the router allows.
    ///
    /// The connection and message service is maintained asynchronously. If the peer loses
    /// connection to the router, every pending operation fails with
    /// [`SessionError::TransportLost`] and methods depending on the connection will fail. The peer
    /// can reconnect to the router by calling this method again.
    pub async fn connect(&self, uri: &str) -> Result<()> {
        let connector = self.connector_factory.new_connector();
        let connection = connector.connect(&self.config, uri).await?;
        info!(
            "WAMP connection established with {uri} for peer {} using {:?}",
            self.config.name, connection.serializer
        );

        let serializer = new_serializer(connection.serializer);
        let transport = self
            .transport_factory
            .new_transport(connection.stream, connection.serializer);
        self.direct_connect(Box::new(TransportMessageStream::new(transport, serializer)))
            .await
    }

    /// Directly connects to a router with the given message stream.
    ///
    /// Any active connection is ended first.
    pub async fn direct_connect(&self, stream: Box<dyn MessageStream>) -> Result<()> {
        let mut peer_state = self.peer_state.lock().await;
        if let Some(previous) = peer_state.take() {
            previous.service.cancel().ok();
            previous.session.lock().await.close(|| {
                SessionError::TransportLost("peer started another connection".to_owned()).into()
            });
        }

        let (inbound_tx, inbound_rx) = unbounded_channel();
        let service = Service::new(self.config.name.clone(), stream, inbound_tx).start();
        let session = Arc::new(Mutex::new(Session::new(
            self.config.name.clone(),
            service.message_tx(),
            self.config.callee.enforce_timeouts,
        )));
        *peer_state = Some(PeerState {
            service,
            session: session.clone(),
        });

        tokio::spawn(handle_messages(
            self.config.name.clone(),
            session,
            self.peer_state.clone(),
            inbound_rx,
            self.drop_tx.subscribe(),
        ));
        Ok(())
    }

    /// Disconnects from the router.
    ///
    /// The session is not left gracefully. Every pending operation fails with
    /// [`SessionError::TransportLost`], and no handler is invoked afterwards.
    pub async fn disconnect(&self) -> Result<()> {
        let peer_state = self
            .peer_state
            .lock()
            .await
            .take()
            .ok_or(PeerNotConnectedError)?;
        peer_state.service.cancel().ok();
        peer_state.session.lock().await.close(|| {
            SessionError::TransportLost("peer disconnected".to_owned()).into()
        });
        peer_state.service.join().await?;
        info!("Peer {} disconnected from the router", self.config.name);
        Ok(())
    }

    async fn session(&self) -> Result<Arc<Mutex<Session>>> {
        match self.peer_state.lock().await.as_ref() {
            Some(peer_state) => Ok(peer_state.session.clone()),
            None => Err(PeerNotConnectedError.into()),
        }
    }

    async fn wait_for_response<T>(response_rx: oneshot::Receiver<Result<T>>) -> Result<T> {
        response_rx.await.map_err(|_| PeerNotConnectedError)?
    }

    /// Joins the realm, establishing a WAMP session.
    ///
    /// The session exists for as long as the router allows it to. The session will be lost in the
    /// following scenarios:
    /// 1. [`Self::leave_realm`] is called.
    /// 1. The router terminates the session due to an error.
    /// 1. The underlying connection to the router is lost.
    ///
    /// To join a different realm, [`Self::leave_realm`] should be called first.
    pub async fn join_realm(&self, realm: &str) -> Result<Id> {
        self.join_realm_internal(realm, &[]).await
    }

    /// Joins the realm, establishing a WAMP session, with a list of supported authentication
    /// methods.
    ///
    /// Behaves the same as [`Self::join_realm`], but answers the router's authentication challenge
    /// with the matching method.
    pub async fn join_realm_with_authentication(
        &self,
        realm: &str,
        auth_methods: &[SupportedAuthMethod],
    ) -> Result<Id> {
        self.join_realm_internal(realm, auth_methods).await
    }

    async fn join_realm_internal(
        &self,
        realm: &str,
        auth_methods: &[SupportedAuthMethod],
    ) -> Result<Id> {
        let session = self.session().await?;

        let pub_sub_features = PubSubFeatures {
            publisher_exclusion: true,
            subscriber_blackwhite_listing: true,
            pattern_based_subscription: true,
        };
        let rpc_features = RpcFeatures {
            call_canceling: true,
            progressive_call_results: true,
            call_timeout: self.config.callee.enforce_timeouts,
            pattern_based_registration: true,
            caller_identification: true,
        };
        let details = Dictionary::from_iter([
            ("agent".to_owned(), Value::String(self.config.agent.clone())),
            (
                "roles".to_owned(),
                Value::Dictionary(roles_details(
                    self.config.roles.iter().cloned(),
                    pub_sub_features,
                    rpc_features,
                )),
            ),
        ]);
        let hello = HelloMessage {
            realm: Uri::try_from(realm)?,
            details,
        };
        let flow = AuthenticationFlow::new(
            auth_methods
                .iter()
                .map(SupportedAuthMethod::new_authenticator),
        );

        let join_rx = session.lock().await.join(hello, flow).await?;
        Self::wait_for_response(join_rx)
            .await
            .with_context(|| format!("failed to join realm {realm}"))
    }

    /// Leaves the realm, closing the WAMP session.
    pub async fn leave_realm(&self) -> Result<()> {
        self.leave_realm_with_reason(CloseReason::Normal).await
    }

    /// Leaves the realm with the given reason.
    ///
    /// Every in-flight operation fails with [`SessionError::Closing`]. Resolves once the router
    /// confirms, or once the connection is lost. Leaving without a session does nothing.
    pub async fn leave_realm_with_reason(&self, reason: CloseReason) -> Result<()> {
        let session = self.session().await?;
        let leave_rx = session.lock().await.leave(reason);
        if let Some(leave_rx) = leave_rx {
            leave_rx.await.ok();
        }
        Ok(())
    }

    /// Subscribes to a topic.
    pub async fn subscribe<H>(&self, topic: &str, handler: H) -> Result<Subscription>
    where
        H: EventHandler + 'static,
    {
        self.subscribe_with_options(topic, SubscriptionOptions::default(), handler)
            .await
    }

    /// Subscribes to a topic with additional options.
    ///
    /// The handler runs in its own task for every event.
    pub async fn subscribe_with_options<H>(
        &self,
        topic: &str,
        options: SubscriptionOptions,
        handler: H,
    ) -> Result<Subscription>
    where
        H: EventHandler + 'static,
    {
        let session = self.session().await?;
        let topic = WildcardUri::try_from(topic)?;
        let subscribed_rx = session
            .lock()
            .await
            .subscribe(topic, &options, Arc::new(handler))
            .await?;
        Self::wait_for_response(subscribed_rx).await
    }

    /// Unsubscribes from a topic.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<()> {
        let session = self.session().await?;
        let unsubscribed_rx = session.lock().await.unsubscribe(subscription).await?;
        match unsubscribed_rx {
            Some(unsubscribed_rx) => Self::wait_for_response(unsubscribed_rx).await,
            None => Ok(()),
        }
    }

    /// Publishes an event to a topic.
    ///
    /// Returns as soon as the event is sent, unless [`PublishOptions::acknowledge`] is set, in
    /// which case this waits for the router to accept the publication.
    pub async fn publish(&self, topic: &str, event: PublishedEvent) -> Result<()> {
        let session = self.session().await?;
        let topic = Uri::try_from(topic)?;
        let published_rx = session.lock().await.publish(topic, event).await?;
        if let Some(published_rx) = published_rx {
            let publication = Self::wait_for_response(published_rx).await?;
            info!(
                "Peer {} publication {publication} was accepted",
                self.config.name
            );
        }
        Ok(())
    }

    /// Registers a procedure.
    pub async fn register<H>(&self, procedure: &str, handler: H) -> Result<Procedure>
    where
        H: ProcedureHandler + 'static,
    {
        self.register_with_options(procedure, ProcedureOptions::default(), handler)
            .await
    }

    /// Registers a procedure with additional options.
    ///
    /// Fails with [`InteractionError::ProcedureAlreadyExists`] if the procedure is already
    /// registered by this peer or by another session. The handler runs in its own task for every
    /// invocation.
    pub async fn register_with_options<H>(
        &self,
        procedure: &str,
        options: ProcedureOptions,
        handler: H,
    ) -> Result<Procedure>
    where
        H: ProcedureHandler + 'static,
    {
        let session = self.session().await?;
        let procedure = WildcardUri::try_from(procedure)?;
        let registered_rx = session
            .lock()
            .await
            .register(procedure, options, Arc::new(handler))
            .await?;
        Self::wait_for_response(registered_rx).await
    }

    /// Unregisters a procedure.
    pub async fn unregister(&self, procedure: &Procedure) -> Result<()> {
        let session = self.session().await?;
        let unregistered_rx = session.lock().await.unregister(procedure).await?;
        Self::wait_for_response(unregistered_rx).await
    }

    /// Calls a procedure, returning a handle to the pending call.
    pub async fn call(&self, procedure: &str, rpc_call: RpcCall) -> Result<SimplePendingRpc> {
        Ok(SimplePendingRpc::new(
            self.start_call(procedure, rpc_call, false).await?,
        ))
    }

    /// Calls a procedure and waits for its result.
    pub async fn call_and_wait(&self, procedure: &str, rpc_call: RpcCall) -> Result<RpcResult> {
        self.call(procedure, rpc_call).await?.result().await
    }

    /// Calls a procedure, asking the callee for progressive results.
    pub async fn call_with_progress(
        &self,
        procedure: &str,
        rpc_call: RpcCall,
    ) -> Result<ProgressivePendingRpc> {
        Ok(ProgressivePendingRpc::new(
            self.start_call(procedure, rpc_call, true).await?,
        ))
    }

    async fn start_call(
        &self,
        procedure: &str,
        rpc_call: RpcCall,
        receive_progress: bool,
    ) -> Result<PendingRpc> {
        let session = self.session().await?;
        let procedure = Uri::try_from(procedure)?;
        let (request, result_rx) = session
            .lock()
            .await
            .call(procedure, rpc_call, receive_progress)
            .await?;
        Ok(PendingRpc {
            session,
            request,
            result_rx,
        })
    }
}

impl<S> Drop for Peer<S> {
    fn drop(&mut self) {
        self.drop_tx.send(()).ok();
    }
}

/// Feeds messages received by the service to the session, until the connection is lost.
async fn handle_messages(
    name: String,
    session: Arc<Mutex<Session>>,
    peer_state: Arc<Mutex<Option<PeerState>>>,
    mut inbound_rx: UnboundedReceiver<Result<Message>>,
    mut drop_rx: broadcast::Receiver<()>,
) {
    let error = loop {
        tokio::select! {
            message = inbound_rx.recv() => match message {
                Some(Ok(message)) => session.lock().await.handle_message(message).await,
                Some(Err(err)) => break err,
                None => break Error::msg("connection closed"),
            },
            _ = drop_rx.recv() => break Error::msg("peer dropped"),
        }
    };

    let cause = format!("{error:#}");
    let mut locked_session = session.lock().await;
    if locked_session.phase() != SessionPhase::Closed {
        warn!("Peer {name} lost its session: {cause}");
    }
    let protocol_violation = matches!(
        error.downcast_ref::<InteractionError>(),
        Some(InteractionError::ProtocolViolation(_))
    );
    // The service already sent ABORT for a message it could not decode.
    if protocol_violation {
        locked_session.close_for_protocol_violation(error);
    } else {
        locked_session.close(|| SessionError::TransportLost(cause.clone()).into());
    }
    drop(locked_session);

    // A newer connection may have replaced this one already.
    let mut peer_state = peer_state.lock().await;
    if peer_state
        .as_ref()
        .is_some_and(|peer_state| Arc::ptr_eq(&peer_state.session, &session))
    {
        peer_state.take();
        info!("Peer {name} connection ended: {cause}");
    }
}
