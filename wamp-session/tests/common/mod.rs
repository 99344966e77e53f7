#![allow(dead_code)]

use std::{
    pin::Pin,
    sync::Arc,
    task,
};

use anyhow::{
    Error,
    Result,
};
use ed25519_dalek::{
    Signature,
    Verifier,
    VerifyingKey,
};
use futures_util::{
    Sink,
    Stream,
    lock::Mutex,
};
use tokio::sync::mpsc::{
    UnboundedReceiver,
    UnboundedSender,
    unbounded_channel,
};
use wamp_session::{
    auth::{
        AuthMethod,
        cryptosign::{
            from_hex,
            to_hex,
        },
    },
    core::{
        id::Id,
        stream::{
            DirectMessageStream,
            MessageStream,
        },
        types::{
            Dictionary,
            HashMap,
            HashSet,
            List,
            Value,
        },
        uri::Uri,
    },
    message::message::{
        AbortMessage,
        ChallengeMessage,
        ErrorMessage,
        EventMessage,
        GoodbyeMessage,
        InterruptMessage,
        InvocationMessage,
        Message,
        PublishedMessage,
        RegisteredMessage,
        ResultMessage,
        SubscribedMessage,
        UnregisteredMessage,
        UnsubscribedMessage,
        WelcomeMessage,
    },
    peer::{
        PeerConfig,
        WebSocketPeer,
        new_web_socket_peer,
    },
    transport::transport::{
        Transport,
        TransportData,
    },
};

pub const REALM: &str = "com.myapp.realm";

/// Authentication required by a [`TestRouter`].
#[derive(Clone)]
pub enum RouterAuth {
    Ticket { id: String, ticket: String },
    Cryptosign { id: String, public_key: VerifyingKey },
}

struct Connection {
    message_tx: UnboundedSender<Message>,
    session: Option<Id>,
    challenge: Option<Vec<u8>>,
    closing: bool,
}

struct ActiveInvocation {
    caller: u64,
    call_request: Id,
    callee: u64,
}

#[derive(Default)]
struct RouterState {
    next_connection: u64,
    next_id: u64,
    connections: HashMap<u64, Connection>,
    topics: HashMap<String, (Id, HashSet<u64>)>,
    procedures: HashMap<String, (Id, u64)>,
    invocations: HashMap<Id, ActiveInvocation>,
    publications: Vec<(String, List)>,
}

impl RouterState {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        Id::try_from(self.next_id).unwrap()
    }

    fn send(&self, connection: u64, message: Message) {
        if let Some(connection) = self.connections.get(&connection) {
            connection.message_tx.send(message).ok();
        }
    }

    fn end_session(&mut self, connection: u64) {
        if let Some(state) = self.connections.get_mut(&connection) {
            state.session = None;
            state.challenge = None;
            state.closing = false;
        }
        for (_, subscribers) in self.topics.values_mut() {
            subscribers.remove(&connection);
        }
        self.procedures.retain(|_, (_, callee)| *callee != connection);
        self.invocations
            .retain(|_, invocation| invocation.callee != connection && invocation.caller != connection);
    }
}

fn uri(uri: &str) -> Uri {
    Uri::try_from(uri).unwrap()
}

fn error(request_type: u64, request: Id, error: &str) -> Message {
    Message::Error(ErrorMessage {
        request_type,
        request,
        details: Dictionary::default(),
        error: uri(error),
        arguments: List::default(),
        arguments_keyword: Dictionary::default(),
    })
}

fn abort(reason: &str) -> Message {
    Message::Abort(AbortMessage {
        details: Dictionary::default(),
        reason: uri(reason),
        arguments: List::default(),
        arguments_keyword: Dictionary::default(),
    })
}

/// An in-memory router with a single realm, exact matching, and one callee per procedure.
#[derive(Clone, Default)]
pub struct TestRouter {
    state: Arc<Mutex<RouterState>>,
    auth: Option<RouterAuth>,
}

impl TestRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auth(auth: RouterAuth) -> Self {
        Self {
            state: Arc::default(),
            auth: Some(auth),
        }
    }

    /// Opens a new connection to the router.
    pub async fn connect(&self) -> Box<dyn MessageStream> {
        let (to_router_tx, to_peer_rx) = self.open().await;
        Box::new(DirectMessageStream::new(to_router_tx, to_peer_rx))
    }

    /// Opens a new connection to the router, returning the peer's ends of its channels.
    pub async fn open(&self) -> (UnboundedSender<Message>, UnboundedReceiver<Message>) {
        let (to_router_tx, to_router_rx) = unbounded_channel();
        let (to_peer_tx, to_peer_rx) = unbounded_channel();
        let connection = {
            let mut state = self.state.lock().await;
            state.next_connection += 1;
            let connection = state.next_connection;
            state.connections.insert(
                connection,
                Connection {
                    message_tx: to_peer_tx,
                    session: None,
                    challenge: None,
                    closing: false,
                },
            );
            connection
        };
        tokio::spawn(self.clone().serve(connection, to_router_rx));
        (to_router_tx, to_peer_rx)
    }

    /// Drops every connection without closing sessions.
    pub async fn drop_connections(&self) {
        let mut state = self.state.lock().await;
        let connections = state.connections.keys().cloned().collect::<Vec<_>>();
        for connection in connections {
            state.end_session(connection);
        }
        state.connections.clear();
    }

    /// Sends GOODBYE to every session.
    pub async fn shut_down_sessions(&self) {
        let mut state = self.state.lock().await;
        for connection in state.connections.values_mut() {
            if connection.session.is_some() {
                connection.closing = true;
                connection
                    .message_tx
                    .send(Message::Goodbye(GoodbyeMessage {
                        details: Dictionary::default(),
                        reason: uri("wamp.close.system_shutdown"),
                    }))
                    .ok();
            }
        }
    }

    /// Every publication the router accepted, in order.
    pub async fn publications(&self) -> Vec<(String, List)> {
        self.state.lock().await.publications.clone()
    }

    /// The number of calls still waiting for their callee.
    pub async fn active_invocations(&self) -> usize {
        self.state.lock().await.invocations.len()
    }

    async fn serve(self, connection: u64, mut message_rx: UnboundedReceiver<Message>) {
        while let Some(message) = message_rx.recv().await {
            let mut state = self.state.lock().await;
            if !state.connections.contains_key(&connection) {
                break;
            }
            self.handle_message(&mut state, connection, message);
        }
    }

    fn handle_message(&self, state: &mut RouterState, connection: u64, message: Message) {
        match message {
            Message::Hello(message) => {
                if message.realm.as_ref() != REALM {
                    state.send(connection, abort("wamp.error.no_such_realm"));
                    return;
                }
                self.hello(state, connection, &message.details);
            }
            Message::Authenticate(message) => self.authenticate(state, connection, &message.signature),
            Message::Goodbye(_) => {
                let closing = state
                    .connections
                    .get(&connection)
                    .is_some_and(|connection| connection.closing);
                state.end_session(connection);
                if !closing {
                    state.send(
                        connection,
                        Message::Goodbye(GoodbyeMessage {
                            details: Dictionary::default(),
                            reason: uri("wamp.close.goodbye_and_out"),
                        }),
                    );
                }
            }
            Message::Abort(_) => state.end_session(connection),
            Message::Subscribe(message) => {
                let topic = message.topic.as_ref().to_owned();
                let subscription = match state.topics.get(&topic) {
                    Some((subscription, _)) => *subscription,
                    None => {
                        let subscription = state.next_id();
                        state
                            .topics
                            .insert(topic.clone(), (subscription, HashSet::default()));
                        subscription
                    }
                };
                if let Some((_, subscribers)) = state.topics.get_mut(&topic) {
                    subscribers.insert(connection);
                }
                state.send(
                    connection,
                    Message::Subscribed(SubscribedMessage {
                        subscribe_request: message.request,
                        subscription,
                    }),
                );
            }
            Message::Unsubscribe(message) => {
                let removed = state
                    .topics
                    .values_mut()
                    .find(|(subscription, _)| *subscription == message.subscribed_subscription)
                    .is_some_and(|(_, subscribers)| subscribers.remove(&connection));
                if removed {
                    state.send(
                        connection,
                        Message::Unsubscribed(UnsubscribedMessage {
                            unsubscribe_request: message.request,
                        }),
                    );
                } else {
                    state.send(
                        connection,
                        error(
                            Message::UNSUBSCRIBE_TAG,
                            message.request,
                            "wamp.error.no_such_subscription",
                        ),
                    );
                }
            }
            Message::Publish(message) => {
                let publication = state.next_id();
                let exclude_me = message
                    .options
                    .get("exclude_me")
                    .and_then(Value::bool)
                    .unwrap_or(true);
                let topic = message.topic.as_ref().to_owned();
                state
                    .publications
                    .push((topic.clone(), message.arguments.clone()));
                if let Some((subscription, subscribers)) = state.topics.get(&topic) {
                    for subscriber in subscribers {
                        if exclude_me && *subscriber == connection {
                            continue;
                        }
                        state.send(
                            *subscriber,
                            Message::Event(EventMessage {
                                subscribed_subscription: *subscription,
                                published_publication: publication,
                                details: Dictionary::default(),
                                publish_arguments: message.arguments.clone(),
                                publish_arguments_keyword: message.arguments_keyword.clone(),
                            }),
                        );
                    }
                }
                if message
                    .options
                    .get("acknowledge")
                    .and_then(Value::bool)
                    .unwrap_or(false)
                {
                    state.send(
                        connection,
                        Message::Published(PublishedMessage {
                            publish_request: message.request,
                            publication,
                        }),
                    );
                }
            }
            Message::Register(message) => {
                let procedure = message.procedure.as_ref().to_owned();
                if state.procedures.contains_key(&procedure) {
                    state.send(
                        connection,
                        error(
                            Message::REGISTER_TAG,
                            message.request,
                            "wamp.error.procedure_already_exists",
                        ),
                    );
                    return;
                }
                let registration = state.next_id();
                state
                    .procedures
                    .insert(procedure, (registration, connection));
                state.send(
                    connection,
                    Message::Registered(RegisteredMessage {
                        register_request: message.request,
                        registration,
                    }),
                );
            }
            Message::Unregister(message) => {
                let before = state.procedures.len();
                state.procedures.retain(|_, (registration, callee)| {
                    *registration != message.registered_registration || *callee != connection
                });
                if state.procedures.len() == before {
                    state.send(
                        connection,
                        error(
                            Message::UNREGISTER_TAG,
                            message.request,
                            "wamp.error.no_such_registration",
                        ),
                    );
                    return;
                }
                state.send(
                    connection,
                    Message::Unregistered(UnregisteredMessage {
                        unregister_request: message.request,
                    }),
                );
            }
            Message::Call(message) => {
                let (registration, callee) =
                    match state.procedures.get(message.procedure.as_ref()) {
                        Some(registered) => *registered,
                        None => {
                            state.send(
                                connection,
                                error(
                                    Message::CALL_TAG,
                                    message.request,
                                    "wamp.error.no_such_procedure",
                                ),
                            );
                            return;
                        }
                    };
                let invocation = state.next_id();
                state.invocations.insert(
                    invocation,
                    ActiveInvocation {
                        caller: connection,
                        call_request: message.request,
                        callee,
                    },
                );
                let mut details = Dictionary::default();
                for key in ["receive_progress", "timeout"] {
                    if let Some(value) = message.options.get(key) {
                        details.insert(key.to_owned(), value.clone());
                    }
                }
                state.send(
                    callee,
                    Message::Invocation(InvocationMessage {
                        request: invocation,
                        registered_registration: registration,
                        details,
                        call_arguments: message.arguments,
                        call_arguments_keyword: message.arguments_keyword,
                    }),
                );
            }
            Message::Yield(message) => {
                let progress = message
                    .options
                    .get("progress")
                    .and_then(Value::bool)
                    .unwrap_or(false);
                let (caller, call_request) = match state.invocations.get(&message.invocation_request)
                {
                    Some(invocation) => (invocation.caller, invocation.call_request),
                    None => return,
                };
                if !progress {
                    state.invocations.remove(&message.invocation_request);
                }
                let mut details = Dictionary::default();
                if progress {
                    details.insert("progress".to_owned(), Value::Bool(true));
                }
                state.send(
                    caller,
                    Message::Result(ResultMessage {
                        call_request,
                        details,
                        yield_arguments: message.arguments,
                        yield_arguments_keyword: message.arguments_keyword,
                    }),
                );
            }
            Message::Error(message) if message.request_type == Message::INVOCATION_TAG => {
                if let Some(invocation) = state.invocations.remove(&message.request) {
                    state.send(
                        invocation.caller,
                        Message::Error(ErrorMessage {
                            request_type: Message::CALL_TAG,
                            request: invocation.call_request,
                            ..message
                        }),
                    );
                }
            }
            Message::Cancel(message) => {
                let invocation = state
                    .invocations
                    .iter()
                    .find(|(_, invocation)| {
                        invocation.caller == connection
                            && invocation.call_request == message.call_request
                    })
                    .map(|(invocation, _)| *invocation);
                let invocation = match invocation {
                    Some(invocation) => invocation,
                    None => return,
                };
                let mode = message
                    .options
                    .get("mode")
                    .and_then(Value::string)
                    .unwrap_or("killnowait")
                    .to_owned();
                if let Some(active) = state.invocations.remove(&invocation) {
                    if mode != "skip" {
                        state.send(
                            active.callee,
                            Message::Interrupt(InterruptMessage {
                                invocation_request: invocation,
                                options: Dictionary::from_iter([(
                                    "mode".to_owned(),
                                    Value::String(mode),
                                )]),
                            }),
                        );
                    }
                }
                state.send(
                    connection,
                    error(Message::CALL_TAG, message.call_request, "wamp.error.canceled"),
                );
            }
            _ => (),
        }
    }

    fn hello(&self, state: &mut RouterState, connection: u64, details: &Dictionary) {
        let offered = |method: &str| {
            details
                .get("authmethods")
                .and_then(Value::list)
                .is_some_and(|methods| methods.iter().any(|offered| offered.string() == Some(method)))
        };
        match &self.auth {
            None => self.welcome(state, connection, "anonymous", "anonymous", "anonymous"),
            Some(RouterAuth::Ticket { .. }) => {
                if !offered("ticket") {
                    state.send(connection, abort("wamp.error.authentication_denied"));
                    return;
                }
                state.send(
                    connection,
                    Message::Challenge(ChallengeMessage {
                        auth_method: AuthMethod::Ticket,
                        extra: Dictionary::default(),
                    }),
                );
            }
            Some(RouterAuth::Cryptosign { public_key, .. }) => {
                let pubkey = details
                    .get("authextra")
                    .and_then(Value::dictionary)
                    .and_then(|extra| extra.get("pubkey"))
                    .and_then(Value::string);
                if !offered("cryptosign") || pubkey != Some(to_hex(public_key.as_bytes()).as_str()) {
                    state.send(connection, abort("wamp.error.authentication_denied"));
                    return;
                }
                let challenge = rand::random::<[u8; 32]>().to_vec();
                let extra = Dictionary::from_iter([
                    ("challenge".to_owned(), Value::String(to_hex(&challenge))),
                    ("channel_binding".to_owned(), Value::Null),
                ]);
                if let Some(connection) = state.connections.get_mut(&connection) {
                    connection.challenge = Some(challenge);
                }
                state.send(
                    connection,
                    Message::Challenge(ChallengeMessage {
                        auth_method: AuthMethod::Cryptosign,
                        extra,
                    }),
                );
            }
        }
    }

    fn authenticate(&self, state: &mut RouterState, connection: u64, signature: &str) {
        let authenticated = match &self.auth {
            None => None,
            Some(RouterAuth::Ticket { id, ticket }) => {
                (signature == ticket.as_str()).then(|| (id.clone(), "ticket"))
            }
            Some(RouterAuth::Cryptosign { id, public_key }) => {
                let challenge = state
                    .connections
                    .get(&connection)
                    .and_then(|connection| connection.challenge.clone());
                match challenge {
                    Some(challenge) => verify_cryptosign(public_key, &challenge, signature)
                        .is_ok()
                        .then(|| (id.clone(), "cryptosign")),
                    None => None,
                }
            }
        };
        match authenticated {
            Some((id, method)) => self.welcome(state, connection, &id, "user", method),
            None => state.send(connection, abort("wamp.error.authentication_failed")),
        }
    }

    fn welcome(
        &self,
        state: &mut RouterState,
        connection: u64,
        authid: &str,
        authrole: &str,
        authmethod: &str,
    ) {
        let session = state.next_id();
        if let Some(connection) = state.connections.get_mut(&connection) {
            connection.session = Some(session);
            connection.challenge = None;
        }
        let details = Dictionary::from_iter([
            ("authid".to_owned(), Value::from(authid)),
            ("authrole".to_owned(), Value::from(authrole)),
            ("authmethod".to_owned(), Value::from(authmethod)),
            ("authprovider".to_owned(), Value::from("static")),
            (
                "roles".to_owned(),
                Value::Dictionary(Dictionary::from_iter([
                    ("broker".to_owned(), Value::Dictionary(Dictionary::default())),
                    ("dealer".to_owned(), Value::Dictionary(Dictionary::default())),
                ])),
            ),
        ]);
        state.send(
            connection,
            Message::Welcome(WelcomeMessage { session, details }),
        );
    }
}

fn verify_cryptosign(public_key: &VerifyingKey, challenge: &[u8], signature: &str) -> Result<()> {
    let signed = from_hex(signature)?;
    if signed.len() != 64 + challenge.len() || &signed[64..] != challenge {
        return Err(Error::msg("signed message does not match the challenge"));
    }
    let signature = Signature::from_slice(&signed[..64])?;
    public_key.verify(challenge, &signature)?;
    Ok(())
}

pub fn create_peer(name: &str) -> Result<WebSocketPeer> {
    let mut config = PeerConfig::default();
    config.name = name.to_owned();
    new_web_socket_peer(config)
}

/// Creates a peer connected to the router, but not joined to any realm.
pub async fn connect_peer(router: &TestRouter, name: &str) -> Result<WebSocketPeer> {
    let peer = create_peer(name)?;
    peer.direct_connect(router.connect().await).await?;
    Ok(peer)
}

/// Creates a peer joined to the router's realm.
pub async fn join_peer(router: &TestRouter, name: &str) -> Result<WebSocketPeer> {
    let peer = connect_peer(router, name).await?;
    peer.join_realm(REALM).await?;
    Ok(peer)
}

/// A transport whose frames are exchanged over channels, for feeding raw data to a peer.
#[derive(Debug)]
pub struct ChannelTransport {
    incoming_rx: UnboundedReceiver<TransportData>,
    outgoing_tx: UnboundedSender<TransportData>,
}

impl ChannelTransport {
    /// Creates the transport, along with the channels for data received and sent by the peer.
    pub fn new() -> (
        Self,
        UnboundedSender<TransportData>,
        UnboundedReceiver<TransportData>,
    ) {
        let (incoming_tx, incoming_rx) = unbounded_channel();
        let (outgoing_tx, outgoing_rx) = unbounded_channel();
        (
            Self {
                incoming_rx,
                outgoing_tx,
            },
            incoming_tx,
            outgoing_rx,
        )
    }
}

impl Transport for ChannelTransport {}

impl Stream for ChannelTransport {
    type Item = Result<TransportData>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        self.incoming_rx.poll_recv(cx).map(|data| data.map(Ok))
    }
}

impl Sink<TransportData> for ChannelTransport {
    type Error = Error;

    fn poll_ready(
        self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> task::Poll<Result<(), Self::Error>> {
        task::Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: TransportData) -> Result<(), Self::Error> {
        self.outgoing_tx.send(item).map_err(Error::new)
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> task::Poll<Result<(), Self::Error>> {
        task::Poll::Ready(Ok(()))
    }

    fn poll_close(
        self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> task::Poll<Result<(), Self::Error>> {
        task::Poll::Ready(Ok(()))
    }
}
