use std::{
    fmt::Display,
    sync::Arc,
};

use anyhow::{
    Error,
    Result,
};
use log::{
    debug,
    error,
    info,
    trace,
    warn,
};
use tokio::sync::{
    mpsc::{
        UnboundedReceiver,
        UnboundedSender,
    },
    oneshot,
};

use crate::{
    auth::{
        AuthenticationFlow,
        Identity,
    },
    core::{
        cancel::CallCancelMode,
        close::CloseReason,
        error::{
            BasicError,
            InteractionError,
            SessionError,
            error_from_message,
        },
        id::{
            Id,
            IdAllocator,
            SequentialIdAllocator,
        },
        invocation_policy::InvocationPolicy,
        types::{
            Dictionary,
            HashMap,
            Integer,
            Value,
        },
        uri::{
            Uri,
            WildcardUri,
        },
    },
    message::{
        common::{
            abort_message_for_error,
            goodbye_and_out,
            goodbye_with_close_reason,
        },
        message::{
            AbortMessage,
            CallMessage,
            CancelMessage,
            ErrorMessage,
            HelloMessage,
            Message,
            PublishMessage,
            RegisterMessage,
            SubscribeMessage,
            UnregisterMessage,
            UnsubscribeMessage,
        },
    },
    peer::{
        dispatcher::CallDispatcher,
        handler::{
            EventHandler,
            ProcedureHandler,
        },
        peer::{
            Procedure,
            ProcedureOptions,
            PublishedEvent,
            RpcCall,
            RpcResult,
            Subscription,
            SubscriptionOptions,
        },
        registration::{
            RegisteredProcedure,
            RegistrationTable,
        },
        subscription::SubscriptionTable,
    },
};

/// The lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No realm is joined.
    Closed,
    /// HELLO was sent, and the router has not answered yet.
    Connecting,
    /// The router challenged the peer to authenticate.
    Authenticating,
    /// The router welcomed the peer into the realm.
    Joined,
    /// GOODBYE was sent, and the router has not answered yet.
    Leaving,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Joined => "joined",
            Self::Leaving => "leaving",
        }
    }
}

impl Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
enum SessionState {
    #[default]
    Closed,
    Connecting {
        realm: Uri,
    },
    Authenticating {
        realm: Uri,
    },
    Joined {
        realm: Uri,
        session_id: Id,
        identity: Identity,
    },
    Leaving {
        realm: Uri,
        session_id: Id,
    },
}

impl SessionState {
    fn phase(&self) -> SessionPhase {
        match self {
            Self::Closed => SessionPhase::Closed,
            Self::Connecting { .. } => SessionPhase::Connecting,
            Self::Authenticating { .. } => SessionPhase::Authenticating,
            Self::Joined { .. } => SessionPhase::Joined,
            Self::Leaving { .. } => SessionPhase::Leaving,
        }
    }

    fn realm(&self) -> Option<&Uri> {
        match self {
            Self::Closed => None,
            Self::Connecting { realm }
            | Self::Authenticating { realm }
            | Self::Joined { realm, .. }
            | Self::Leaving { realm, .. } => Some(realm),
        }
    }

    fn allowed_state_transition(&self, next: &Self) -> bool {
        match (self, next) {
            (Self::Closed, Self::Connecting { .. }) => true,
            (Self::Connecting { .. }, Self::Authenticating { .. }) => true,
            (Self::Connecting { .. }, Self::Joined { .. }) => true,
            (Self::Authenticating { .. }, Self::Joined { .. }) => true,
            (Self::Joined { .. }, Self::Leaving { .. }) => true,
            (_, Self::Closed) => true,
            _ => false,
        }
    }
}

/// A request waiting for the router's acknowledgement.
enum PendingRequest {
    Subscribe {
        topic: WildcardUri,
        handler: Arc<dyn EventHandler>,
        subscribed_tx: oneshot::Sender<Result<Subscription>>,
    },
    Unsubscribe {
        unsubscribed_tx: oneshot::Sender<Result<()>>,
    },
    Publish {
        published_tx: oneshot::Sender<Result<Id>>,
    },
    Register {
        procedure: WildcardUri,
        handler: Arc<dyn ProcedureHandler>,
        options: ProcedureOptions,
        registered_tx: oneshot::Sender<Result<Procedure>>,
    },
    Unregister {
        registration: Id,
        unregistered_tx: oneshot::Sender<Result<()>>,
    },
}

impl PendingRequest {
    /// The type of the request message, as reported back in ERROR.
    fn request_type(&self) -> Integer {
        match self {
            Self::Subscribe { .. } => Message::SUBSCRIBE_TAG,
            Self::Unsubscribe { .. } => Message::UNSUBSCRIBE_TAG,
            Self::Publish { .. } => Message::PUBLISH_TAG,
            Self::Register { .. } => Message::REGISTER_TAG,
            Self::Unregister { .. } => Message::UNREGISTER_TAG,
        }
    }

    fn fail(self, error: Error) {
        match self {
            Self::Subscribe { subscribed_tx, .. } => subscribed_tx.send(Err(error)).ok(),
            Self::Unsubscribe { unsubscribed_tx } => unsubscribed_tx.send(Err(error)).ok(),
            Self::Publish { published_tx } => published_tx.send(Err(error)).ok(),
            Self::Register { registered_tx, .. } => registered_tx.send(Err(error)).ok(),
            Self::Unregister {
                unregistered_tx, ..
            } => unregistered_tx.send(Err(error)).ok(),
        };
    }
}

struct PendingJoin {
    flow: AuthenticationFlow,
    join_tx: oneshot::Sender<Result<Id>>,
}

/// The client side of a WAMP session.
///
/// Owns the realm membership and every table of in-flight requests, registrations, and
/// subscriptions. All messages from the router pass through [`Session::handle_message`] in
/// arrival order. Operations return channels that resolve when the router answers, so the session
/// itself never waits on the router.
pub(crate) struct Session {
    name: String,
    message_tx: UnboundedSender<Message>,
    enforce_timeouts: bool,

    state: SessionState,
    id_allocator: SequentialIdAllocator,
    dispatcher: CallDispatcher,
    pending: HashMap<Id, PendingRequest>,
    registrations: RegistrationTable,
    subscriptions: SubscriptionTable,

    join: Option<PendingJoin>,
    leave_waiters: Vec<oneshot::Sender<()>>,
}

impl Session {
    /// Creates a new session, which sends messages over the given channel.
    pub fn new(name: String, message_tx: UnboundedSender<Message>, enforce_timeouts: bool) -> Self {
        Self {
            name,
            message_tx,
            enforce_timeouts,
            state: SessionState::default(),
            id_allocator: SequentialIdAllocator::default(),
            dispatcher: CallDispatcher::default(),
            pending: HashMap::default(),
            registrations: RegistrationTable::default(),
            subscriptions: SubscriptionTable::default(),
            join: None,
            leave_waiters: Vec::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    /// The session ID assigned by the router.
    pub fn session_id(&self) -> Option<Id> {
        match &self.state {
            SessionState::Joined { session_id, .. } | SessionState::Leaving { session_id, .. } => {
                Some(*session_id)
            }
            _ => None,
        }
    }

    /// The identity the session was authenticated as.
    pub fn identity(&self) -> Option<Identity> {
        match &self.state {
            SessionState::Joined { identity, .. } => Some(identity.clone()),
            _ => None,
        }
    }

    fn transition_state(&mut self, state: SessionState) -> Result<()> {
        if !self.state.allowed_state_transition(&state) {
            return Err(BasicError::Internal(format!(
                "invalid state transition from {} to {}",
                self.state.phase(),
                state.phase()
            ))
            .into());
        }
        trace!(
            "Peer {} transitioned from {:?} to {state:?}",
            self.name, self.state
        );
        self.state = state;
        Ok(())
    }

    fn send(&self, message: Message) -> Result<()> {
        trace!("Peer {} sending message: {message:?}", self.name);
        self.message_tx.send(message).map_err(|_| {
            SessionError::TransportLost("message service is no longer running".to_owned()).into()
        })
    }

    fn ensure_joined(&self, operation: &'static str) -> Result<()> {
        match self.state {
            SessionState::Joined { .. } => Ok(()),
            _ => Err(SessionError::InvalidState {
                operation,
                state: self.state.phase().as_str(),
            }
            .into()),
        }
    }

    async fn next_request_id(&self) -> Id {
        loop {
            let id = self.id_allocator.generate_id().await;
            if !self.dispatcher.in_use(id) && !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    fn send_request(&mut self, request: Id, pending: PendingRequest, message: Message) -> Result<()> {
        self.pending.insert(request, pending);
        if let Err(err) = self.send(message) {
            if let Some(PendingRequest::Register { procedure, .. }) = self.pending.remove(&request)
            {
                self.registrations.release(&procedure);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Starts joining a realm by sending HELLO.
    ///
    /// The returned channel resolves with the session ID once the router welcomes the peer, or with
    /// the reason the join failed.
    pub async fn join(
        &mut self,
        mut hello: HelloMessage,
        flow: AuthenticationFlow,
    ) -> Result<oneshot::Receiver<Result<Id>>> {
        if !matches!(self.state, SessionState::Closed) {
            return Err(SessionError::InvalidState {
                operation: "join",
                state: self.state.phase().as_str(),
            }
            .into());
        }
        flow.embed_into_hello_message(&mut hello).await?;
        self.id_allocator.reset().await;
        self.transition_state(SessionState::Connecting {
            realm: hello.realm.clone(),
        })?;

        let (join_tx, join_rx) = oneshot::channel();
        self.join = Some(PendingJoin { flow, join_tx });
        if let Err(err) = self.send(Message::Hello(hello)) {
            self.close(|| {
                SessionError::TransportLost("message service is no longer running".to_owned())
                    .into()
            });
            return Err(err);
        }
        Ok(join_rx)
    }

    /// Starts leaving the realm.
    ///
    /// Every in-flight request fails with [`SessionError::Closing`]. The returned channel resolves
    /// when the session is closed. Returns [`None`] if the session is already closed.
    pub fn leave(&mut self, reason: CloseReason) -> Option<oneshot::Receiver<()>> {
        match self.state.phase() {
            SessionPhase::Closed => return None,
            SessionPhase::Connecting | SessionPhase::Authenticating => {
                self.send(Message::Abort(AbortMessage {
                    details: Dictionary::default(),
                    reason: reason.uri(),
                    ..Default::default()
                }))
                .ok();
                self.close(|| SessionError::Closing.into());
                return None;
            }
            SessionPhase::Joined => {
                if let SessionState::Joined {
                    realm, session_id, ..
                } = &self.state
                {
                    let next = SessionState::Leaving {
                        realm: realm.clone(),
                        session_id: *session_id,
                    };
                    if let Err(err) = self.transition_state(next) {
                        error!("Peer {} failed to leave: {err:#}", self.name);
                    }
                }
                self.drain(|| SessionError::Closing.into());
                if let Err(err) = self.send(goodbye_with_close_reason(reason)) {
                    warn!("Peer {} could not send GOODBYE: {err:#}", self.name);
                    self.close(|| SessionError::TransportLost(err.to_string()).into());
                    return None;
                }
            }
            SessionPhase::Leaving => (),
        }
        let (leave_tx, leave_rx) = oneshot::channel();
        self.leave_waiters.push(leave_tx);
        Some(leave_rx)
    }

    /// Calls a procedure.
    ///
    /// Returns the request ID, which identifies the call for cancellation, and the channel its
    /// results are delivered on.
    pub async fn call(
        &mut self,
        procedure: Uri,
        rpc_call: RpcCall,
        receive_progress: bool,
    ) -> Result<(Id, UnboundedReceiver<Result<RpcResult>>)> {
        self.ensure_joined("call")?;
        let request = self.next_request_id().await;
        let mut options = Dictionary::default();
        if receive_progress {
            options.insert("receive_progress".to_owned(), Value::Bool(true));
        }
        if let Some(timeout) = rpc_call.timeout {
            options.insert(
                "timeout".to_owned(),
                Value::Integer(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
            );
        }
        let result_rx = self.dispatcher.insert(request, receive_progress);
        if let Err(err) = self.send(Message::Call(CallMessage {
            request,
            options,
            procedure,
            arguments: rpc_call.arguments,
            arguments_keyword: rpc_call.arguments_keyword,
        })) {
            self.dispatcher.remove(request);
            return Err(err);
        }
        Ok((request, result_rx))
    }

    /// Cancels an outstanding call.
    ///
    /// The call resolves with [`InteractionError::Canceled`] right away. CANCEL is only sent if
    /// the call was still outstanding.
    pub fn cancel(&mut self, request: Id, mode: CallCancelMode) -> Result<()> {
        if !self.dispatcher.cancel(request) {
            return Ok(());
        }
        debug!("Peer {} canceled call {request} ({mode})", self.name);
        self.send(Message::Cancel(CancelMessage {
            call_request: request,
            options: Dictionary::from_iter([(
                "mode".to_owned(),
                Value::String(mode.as_str().to_owned()),
            )]),
        }))
    }

    /// Subscribes a handler to a topic.
    pub async fn subscribe(
        &mut self,
        topic: WildcardUri,
        options: &SubscriptionOptions,
        handler: Arc<dyn EventHandler>,
    ) -> Result<oneshot::Receiver<Result<Subscription>>> {
        self.ensure_joined("subscribe")?;
        let request = self.next_request_id().await;
        let mut message_options = Dictionary::default();
        if let Some(match_style) = options.match_style {
            message_options.insert(
                "match".to_owned(),
                Value::String(match_style.as_str().to_owned()),
            );
        }
        let (subscribed_tx, subscribed_rx) = oneshot::channel();
        self.send_request(
            request,
            PendingRequest::Subscribe {
                topic: topic.clone(),
                handler,
                subscribed_tx,
            },
            Message::Subscribe(SubscribeMessage {
                request,
                options: message_options,
                topic,
            }),
        )?;
        Ok(subscribed_rx)
    }

    /// Removes a subscribed handler.
    ///
    /// The handler stops receiving events immediately. If it was the last handler for the router
    /// subscription, UNSUBSCRIBE is sent and the returned channel resolves when the router
    /// confirms.
    pub async fn unsubscribe(
        &mut self,
        subscription: &Subscription,
    ) -> Result<Option<oneshot::Receiver<Result<()>>>> {
        self.ensure_joined("unsubscribe")?;
        if !self
            .subscriptions
            .remove_handler(subscription.id, subscription.handler_id)?
        {
            return Ok(None);
        }
        let request = self.next_request_id().await;
        let (unsubscribed_tx, unsubscribed_rx) = oneshot::channel();
        self.send_request(
            request,
            PendingRequest::Unsubscribe { unsubscribed_tx },
            Message::Unsubscribe(UnsubscribeMessage {
                request,
                subscribed_subscription: subscription.id,
            }),
        )?;
        Ok(Some(unsubscribed_rx))
    }

    /// Publishes an event to a topic.
    ///
    /// Only acknowledged publications return a channel, which resolves with the publication ID.
    pub async fn publish(
        &mut self,
        topic: Uri,
        event: PublishedEvent,
    ) -> Result<Option<oneshot::Receiver<Result<Id>>>> {
        self.ensure_joined("publish")?;
        let request = self.next_request_id().await;
        let message = Message::Publish(PublishMessage {
            request,
            options: event.options.to_dictionary(),
            topic,
            arguments: event.arguments,
            arguments_keyword: event.arguments_keyword,
        });
        if !event.options.acknowledge {
            self.send(message)?;
            return Ok(None);
        }
        let (published_tx, published_rx) = oneshot::channel();
        self.send_request(request, PendingRequest::Publish { published_tx }, message)?;
        Ok(Some(published_rx))
    }

    /// Registers a procedure handler.
    ///
    /// Fails right away if the session already registered the same procedure.
    pub async fn register(
        &mut self,
        procedure: WildcardUri,
        options: ProcedureOptions,
        handler: Arc<dyn ProcedureHandler>,
    ) -> Result<oneshot::Receiver<Result<Procedure>>> {
        self.ensure_joined("register")?;
        self.registrations.reserve(&procedure)?;
        let request = self.next_request_id().await;
        let mut message_options = Dictionary::default();
        if let Some(match_style) = options.match_style {
            message_options.insert(
                "match".to_owned(),
                Value::String(match_style.as_str().to_owned()),
            );
        }
        if options.invocation_policy != InvocationPolicy::Single {
            message_options.insert(
                "invoke".to_owned(),
                Value::String(options.invocation_policy.as_str().to_owned()),
            );
        }
        if options.disclose_caller {
            message_options.insert("disclose_caller".to_owned(), Value::Bool(true));
        }
        let (registered_tx, registered_rx) = oneshot::channel();
        self.send_request(
            request,
            PendingRequest::Register {
                procedure: procedure.clone(),
                handler,
                options,
                registered_tx,
            },
            Message::Register(RegisterMessage {
                request,
                options: message_options,
                procedure,
            }),
        )?;
        Ok(registered_rx)
    }

    /// Unregisters a procedure.
    ///
    /// The procedure keeps serving invocations until the router confirms.
    pub async fn unregister(
        &mut self,
        procedure: &Procedure,
    ) -> Result<oneshot::Receiver<Result<()>>> {
        self.ensure_joined("unregister")?;
        if !self.registrations.contains(procedure.id) {
            return Err(InteractionError::NoSuchRegistration.into());
        }
        let request = self.next_request_id().await;
        let (unregistered_tx, unregistered_rx) = oneshot::channel();
        self.send_request(
            request,
            PendingRequest::Unregister {
                registration: procedure.id,
                unregistered_tx,
            },
            Message::Unregister(UnregisterMessage {
                request,
                registered_registration: procedure.id,
            }),
        )?;
        Ok(unregistered_rx)
    }

    /// Handles a message from the router.
    pub async fn handle_message(&mut self, message: Message) {
        trace!("Peer {} received message: {message:?}", self.name);
        match self.state.phase() {
            SessionPhase::Closed => {
                warn!(
                    "Peer {} dropped {} message received without a session",
                    self.name,
                    message.message_name()
                );
            }
            SessionPhase::Connecting | SessionPhase::Authenticating => {
                if let Err(err) = self.handle_joining_message(message).await {
                    self.fail_join(err);
                }
            }
            SessionPhase::Joined => {
                if let Err(err) = self.handle_joined_message(message) {
                    error!("Peer {} is aborting its session: {err:#}", self.name);
                    self.send(abort_message_for_error(&err)).ok();
                    let reason = Uri::for_error(&err);
                    self.close(|| {
                        SessionError::Closed {
                            reason: reason.clone(),
                        }
                        .into()
                    });
                }
            }
            SessionPhase::Leaving => self.handle_leaving_message(message),
        }
    }

    async fn handle_joining_message(&mut self, message: Message) -> Result<()> {
        let join = self
            .join
            .as_mut()
            .ok_or_else(|| BasicError::Internal("session has no pending join".to_owned()))?;
        match message {
            Message::Challenge(challenge) => {
                let response = join.flow.handle_challenge(&challenge).await?;
                if let SessionState::Connecting { realm } = &self.state {
                    let next = SessionState::Authenticating {
                        realm: realm.clone(),
                    };
                    self.transition_state(next)?;
                }
                debug!(
                    "Peer {} answering {} challenge",
                    self.name, challenge.auth_method
                );
                self.send(Message::Authenticate(response))
            }
            Message::Welcome(welcome) => {
                let identity = join.flow.accept(&welcome).await?;
                let realm = self
                    .state
                    .realm()
                    .cloned()
                    .ok_or_else(|| BasicError::Internal("joining session has no realm".to_owned()))?;
                info!(
                    "Peer {} joined realm {realm} as session {}",
                    self.name, welcome.session
                );
                self.transition_state(SessionState::Joined {
                    realm,
                    session_id: welcome.session,
                    identity,
                })?;
                if let Some(join) = self.join.take() {
                    join.join_tx.send(Ok(welcome.session)).ok();
                }
                Ok(())
            }
            Message::Abort(abort) => {
                join.flow.reject();
                let reason = abort.reason.clone();
                let err = error_from_message(&Message::Abort(abort))?;
                warn!("Peer {} was refused by the router: {err:#}", self.name);
                if let Some(join) = self.join.take() {
                    join.join_tx.send(Err(err)).ok();
                }
                self.close(|| {
                    SessionError::Closed {
                        reason: reason.clone(),
                    }
                    .into()
                });
                Ok(())
            }
            message => Err(InteractionError::ProtocolViolation(format!(
                "received {} message while joining a realm",
                message.message_name()
            ))
            .into()),
        }
    }

    fn fail_join(&mut self, error: Error) {
        error!("Peer {} failed to join realm: {error:#}", self.name);
        self.send(abort_message_for_error(&error)).ok();
        let reason = Uri::for_error(&error);
        if let Some(mut join) = self.join.take() {
            join.flow.reject();
            join.join_tx.send(Err(error)).ok();
        }
        self.close(|| {
            SessionError::Closed {
                reason: reason.clone(),
            }
            .into()
        });
    }

    fn handle_joined_message(&mut self, message: Message) -> Result<()> {
        match message {
            Message::Result(message) => self.dispatcher.handle_result(&self.name, message),
            Message::Error(message) => match message.request_type {
                Message::CALL_TAG => self.dispatcher.handle_error(&self.name, message),
                _ => self.handle_request_error(message),
            },
            Message::Subscribed(message) => {
                if let Some(PendingRequest::Subscribe {
                    topic,
                    handler,
                    subscribed_tx,
                }) = self.take_pending(message.subscribe_request, Message::SUBSCRIBE_TAG)
                {
                    let handler_id =
                        self.subscriptions
                            .insert(message.subscription, topic, handler);
                    subscribed_tx
                        .send(Ok(Subscription {
                            id: message.subscription,
                            handler_id,
                        }))
                        .ok();
                }
            }
            Message::Unsubscribed(message) => {
                if let Some(PendingRequest::Unsubscribe { unsubscribed_tx }) =
                    self.take_pending(message.unsubscribe_request, Message::UNSUBSCRIBE_TAG)
                {
                    unsubscribed_tx.send(Ok(())).ok();
                }
            }
            Message::Published(message) => {
                if let Some(PendingRequest::Publish { published_tx }) =
                    self.take_pending(message.publish_request, Message::PUBLISH_TAG)
                {
                    published_tx.send(Ok(message.publication)).ok();
                }
            }
            Message::Registered(message) => {
                if let Some(PendingRequest::Register {
                    procedure,
                    handler,
                    options,
                    registered_tx,
                }) = self.take_pending(message.register_request, Message::REGISTER_TAG)
                {
                    debug!(
                        "Peer {} registered {procedure} as registration {}",
                        self.name, message.registration
                    );
                    self.registrations.insert(
                        message.registration,
                        RegisteredProcedure {
                            procedure,
                            handler,
                            options,
                        },
                    );
                    registered_tx
                        .send(Ok(Procedure {
                            id: message.registration,
                        }))
                        .ok();
                }
            }
            Message::Unregistered(message) => {
                if let Some(PendingRequest::Unregister {
                    registration,
                    unregistered_tx,
                }) = self.take_pending(message.unregister_request, Message::UNREGISTER_TAG)
                {
                    self.registrations.remove(registration);
                    unregistered_tx.send(Ok(())).ok();
                }
            }
            Message::Event(message) => self.subscriptions.dispatch(&self.name, message),
            Message::Invocation(message) => self.registrations.invoke(
                &self.name,
                message,
                &self.message_tx,
                self.enforce_timeouts,
            ),
            Message::Interrupt(message) => {
                if !self.registrations.interrupt(message.invocation_request) {
                    debug!(
                        "Peer {} ignored INTERRUPT for invocation {}, which already finished",
                        self.name, message.invocation_request
                    );
                }
            }
            Message::Goodbye(message) => {
                info!(
                    "Peer {} was asked to leave by the router: {}",
                    self.name, message.reason
                );
                self.send(goodbye_and_out()).ok();
                self.close(|| {
                    SessionError::Closed {
                        reason: message.reason.clone(),
                    }
                    .into()
                });
            }
            Message::Abort(message) => {
                warn!(
                    "Peer {} session was aborted by the router: {}",
                    self.name, message.reason
                );
                self.close(|| {
                    SessionError::Closed {
                        reason: message.reason.clone(),
                    }
                    .into()
                });
            }
            message => {
                return Err(InteractionError::ProtocolViolation(format!(
                    "received {} message on an established session",
                    message.message_name()
                ))
                .into());
            }
        }
        Ok(())
    }

    fn handle_leaving_message(&mut self, message: Message) {
        match message {
            Message::Goodbye(_) | Message::Abort(_) => {
                info!("Peer {} left the realm", self.name);
                self.close(|| SessionError::Closing.into());
            }
            message => debug!(
                "Peer {} dropped {} message while leaving",
                self.name,
                message.message_name()
            ),
        }
    }

    fn take_pending(&mut self, request: Id, request_type: Integer) -> Option<PendingRequest> {
        match self.pending.get(&request) {
            Some(pending) if pending.request_type() == request_type => {
                self.pending.remove(&request)
            }
            Some(_) => {
                warn!(
                    "Peer {} dropped response of type {request_type} for request {request}, which is of a different type",
                    self.name
                );
                None
            }
            None => {
                warn!(
                    "Peer {} dropped response for unknown request {request}",
                    self.name
                );
                None
            }
        }
    }

    fn handle_request_error(&mut self, message: ErrorMessage) {
        let pending = match self.take_pending(message.request, message.request_type) {
            Some(pending) => pending,
            None => return,
        };
        if let PendingRequest::Register { procedure, .. } = &pending {
            self.registrations.release(procedure);
        }
        let error = error_from_message(&Message::Error(message)).unwrap_or_else(|err| err);
        pending.fail(error);
    }

    /// Fails every in-flight request and drops all registrations and subscriptions.
    fn drain<F>(&mut self, error: F)
    where
        F: Fn() -> Error,
    {
        self.dispatcher.fail_all(&error);
        for (_, pending) in self.pending.drain() {
            pending.fail(error());
        }
        self.registrations.clear();
        self.subscriptions.clear();
    }

    /// Closes the session after the router sent a message that could not be understood.
    ///
    /// A pending join fails with the protocol error itself. Everything else fails as closed with
    /// the matching reason.
    pub fn close_for_protocol_violation(&mut self, error: Error) {
        let reason = Uri::for_error(&error);
        if let Some(mut join) = self.join.take() {
            join.flow.reject();
            join.join_tx.send(Err(error)).ok();
        }
        self.close(|| {
            SessionError::Closed {
                reason: reason.clone(),
            }
            .into()
        });
    }

    /// Closes the session, resolving everything that depends on it.
    ///
    /// Closing a closed session does nothing.
    pub fn close<F>(&mut self, error: F)
    where
        F: Fn() -> Error,
    {
        if matches!(self.state, SessionState::Closed) {
            return;
        }
        if let Some(mut join) = self.join.take() {
            join.flow.reject();
            join.join_tx.send(Err(error())).ok();
        }
        self.drain(&error);
        for leave_tx in self.leave_waiters.drain(..) {
            leave_tx.send(()).ok();
        }
        if let Err(err) = self.transition_state(SessionState::Closed) {
            error!("Peer {} failed to close session: {err:#}", self.name);
        }
        debug!("Peer {} session closed", self.name);
    }
}
