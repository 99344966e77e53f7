use std::sync::Arc;

use anyhow::Result;
use log::{
    debug,
    warn,
};
use tokio::sync::{
    mpsc::UnboundedSender,
    oneshot,
};

use crate::{
    core::{
        error::InteractionError,
        id::Id,
        types::{
            Dictionary,
            HashMap,
            HashSet,
        },
        uri::WildcardUri,
    },
    message::{
        common::error_for_request,
        message::{
            InvocationMessage,
            Message,
            YieldMessage,
        },
    },
    peer::{
        handler::{
            Invocation,
            InvocationDetails,
            ProcedureHandler,
        },
        peer::ProcedureOptions,
    },
};

/// A procedure registered by the local session.
pub(crate) struct RegisteredProcedure {
    pub procedure: WildcardUri,
    pub handler: Arc<dyn ProcedureHandler>,
    pub options: ProcedureOptions,
}

/// Procedures registered by the local session, keyed by registration ID.
///
/// A procedure URI is reserved from the moment REGISTER is sent until the registration is removed,
/// so that the same URI can never be registered twice by one session.
#[derive(Default)]
pub(crate) struct RegistrationTable {
    reserved: HashSet<WildcardUri>,
    registrations: HashMap<Id, RegisteredProcedure>,
    invocations: HashMap<Id, oneshot::Sender<()>>,
}

impl RegistrationTable {
    /// Reserves a procedure URI for a new registration.
    pub fn reserve(&mut self, procedure: &WildcardUri) -> Result<()> {
        if !self.reserved.insert(procedure.clone()) {
            return Err(InteractionError::ProcedureAlreadyExists.into());
        }
        Ok(())
    }

    /// Releases a reserved procedure URI whose registration failed.
    pub fn release(&mut self, procedure: &WildcardUri) {
        self.reserved.remove(procedure);
    }

    pub fn insert(&mut self, registration: Id, procedure: RegisteredProcedure) {
        self.reserved.insert(procedure.procedure.clone());
        self.registrations.insert(registration, procedure);
    }

    pub fn contains(&self, registration: Id) -> bool {
        self.registrations.contains_key(&registration)
    }

    pub fn remove(&mut self, registration: Id) -> Option<RegisteredProcedure> {
        let procedure = self.registrations.remove(&registration)?;
        self.reserved.remove(&procedure.procedure);
        Some(procedure)
    }

    /// Runs the handler for an invocation in its own task.
    ///
    /// The task sends the YIELD or ERROR for the invocation when the handler finishes. If the
    /// session goes away first, nothing is sent.
    pub fn invoke(
        &mut self,
        name: &str,
        message: InvocationMessage,
        message_tx: &UnboundedSender<Message>,
        enforce_timeouts: bool,
    ) {
        let request = message.request;
        let registered = match self.registrations.get(&message.registered_registration) {
            Some(registered) => registered,
            None => {
                warn!(
                    "Peer {name} received INVOCATION for unknown registration {}",
                    message.registered_registration
                );
                message_tx
                    .send(error_for_request(
                        Message::INVOCATION_TAG,
                        request,
                        &InteractionError::NoSuchRegistration.into(),
                    ))
                    .ok();
                return;
            }
        };

        let details = InvocationDetails::from_dictionary(&message.details, request, message_tx);
        let timeout = details.timeout.filter(|_| enforce_timeouts);
        let invocation = Invocation {
            arguments: message.call_arguments,
            arguments_keyword: message.call_arguments_keyword,
            details: registered.options.pass_details.then_some(details),
        };
        let handler = registered.handler.clone();

        // Invocations whose tasks have finished can no longer be interrupted.
        self.invocations
            .retain(|_, interrupt_tx| !interrupt_tx.is_closed());
        let (interrupt_tx, interrupt_rx) = oneshot::channel();
        self.invocations.insert(request, interrupt_tx);

        let name = name.to_owned();
        let message_tx = message_tx.clone();
        tokio::spawn(async move {
            let invoke = async {
                match timeout {
                    Some(timeout) => tokio::time::timeout(timeout, handler.invoke(invocation))
                        .await
                        .unwrap_or_else(|_| Err(InteractionError::Canceled.into())),
                    None => handler.invoke(invocation).await,
                }
            };
            let result = tokio::select! {
                result = invoke => result,
                interrupted = interrupt_rx => match interrupted {
                    Ok(()) => Err(InteractionError::Canceled.into()),
                    Err(_) => {
                        debug!("Peer {name} abandoned invocation {request} because its session ended");
                        return;
                    }
                },
            };
            let message = match result {
                Ok(result) => Message::Yield(YieldMessage {
                    invocation_request: request,
                    options: Dictionary::default(),
                    arguments: result.arguments,
                    arguments_keyword: result.arguments_keyword,
                }),
                Err(err) => {
                    debug!("Invocation {request} on peer {name} failed: {err:#}");
                    error_for_request(Message::INVOCATION_TAG, request, &err)
                }
            };
            message_tx.send(message).ok();
        });
    }

    /// Interrupts a running invocation.
    ///
    /// Returns `false` if the invocation already finished.
    pub fn interrupt(&mut self, request: Id) -> bool {
        match self.invocations.remove(&request) {
            Some(interrupt_tx) => interrupt_tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Drops every registration, abandoning running invocations.
    pub fn clear(&mut self) {
        self.reserved.clear();
        self.registrations.clear();
        self.invocations.clear();
    }
}
