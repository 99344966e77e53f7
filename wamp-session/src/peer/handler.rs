use std::time::Duration;

use anyhow::{
    Error,
    Result,
};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    core::{
        id::Id,
        types::{
            Dictionary,
            List,
            Value,
        },
        uri::Uri,
    },
    message::message::{
        Message,
        YieldMessage,
    },
};

/// A result produced by a procedure handler.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RpcYield {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

/// Sends progressive results for one invocation back to the caller.
#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    invocation_request: Id,
    message_tx: UnboundedSender<Message>,
}

impl ProgressEmitter {
    pub(crate) fn new(invocation_request: Id, message_tx: UnboundedSender<Message>) -> Self {
        Self {
            invocation_request,
            message_tx,
        }
    }

    /// Sends a progressive result.
    ///
    /// Progressive results reach the caller in the order they are emitted, and always before the
    /// final result returned by the handler.
    pub fn emit(&self, progress: RpcYield) -> Result<()> {
        self.message_tx
            .send(Message::Yield(YieldMessage {
                invocation_request: self.invocation_request,
                options: Dictionary::from_iter([("progress".to_owned(), Value::Bool(true))]),
                arguments: progress.arguments,
                arguments_keyword: progress.arguments_keyword,
            }))
            .map_err(|_| Error::msg("session is no longer connected"))
    }
}

/// Details of an invocation, passed to handlers registered with
/// [`ProcedureOptions::pass_details`][`crate::peer::ProcedureOptions::pass_details`].
#[derive(Debug, Default, Clone)]
pub struct InvocationDetails {
    /// The concrete procedure called, for pattern-based registrations.
    pub procedure: Option<Uri>,
    /// The caller's session ID, if disclosed.
    pub caller: Option<Id>,
    /// The timeout requested by the caller.
    pub timeout: Option<Duration>,
    /// Progressive result emitter, present only if the caller asked for progressive results.
    pub progress: Option<ProgressEmitter>,
}

impl InvocationDetails {
    pub(crate) fn from_dictionary(
        details: &Dictionary,
        invocation_request: Id,
        message_tx: &UnboundedSender<Message>,
    ) -> Self {
        let procedure = details
            .get("procedure")
            .and_then(Value::string)
            .and_then(|procedure| Uri::try_from(procedure).ok());
        let caller = details
            .get("caller")
            .and_then(Value::integer)
            .and_then(|caller| Id::try_from(caller).ok());
        let timeout = details
            .get("timeout")
            .and_then(Value::integer)
            .filter(|timeout| *timeout > 0)
            .map(Duration::from_millis);
        let progress = details
            .get("receive_progress")
            .and_then(Value::bool)
            .unwrap_or(false)
            .then(|| ProgressEmitter::new(invocation_request, message_tx.clone()));
        Self {
            procedure,
            caller,
            timeout,
            progress,
        }
    }
}

/// An invocation of a registered procedure.
#[derive(Debug, Default, Clone)]
pub struct Invocation {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
    pub details: Option<InvocationDetails>,
}

impl Invocation {
    /// The progressive result emitter, if the caller asked for progressive results.
    pub fn progress(&self) -> Option<&ProgressEmitter> {
        self.details
            .as_ref()
            .and_then(|details| details.progress.as_ref())
    }
}

/// An event received on a subscription.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Event {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
    /// The publication ID assigned by the router.
    pub publication: Id,
    /// The concrete topic the event was published to.
    pub topic: Option<Uri>,
}

/// Handles invocations of a registered procedure.
///
/// Each invocation runs in its own task. Returning an error sends an ERROR to the caller, with the
/// error URI derived from the error type. Return an
/// [`ApplicationError`][`crate::core::error::ApplicationError`] to control the URI and payload.
#[async_trait]
pub trait ProcedureHandler: Send + Sync {
    async fn invoke(&self, invocation: Invocation) -> Result<RpcYield>;
}

#[async_trait]
impl<F, Fut> ProcedureHandler for F
where
    F: Fn(Invocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<RpcYield>> + Send,
{
    async fn invoke(&self, invocation: Invocation) -> Result<RpcYield> {
        self(invocation).await
    }
}

/// Handles events received on a subscription.
///
/// Each event runs in its own task. Errors are logged and never reach the publisher or other
/// subscribers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> Result<()>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, event: Event) -> Result<()> {
        self(event).await
    }
}

#[cfg(test)]
mod handler_test {
    use std::time::Duration;

    use tokio::sync::mpsc::unbounded_channel;

    use crate::{
        core::{
            id::Id,
            types::{
                Dictionary,
                List,
                Value,
            },
        },
        message::message::Message,
        peer::handler::{
            Invocation,
            InvocationDetails,
            ProcedureHandler,
            RpcYield,
        },
    };

    #[test]
    fn reads_invocation_details() {
        let (message_tx, _message_rx) = unbounded_channel();
        let details = InvocationDetails::from_dictionary(
            &Dictionary::from_iter([
                ("procedure".to_owned(), Value::from("com.myapp.square")),
                ("caller".to_owned(), Value::Integer(9)),
                ("timeout".to_owned(), Value::Integer(1500)),
            ]),
            Id::try_from(1).unwrap(),
            &message_tx,
        );
        assert_eq!(
            details.procedure.as_ref().map(|uri| uri.as_ref()),
            Some("com.myapp.square")
        );
        assert_eq!(details.caller, Some(Id::try_from(9).unwrap()));
        assert_eq!(details.timeout, Some(Duration::from_millis(1500)));
        assert!(details.progress.is_none());
    }

    #[tokio::test]
    async fn emits_progress_as_yield() {
        let (message_tx, mut message_rx) = unbounded_channel();
        let details = InvocationDetails::from_dictionary(
            &Dictionary::from_iter([("receive_progress".to_owned(), Value::Bool(true))]),
            Id::try_from(4).unwrap(),
            &message_tx,
        );
        let invocation = Invocation {
            details: Some(details),
            ..Default::default()
        };
        invocation
            .progress()
            .unwrap()
            .emit(RpcYield {
                arguments: List::from_iter([Value::Integer(1)]),
                ..Default::default()
            })
            .unwrap();
        assert_matches::assert_matches!(message_rx.recv().await, Some(Message::Yield(message)) => {
            assert_eq!(message.invocation_request, Id::try_from(4).unwrap());
            assert_eq!(message.options.get("progress"), Some(&Value::Bool(true)));
            assert_eq!(message.arguments, List::from_iter([Value::Integer(1)]));
        });
    }

    #[tokio::test]
    async fn closures_are_handlers() {
        let handler = |invocation: Invocation| async move {
            Ok::<_, anyhow::Error>(RpcYield {
                arguments: invocation.arguments,
                ..Default::default()
            })
        };
        assert_matches::assert_matches!(
            handler
                .invoke(Invocation {
                    arguments: List::from_iter([Value::Integer(2)]),
                    ..Default::default()
                })
                .await,
            Ok(result) => {
                assert_eq!(result.arguments, List::from_iter([Value::Integer(2)]));
            }
        );
    }
}
