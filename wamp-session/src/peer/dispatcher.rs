use std::time::Duration;

use anyhow::{
    Error,
    Result,
};
use log::{
    debug,
    warn,
};
use tokio::{
    sync::mpsc::{
        UnboundedReceiver,
        UnboundedSender,
        unbounded_channel,
    },
    time::Instant,
};

use crate::{
    core::{
        error::{
            InteractionError,
            error_from_message,
        },
        id::Id,
        types::{
            HashMap,
            Value,
        },
    },
    message::message::{
        ErrorMessage,
        Message,
        ResultMessage,
    },
    peer::peer::RpcResult,
};

struct PendingCall {
    result_tx: UnboundedSender<Result<RpcResult>>,
    receive_progress: bool,
}

/// How long a canceled call's request ID stays reserved while waiting for the router's final
/// response.
pub const CANCELED_CALL_RETENTION: Duration = Duration::from_secs(60);

/// Matches outgoing calls to their results by request ID.
///
/// A call is outstanding from CALL until its final RESULT or ERROR, or until it is canceled
/// locally. Canceled calls keep their request ID reserved until the router's final response
/// arrives, which is then dropped, or until [`CANCELED_CALL_RETENTION`] passes. A response that
/// arrives later than that is dropped as unknown.
#[derive(Default)]
pub(crate) struct CallDispatcher {
    pending: HashMap<Id, PendingCall>,
    canceled: HashMap<Id, Instant>,
}

impl CallDispatcher {
    /// Tracks a new call, returning the channel its results are delivered on.
    pub fn insert(
        &mut self,
        request: Id,
        receive_progress: bool,
    ) -> UnboundedReceiver<Result<RpcResult>> {
        self.forget_expired_cancellations();
        let (result_tx, result_rx) = unbounded_channel();
        self.pending.insert(
            request,
            PendingCall {
                result_tx,
                receive_progress,
            },
        );
        result_rx
    }

    /// Checks if the request ID cannot be reused yet.
    pub fn in_use(&self, request: Id) -> bool {
        self.pending.contains_key(&request)
            || self
                .canceled
                .get(&request)
                .is_some_and(|canceled_at| canceled_at.elapsed() < CANCELED_CALL_RETENTION)
    }

    fn forget_expired_cancellations(&mut self) {
        self.canceled
            .retain(|_, canceled_at| canceled_at.elapsed() < CANCELED_CALL_RETENTION);
    }

    /// Checks if the call is still waiting for its final result.
    #[cfg(test)]
    pub fn is_outstanding(&self, request: Id) -> bool {
        self.pending.contains_key(&request)
    }

    /// Forgets a call that was never sent.
    pub fn remove(&mut self, request: Id) {
        self.pending.remove(&request);
    }

    #[cfg(test)]
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub fn handle_result(&mut self, name: &str, message: ResultMessage) {
        let request = message.call_request;
        let progress = message
            .details
            .get("progress")
            .and_then(Value::bool)
            .unwrap_or(false);

        if self.canceled.contains_key(&request) {
            if !progress {
                self.canceled.remove(&request);
            }
            debug!("Peer {name} dropped RESULT for canceled call {request}");
            return;
        }

        let pending = match self.pending.get(&request) {
            Some(pending) => pending,
            None => {
                warn!("Peer {name} dropped RESULT for unknown call {request}");
                return;
            }
        };

        let result = RpcResult {
            arguments: message.yield_arguments,
            arguments_keyword: message.yield_arguments_keyword,
            progress,
        };
        if progress {
            if !pending.receive_progress {
                warn!(
                    "Peer {name} dropped progressive RESULT for call {request}, which did not ask for progressive results"
                );
                return;
            }
            // The receiver may be gone, but the call stays outstanding until its final result.
            pending.result_tx.send(Ok(result)).ok();
            return;
        }

        if let Some(pending) = self.pending.remove(&request) {
            pending.result_tx.send(Ok(result)).ok();
        }
    }

    pub fn handle_error(&mut self, name: &str, message: ErrorMessage) {
        let request = message.request;
        if self.canceled.remove(&request).is_some() {
            debug!("Peer {name} dropped ERROR for canceled call {request}");
            return;
        }
        let pending = match self.pending.remove(&request) {
            Some(pending) => pending,
            None => {
                warn!("Peer {name} dropped ERROR for unknown call {request}");
                return;
            }
        };
        let error = error_from_message(&Message::Error(message)).unwrap_or_else(|err| err);
        pending.result_tx.send(Err(error)).ok();
    }

    /// Cancels an outstanding call, resolving it immediately.
    ///
    /// Returns `false` if the call already resolved.
    pub fn cancel(&mut self, request: Id) -> bool {
        match self.pending.remove(&request) {
            Some(pending) => {
                pending
                    .result_tx
                    .send(Err(InteractionError::Canceled.into()))
                    .ok();
                self.forget_expired_cancellations();
                self.canceled.insert(request, Instant::now());
                true
            }
            None => false,
        }
    }

    /// Resolves every outstanding call with an error.
    pub fn fail_all<F>(&mut self, error: F)
    where
        F: Fn() -> Error,
    {
        for (_, pending) in self.pending.drain() {
            pending.result_tx.send(Err(error())).ok();
        }
        self.canceled.clear();
    }
}
