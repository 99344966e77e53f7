use std::sync::Arc;

use anyhow::Result;
use log::{
    debug,
    warn,
};

use crate::{
    core::{
        error::InteractionError,
        id::Id,
        types::{
            HashMap,
            Value,
        },
        uri::{
            Uri,
            WildcardUri,
        },
    },
    message::message::EventMessage,
    peer::handler::{
        Event,
        EventHandler,
    },
};

struct SubscribedTopic {
    topic: WildcardUri,
    handlers: Vec<(u64, Arc<dyn EventHandler>)>,
}

/// Topics subscribed to by the local session, keyed by subscription ID.
///
/// The router hands out one subscription ID per topic and session, so several local handlers can
/// share one router subscription.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    next_handler_id: u64,
    subscriptions: HashMap<Id, SubscribedTopic>,
}

impl SubscriptionTable {
    /// Adds a handler to a subscription, returning the handler's local ID.
    pub fn insert(
        &mut self,
        subscription: Id,
        topic: WildcardUri,
        handler: Arc<dyn EventHandler>,
    ) -> u64 {
        self.next_handler_id += 1;
        let handler_id = self.next_handler_id;
        self.subscriptions
            .entry(subscription)
            .or_insert_with(|| SubscribedTopic {
                topic,
                handlers: Vec::new(),
            })
            .handlers
            .push((handler_id, handler));
        handler_id
    }

    /// Removes a single handler from a subscription.
    ///
    /// Returns `true` if it was the last handler, in which case the subscription is removed too.
    pub fn remove_handler(&mut self, subscription: Id, handler_id: u64) -> Result<bool> {
        let subscribed = self
            .subscriptions
            .get_mut(&subscription)
            .ok_or(InteractionError::NoSuchSubscription)?;
        let before = subscribed.handlers.len();
        subscribed.handlers.retain(|(id, _)| *id != handler_id);
        if subscribed.handlers.len() == before {
            return Err(InteractionError::NoSuchSubscription.into());
        }
        if subscribed.handlers.is_empty() {
            self.subscriptions.remove(&subscription);
            return Ok(true);
        }
        Ok(false)
    }

    /// Checks if the handler is subscribed.
    #[cfg(test)]
    pub fn contains_handler(&self, subscription: Id, handler_id: u64) -> bool {
        self.subscriptions
            .get(&subscription)
            .is_some_and(|subscribed| subscribed.handlers.iter().any(|(id, _)| *id == handler_id))
    }

    /// Delivers an event to every handler of its subscription, each in its own task.
    pub fn dispatch(&self, name: &str, message: EventMessage) {
        let subscribed = match self.subscriptions.get(&message.subscribed_subscription) {
            Some(subscribed) => subscribed,
            None => {
                debug!(
                    "Peer {name} dropped EVENT for subscription {}, which is no longer active",
                    message.subscribed_subscription
                );
                return;
            }
        };
        let topic = message
            .details
            .get("topic")
            .and_then(Value::string)
            .and_then(|topic| Uri::try_from(topic).ok())
            .or_else(|| Uri::try_from(subscribed.topic.as_ref()).ok());
        let event = Event {
            arguments: message.publish_arguments,
            arguments_keyword: message.publish_arguments_keyword,
            publication: message.published_publication,
            topic,
        };
        for (_, handler) in &subscribed.handlers {
            let handler = handler.clone();
            let event = event.clone();
            let name = name.to_owned();
            tokio::spawn(async move {
                let publication = event.publication;
                if let Err(err) = handler.handle(event).await {
                    warn!("Event handler on peer {name} failed for publication {publication}: {err:#}");
                }
            });
        }
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}
