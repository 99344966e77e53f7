use std::fmt::Display;

use crate::core::{
    features::{
        PubSubFeatures,
        RpcFeatures,
    },
    types::{
        Dictionary,
        Value,
    },
};

/// A role a peer can take on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerRole {
    /// Calls procedures.
    Caller,
    /// Registers procedures.
    Callee,
    /// Publishes events to topics.
    Publisher,
    /// Subscribes to events for topics.
    Subscriber,
}

impl PeerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Caller => "caller",
            Self::Callee => "callee",
            Self::Publisher => "publisher",
            Self::Subscriber => "subscriber",
        }
    }
}

impl Display for PeerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the `roles` dictionary of a HELLO message.
///
/// Each role carries the features of its messaging pattern.
pub fn roles_details<I>(roles: I, pub_sub: PubSubFeatures, rpc: RpcFeatures) -> Dictionary
where
    I: IntoIterator<Item = PeerRole>,
{
    roles
        .into_iter()
        .map(|role| {
            let features = match role {
                PeerRole::Caller | PeerRole::Callee => rpc.to_dictionary(),
                PeerRole::Publisher | PeerRole::Subscriber => pub_sub.to_dictionary(),
            };
            (
                role.as_str().to_owned(),
                Value::Dictionary(Dictionary::from_iter([(
                    "features".to_owned(),
                    Value::Dictionary(features),
                )])),
            )
        })
        .collect()
}
