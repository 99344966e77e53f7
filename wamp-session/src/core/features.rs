use crate::core::types::{
    Dictionary,
    Value,
};

/// Advanced pub/sub features announced by the peer.
#[derive(Debug, Default, Clone, Copy)]
pub struct PubSubFeatures {
    /// Publishers may ask to not receive their own events.
    pub publisher_exclusion: bool,
    /// Publishers may restrict delivery to a set of sessions.
    pub subscriber_blackwhite_listing: bool,
    /// Subscriptions may use prefix and wildcard matching.
    pub pattern_based_subscription: bool,
}

impl PubSubFeatures {
    pub fn to_dictionary(&self) -> Dictionary {
        Dictionary::from_iter([
            (
                "publisher_exclusion".to_owned(),
                Value::Bool(self.publisher_exclusion),
            ),
            (
                "subscriber_blackwhite_listing".to_owned(),
                Value::Bool(self.subscriber_blackwhite_listing),
            ),
            (
                "pattern_based_subscription".to_owned(),
                Value::Bool(self.pattern_based_subscription),
            ),
        ])
    }
}

/// Advanced RPC features announced by the peer.
#[derive(Debug, Default, Clone, Copy)]
pub struct RpcFeatures {
    /// A caller may actively cancel a procedure call.
    pub call_canceling: bool,
    /// Procedures may produce progressive results.
    pub progressive_call_results: bool,
    /// The callee enforces call timeouts itself.
    pub call_timeout: bool,
    /// Registrations may use prefix and wildcard matching.
    pub pattern_based_registration: bool,
    /// The callee may ask for the identity of the caller.
    pub caller_identification: bool,
}

impl RpcFeatures {
    pub fn to_dictionary(&self) -> Dictionary {
        Dictionary::from_iter([
            ("call_canceling".to_owned(), Value::Bool(self.call_canceling)),
            (
                "progressive_call_results".to_owned(),
                Value::Bool(self.progressive_call_results),
            ),
            ("call_timeout".to_owned(), Value::Bool(self.call_timeout)),
            (
                "pattern_based_registration".to_owned(),
                Value::Bool(self.pattern_based_registration),
            ),
            (
                "caller_identification".to_owned(),
                Value::Bool(self.caller_identification),
            ),
        ])
    }
}
