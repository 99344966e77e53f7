use crate::core::{
    id::Id,
    types::{
        Dictionary,
        Value,
    },
};

/// Options for publishing an event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    /// The router should confirm the publication with PUBLISHED.
    pub acknowledge: bool,
    /// Should the publisher be excluded from receiving the event?
    ///
    /// Routers exclude the publisher by default.
    pub exclude_me: Option<bool>,
    /// Blocked session IDs.
    pub exclude: Vec<Id>,
    /// Allowed session IDs.
    pub eligible: Vec<Id>,
}

impl PublishOptions {
    /// The options dictionary of the PUBLISH message.
    pub fn to_dictionary(&self) -> Dictionary {
        let ids = |ids: &[Id]| Value::List(ids.iter().map(|id| Value::Integer(id.value())).collect());
        let mut options = Dictionary::default();
        if self.acknowledge {
            options.insert("acknowledge".to_owned(), Value::Bool(true));
        }
        if let Some(exclude_me) = self.exclude_me {
            options.insert("exclude_me".to_owned(), Value::Bool(exclude_me));
        }
        if !self.exclude.is_empty() {
            options.insert("exclude".to_owned(), ids(&self.exclude));
        }
        if !self.eligible.is_empty() {
            options.insert("eligible".to_owned(), ids(&self.eligible));
        }
        options
    }
}
