use anyhow::{
    Error,
    Result,
};

use crate::{
    core::types::Integer,
    message::message::{
        Message,
        MessageTag,
    },
    serializer::serializer::Serializer,
};

/// A serializer implemented for JavaScript Object Notation.
#[derive(Debug, Default)]
pub struct JsonSerializer {}

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Message) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(Error::new)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Message> {
        serde_json::from_slice(bytes).map_err(Error::new)
    }

    fn message_tag(&self, bytes: &[u8]) -> Result<Integer> {
        let MessageTag(tag) = serde_json::from_slice(bytes).map_err(Error::new)?;
        Ok(tag)
    }
}
