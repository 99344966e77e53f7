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

/// A serializer implemented for MessagePack.
#[derive(Debug, Default)]
pub struct MessagePackSerializer {}

impl Serializer for MessagePackSerializer {
    fn serialize(&self, value: &Message) -> Result<Vec<u8>> {
        rmp_serde::to_vec(value).map_err(Error::new)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Message> {
        rmp_serde::from_slice(bytes).map_err(Error::new)
    }

    fn message_tag(&self, bytes: &[u8]) -> Result<Integer> {
        let MessageTag(tag) = rmp_serde::from_slice(bytes).map_err(Error::new)?;
        Ok(tag)
    }
}
