use anyhow::{
    Error,
    Result,
};

use crate::{
    auth::message::{
        AuthExtra,
        required_string,
    },
    core::types::{
        Dictionary,
        Value,
    },
};

/// The extra data for the client's first message of WAMP-cryptosign.
#[derive(Debug)]
pub struct ClientFirstMessageExtra {
    /// Hex-encoded public key.
    pub pubkey: String,
}

impl AuthExtra for ClientFirstMessageExtra {
    fn into_dictionary(self) -> Dictionary {
        Dictionary::from_iter([("pubkey".to_owned(), Value::String(self.pubkey))])
    }

    fn from_dictionary(dictionary: &Dictionary) -> Result<Self> {
        Ok(Self {
            pubkey: required_string(dictionary, "pubkey")?.to_owned(),
        })
    }
}

/// The extra data for the server's first message of WAMP-cryptosign.
#[derive(Debug)]
pub struct ServerFirstMessageExtra {
    /// Hex-encoded random challenge.
    pub challenge: String,
    /// Channel binding type requested by the router.
    pub channel_binding: Option<String>,
}

impl AuthExtra for ServerFirstMessageExtra {
    fn into_dictionary(self) -> Dictionary {
        Dictionary::from_iter([
            ("challenge".to_owned(), Value::String(self.challenge)),
            (
                "channel_binding".to_owned(),
                self.channel_binding.map(Value::String).unwrap_or(Value::Null),
            ),
        ])
    }

    fn from_dictionary(dictionary: &Dictionary) -> Result<Self> {
        let challenge = required_string(dictionary, "challenge")?.to_owned();
        let channel_binding = match dictionary.get("channel_binding") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                value
                    .string()
                    .ok_or_else(|| Error::msg("channel_binding must be a string"))?
                    .to_owned(),
            ),
        };
        Ok(Self {
            challenge,
            channel_binding,
        })
    }
}
