use std::str::FromStr;

use anyhow::{
    Error,
    Result,
};

use crate::{
    auth::{
        auth_method::AuthMethod,
        identity::Identity,
    },
    core::types::{
        Dictionary,
        HashSet,
        Value,
    },
    message::message::{
        AuthenticateMessage,
        ChallengeMessage,
        HelloMessage,
        WelcomeMessage,
    },
};

/// Extra data attached to one step of an authentication method.
///
/// Every step carries its extra data as a dictionary on the wire.
pub trait AuthExtra: Sized + Send {
    /// Encodes the extra data.
    fn into_dictionary(self) -> Dictionary;

    /// Decodes the extra data.
    fn from_dictionary(dictionary: &Dictionary) -> Result<Self>;
}

impl AuthExtra for Dictionary {
    fn into_dictionary(self) -> Dictionary {
        self
    }

    fn from_dictionary(dictionary: &Dictionary) -> Result<Self> {
        Ok(dictionary.clone())
    }
}

/// Extra data for a step that carries nothing.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NoExtra;

impl AuthExtra for NoExtra {
    fn into_dictionary(self) -> Dictionary {
        Dictionary::default()
    }

    fn from_dictionary(_: &Dictionary) -> Result<Self> {
        Ok(Self)
    }
}

/// Reads a required string field out of a details dictionary.
pub(crate) fn required_string<'a>(dictionary: &'a Dictionary, key: &str) -> Result<&'a str> {
    dictionary
        .get(key)
        .ok_or_else(|| Error::msg(format!("missing {key}")))?
        .string()
        .ok_or_else(|| Error::msg(format!("{key} must be a string")))
}

fn parse_auth_method(value: &str) -> Result<AuthMethod> {
    AuthMethod::from_str(value).map_err(|_| Error::msg(format!("invalid auth method: {value}")))
}

/// The client's first message of a generic authentication method, carried in HELLO.
#[derive(Debug)]
pub struct ClientFirstMessage<Extra> {
    /// The identity of the user performing authentication.
    pub id: String,
    /// Offered authentication methods.
    pub methods: HashSet<AuthMethod>,
    /// Extra data.
    pub extra: Extra,
}

impl<Extra> ClientFirstMessage<Extra>
where
    Extra: AuthExtra,
{
    /// Embeds the authentication information into a HELLO message.
    ///
    /// Multiple methods can be offered in the same HELLO. Their method lists and extra data are
    /// merged, and the last embedded `authid` wins.
    pub fn embed_into_hello_message(self, message: &mut HelloMessage) {
        let methods = self
            .methods
            .into_iter()
            .map(|method| Value::String(method.to_string()))
            .collect::<Vec<_>>();
        message
            .details
            .entry("authmethods".to_owned())
            .and_modify(|val| match val.list_mut() {
                Some(list) => list.extend(methods.iter().cloned()),
                None => *val = Value::List(methods.clone()),
            })
            .or_insert_with(|| Value::List(methods));

        message
            .details
            .insert("authid".to_owned(), Value::String(self.id));

        let extra = self.extra.into_dictionary();
        message
            .details
            .entry("authextra".to_owned())
            .and_modify(|val| match val.dictionary_mut() {
                Some(dict) => dict.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone()))),
                None => *val = Value::Dictionary(extra.clone()),
            })
            .or_insert_with(|| Value::Dictionary(extra.clone()));
    }

    /// Converts the message into a generic form.
    pub fn into_generic(self) -> ClientFirstMessage<Dictionary> {
        ClientFirstMessage {
            id: self.id,
            methods: self.methods,
            extra: self.extra.into_dictionary(),
        }
    }
}

/// The server's first message of a generic authentication method, carried in CHALLENGE.
#[derive(Debug)]
pub struct ServerFirstMessage<Extra> {
    /// The selected authentication method.
    pub method: AuthMethod,
    /// Extra data.
    pub extra: Extra,
}

impl<Extra> TryFrom<&ChallengeMessage> for ServerFirstMessage<Extra>
where
    Extra: AuthExtra,
{
    type Error = Error;
    fn try_from(value: &ChallengeMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            method: value.auth_method,
            extra: Extra::from_dictionary(&value.extra)?,
        })
    }
}

/// The client's final message of a generic authentication method, carried in AUTHENTICATE.
#[derive(Debug)]
pub struct ClientFinalMessage<Extra> {
    /// Proof of the client's credentials.
    pub signature: String,
    /// Extra data.
    pub extra: Extra,
}

impl<Extra> From<ClientFinalMessage<Extra>> for AuthenticateMessage
where
    Extra: AuthExtra,
{
    fn from(value: ClientFinalMessage<Extra>) -> Self {
        Self {
            signature: value.signature,
            extra: value.extra.into_dictionary(),
        }
    }
}

/// The server's final message of a generic authentication method, carried in WELCOME.
#[derive(Debug, Clone)]
pub struct ServerFinalMessage<Extra> {
    /// The identity the client was actually authenticated as.
    pub identity: Identity,
    /// The authentication method.
    pub method: AuthMethod,
    /// The actual provider of authentication, if reported.
    pub provider: Option<String>,
    /// Extra data.
    pub extra: Extra,
}

impl<Extra> TryFrom<&WelcomeMessage> for ServerFinalMessage<Extra>
where
    Extra: AuthExtra,
{
    type Error = Error;
    fn try_from(value: &WelcomeMessage) -> Result<Self, Self::Error> {
        let id = required_string(&value.details, "authid")?.to_owned();
        let role = required_string(&value.details, "authrole")?.to_owned();
        let method = parse_auth_method(required_string(&value.details, "authmethod")?)?;
        let provider = value
            .details
            .get("authprovider")
            .and_then(Value::string)
            .map(|provider| provider.to_owned());
        let extra = match value.details.get("authextra") {
            Some(extra) => Extra::from_dictionary(
                extra
                    .dictionary()
                    .ok_or_else(|| Error::msg("authextra must be a dictionary"))?,
            )?,
            None => Extra::from_dictionary(&Dictionary::default())?,
        };
        Ok(Self {
            identity: Identity { id, role },
            method,
            provider,
            extra,
        })
    }
}

#[cfg(test)]
mod message_test {
    use crate::{
        auth::{
            auth_method::AuthMethod,
            identity::Identity,
            message::{
                ClientFirstMessage,
                NoExtra,
                ServerFinalMessage,
            },
        },
        core::{
            id::Id,
            types::{
                Dictionary,
                HashSet,
                Value,
            },
            uri::Uri,
        },
        message::message::{
            HelloMessage,
            WelcomeMessage,
        },
    };

    #[test]
    fn merges_offered_methods_into_hello() {
        let mut hello = HelloMessage {
            realm: Uri::try_from("realm1").unwrap(),
            details: Dictionary::default(),
        };
        ClientFirstMessage {
            id: "alice".to_owned(),
            methods: HashSet::from_iter([AuthMethod::Ticket]),
            extra: NoExtra,
        }
        .embed_into_hello_message(&mut hello);
        ClientFirstMessage {
            id: "alice".to_owned(),
            methods: HashSet::from_iter([AuthMethod::Cryptosign]),
            extra: Dictionary::from_iter([("pubkey".to_owned(), Value::from("00ff"))]),
        }
        .embed_into_hello_message(&mut hello);

        pretty_assertions::assert_eq!(
            hello.details.get("authmethods"),
            Some(&Value::List(Vec::from_iter([
                Value::from("ticket"),
                Value::from("cryptosign"),
            ])))
        );
        assert_eq!(
            hello.details.get("authid").and_then(Value::string),
            Some("alice")
        );
        assert_eq!(
            hello
                .details
                .get("authextra")
                .and_then(Value::dictionary)
                .and_then(|extra| extra.get("pubkey"))
                .and_then(Value::string),
            Some("00ff")
        );
    }

    #[test]
    fn reads_authentication_result_from_welcome() {
        let welcome = WelcomeMessage {
            session: Id::try_from(5).unwrap(),
            details: Dictionary::from_iter([
                ("authid".to_owned(), Value::from("alice")),
                ("authrole".to_owned(), Value::from("user")),
                ("authmethod".to_owned(), Value::from("cryptosign")),
                ("authprovider".to_owned(), Value::from("static")),
            ]),
        };
        assert_matches::assert_matches!(ServerFinalMessage::<NoExtra>::try_from(&welcome), Ok(message) => {
            pretty_assertions::assert_eq!(message.identity, Identity {
                id: "alice".to_owned(),
                role: "user".to_owned(),
            });
            assert_eq!(message.method, AuthMethod::Cryptosign);
            assert_eq!(message.provider.as_deref(), Some("static"));
        });

        let welcome = WelcomeMessage {
            session: Id::try_from(5).unwrap(),
            details: Dictionary::from_iter([("authid".to_owned(), Value::from("alice"))]),
        };
        assert_matches::assert_matches!(ServerFinalMessage::<NoExtra>::try_from(&welcome), Err(err) => {
            assert_eq!(err.to_string(), "missing authrole");
        });
    }
}
