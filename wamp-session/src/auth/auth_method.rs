use std::{
    fmt::Display,
    str::FromStr,
};

use serde_string_enum::{
    DeserializeStringEnum,
    SerializeStringEnum,
};

/// Authentication methods a peer can offer in HELLO.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, SerializeStringEnum, DeserializeStringEnum,
)]
pub enum AuthMethod {
    /// WAMP-cryptosign.
    ///
    /// The peer proves possession of an Ed25519 private key by signing a random challenge.
    #[default]
    Cryptosign,
    /// Ticket-based authentication.
    ///
    /// The peer sends a static secret, which is only safe over an encrypted transport.
    Ticket,
}

impl AuthMethod {
    /// The method's name, as written in HELLO and CHALLENGE.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cryptosign => "cryptosign",
            Self::Ticket => "ticket",
        }
    }
}

impl TryFrom<&str> for AuthMethod {
    type Error = anyhow::Error;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "cryptosign" => Ok(Self::Cryptosign),
            "ticket" => Ok(Self::Ticket),
            _ => Err(Self::Error::msg(format!("invalid auth method: {value}"))),
        }
    }
}

impl FromStr for AuthMethod {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

impl Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
