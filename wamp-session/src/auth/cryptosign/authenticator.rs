use anyhow::Result;
use async_trait::async_trait;

use crate::{
    auth::{
        auth_method::AuthMethod,
        authenticator::ClientAuthenticator as ClientAuthenticatorInterface,
        cryptosign::{
            hex::{
                from_hex,
                to_hex,
            },
            key::CryptosignKey,
            message::{
                ClientFirstMessageExtra,
                ServerFirstMessageExtra,
            },
        },
        message::{
            ClientFinalMessage,
            ClientFirstMessage,
            NoExtra,
            ServerFinalMessage,
            ServerFirstMessage,
        },
    },
    core::{
        error::InteractionError,
        types::{
            Dictionary,
            HashSet,
        },
    },
};

const CHALLENGE_LENGTH: usize = 32;

/// Client authenticator for WAMP-cryptosign.
pub struct ClientAuthenticator {
    id: String,
    key: CryptosignKey,
}

impl ClientAuthenticator {
    /// Creates a new client authenticator.
    pub fn new(id: String, key: CryptosignKey) -> Self {
        Self { id, key }
    }
}

#[async_trait]
impl
    ClientAuthenticatorInterface<
        ClientFirstMessageExtra,
        ServerFirstMessageExtra,
        NoExtra,
        Dictionary,
    > for ClientAuthenticator
{
    fn auth_method(&self) -> AuthMethod {
        AuthMethod::Cryptosign
    }

    async fn hello(&self) -> Result<ClientFirstMessage<ClientFirstMessageExtra>> {
        Ok(ClientFirstMessage {
            id: self.id.clone(),
            methods: HashSet::from_iter([self.auth_method()]),
            extra: ClientFirstMessageExtra {
                pubkey: self.key.public_key_hex(),
            },
        })
    }

    async fn handle_challenge(
        &self,
        message: ServerFirstMessage<ServerFirstMessageExtra>,
    ) -> Result<ClientFinalMessage<NoExtra>> {
        if let Some(channel_binding) = message.extra.channel_binding {
            return Err(InteractionError::AuthenticationFailed(format!(
                "unsupported channel binding: {channel_binding}"
            ))
            .into());
        }
        let challenge = from_hex(&message.extra.challenge).map_err(|err| {
            InteractionError::AuthenticationFailed(format!("invalid challenge: {err}"))
        })?;
        if challenge.len() != CHALLENGE_LENGTH {
            return Err(InteractionError::AuthenticationFailed(format!(
                "challenge must be {CHALLENGE_LENGTH} bytes, got {}",
                challenge.len()
            ))
            .into());
        }

        let signature = self.key.sign(&challenge);
        let mut signed = Vec::with_capacity(64 + challenge.len());
        signed.extend_from_slice(&signature.to_bytes());
        signed.extend_from_slice(&challenge);
        Ok(ClientFinalMessage {
            signature: to_hex(&signed),
            extra: NoExtra,
        })
    }

    async fn verify_signature(&self, _: ServerFinalMessage<Dictionary>) -> Result<()> {
        Ok(())
    }
}
