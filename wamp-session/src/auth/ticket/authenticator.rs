use anyhow::Result;
use async_trait::async_trait;

use crate::{
    auth::{
        auth_method::AuthMethod,
        authenticator::ClientAuthenticator as ClientAuthenticatorInterface,
        message::{
            ClientFinalMessage,
            ClientFirstMessage,
            NoExtra,
            ServerFinalMessage,
            ServerFirstMessage,
        },
    },
    core::types::HashSet,
};

/// Client authenticator for ticket-based authentication.
pub struct ClientAuthenticator {
    id: String,
    ticket: String,
}

impl ClientAuthenticator {
    /// Creates a new client authenticator.
    pub fn new(id: String, ticket: String) -> Self {
        Self { id, ticket }
    }
}

#[async_trait]
impl ClientAuthenticatorInterface<NoExtra, NoExtra, NoExtra, NoExtra> for ClientAuthenticator {
    fn auth_method(&self) -> AuthMethod {
        AuthMethod::Ticket
    }

    async fn hello(&self) -> Result<ClientFirstMessage<NoExtra>> {
        Ok(ClientFirstMessage {
            id: self.id.clone(),
            methods: HashSet::from_iter([self.auth_method()]),
            extra: NoExtra,
        })
    }

    async fn handle_challenge(
        &self,
        _: ServerFirstMessage<NoExtra>,
    ) -> Result<ClientFinalMessage<NoExtra>> {
        Ok(ClientFinalMessage {
            signature: self.ticket.clone(),
            extra: NoExtra,
        })
    }

    async fn verify_signature(&self, _: ServerFinalMessage<NoExtra>) -> Result<()> {
        Ok(())
    }
}
