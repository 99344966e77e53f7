use anyhow::Result;
use async_trait::async_trait;

use crate::{
    auth::{
        auth_method::AuthMethod,
        message::{
            AuthExtra,
            ClientFinalMessage,
            ClientFirstMessage,
            ServerFinalMessage,
            ServerFirstMessage,
        },
    },
    core::types::Dictionary,
    message::message::{
        AuthenticateMessage,
        ChallengeMessage,
        WelcomeMessage,
    },
};

/// Client-side authentication for WAMP sessions.
///
/// Each step is typed by the extra data the method exchanges.
#[async_trait]
pub trait ClientAuthenticator<
    ClientFirstMessageExtra,
    ServerFirstMessageExtra,
    ClientFinalMessageExtra,
    ServerFinalMessageExtra,
>: Send + Sync
{
    /// Authentication method.
    fn auth_method(&self) -> AuthMethod;

    /// Generates the client's first message for authentication.
    async fn hello(&self) -> Result<ClientFirstMessage<ClientFirstMessageExtra>>;

    /// Handles the server's authentication challenge.
    async fn handle_challenge(
        &self,
        message: ServerFirstMessage<ServerFirstMessageExtra>,
    ) -> Result<ClientFinalMessage<ClientFinalMessageExtra>>;

    /// Verifies the server's final message.
    async fn verify_signature(
        &self,
        message: ServerFinalMessage<ServerFinalMessageExtra>,
    ) -> Result<()>;
}

/// Generic version of [`ClientAuthenticator`], operating directly on WAMP messages.
#[async_trait]
pub trait GenericClientAuthenticator: Send + Sync {
    /// Authentication method.
    fn auth_method(&self) -> AuthMethod;

    /// Generates the client's first message for authentication.
    async fn hello(&self) -> Result<ClientFirstMessage<Dictionary>>;

    /// Handles the server's authentication challenge.
    async fn handle_challenge(&self, message: &ChallengeMessage) -> Result<AuthenticateMessage>;

    /// Verifies the server's final message.
    async fn verify_signature(&self, message: &WelcomeMessage) -> Result<()>;
}

/// Creates a [`GenericClientAuthenticator`] around a concrete implementation of
/// [`ClientAuthenticator`].
pub fn make_generic_client_authenticator<A, B, C, D>(
    authenticator: Box<dyn ClientAuthenticator<A, B, C, D>>,
) -> Box<dyn GenericClientAuthenticator>
where
    A: AuthExtra + 'static,
    B: AuthExtra + 'static,
    C: AuthExtra + 'static,
    D: AuthExtra + 'static,
{
    struct Authenticator<A, B, C, D> {
        inner: Box<dyn ClientAuthenticator<A, B, C, D>>,
    }

    #[async_trait]
    impl<A, B, C, D> GenericClientAuthenticator for Authenticator<A, B, C, D>
    where
        A: AuthExtra,
        B: AuthExtra,
        C: AuthExtra,
        D: AuthExtra,
    {
        fn auth_method(&self) -> AuthMethod {
            self.inner.auth_method()
        }

        async fn hello(&self) -> Result<ClientFirstMessage<Dictionary>> {
            Ok(self.inner.hello().await?.into_generic())
        }

        async fn handle_challenge(
            &self,
            message: &ChallengeMessage,
        ) -> Result<AuthenticateMessage> {
            let server_first = ServerFirstMessage::try_from(message)?;
            let client_final = self.inner.handle_challenge(server_first).await?;
            Ok(client_final.into())
        }

        async fn verify_signature(&self, message: &WelcomeMessage) -> Result<()> {
            let server_final = ServerFinalMessage::try_from(message)?;
            self.inner.verify_signature(server_final).await
        }
    }

    Box::new(Authenticator {
        inner: authenticator,
    })
}
