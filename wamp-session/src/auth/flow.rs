use std::fmt::Display;

use anyhow::{
    Error,
    Result,
};
use log::debug;

use crate::{
    auth::{
        auth_method::AuthMethod,
        authenticator::GenericClientAuthenticator,
        identity::Identity,
        message::required_string,
    },
    core::error::InteractionError,
    message::message::{
        AuthenticateMessage,
        ChallengeMessage,
        HelloMessage,
        WelcomeMessage,
    },
};

/// The state of the client side of an authentication handshake.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationState {
    /// HELLO was sent, and no challenge was received.
    #[default]
    Idle,
    /// A challenge was received and is being answered.
    Challenged,
    /// AUTHENTICATE was sent.
    Responded,
    /// The router welcomed the peer.
    Accepted,
    /// The router aborted the handshake, or the peer gave up on it.
    Rejected,
}

impl AuthenticationState {
    fn allowed_state_transition(&self, next: &Self) -> bool {
        match (self, next) {
            (Self::Idle, Self::Challenged) => true,
            (Self::Idle, Self::Accepted) => true,
            (Self::Challenged, Self::Responded) => true,
            (Self::Responded, Self::Accepted) => true,
            (Self::Idle | Self::Challenged | Self::Responded, Self::Rejected) => true,
            _ => false,
        }
    }

    /// Checks if the handshake is over.
    pub fn finished(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }
}

impl Display for AuthenticationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Challenged => "challenged",
            Self::Responded => "responded",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        };
        write!(f, "{name}")
    }
}

/// The client side of one authentication handshake, from HELLO to WELCOME or ABORT.
///
/// Holds the authenticators for every offered method, in the order they are offered. Only one
/// challenge is answered per handshake.
pub struct AuthenticationFlow {
    authenticators: Vec<Box<dyn GenericClientAuthenticator>>,
    state: AuthenticationState,
    selected: Option<AuthMethod>,
}

impl AuthenticationFlow {
    /// Creates a new flow over the given authenticators.
    ///
    /// A flow without authenticators offers nothing in HELLO and only accepts a WELCOME without
    /// a prior challenge. If a method is given more than once, only its first authenticator is
    /// kept.
    pub fn new<I>(authenticators: I) -> Self
    where
        I: IntoIterator<Item = Box<dyn GenericClientAuthenticator>>,
    {
        let mut offered: Vec<Box<dyn GenericClientAuthenticator>> = Vec::new();
        for authenticator in authenticators {
            let method = authenticator.auth_method();
            if offered
                .iter()
                .any(|offered| offered.auth_method() == method)
            {
                debug!("Ignoring duplicate authenticator for {method}");
                continue;
            }
            offered.push(authenticator);
        }
        Self {
            authenticators: offered,
            state: AuthenticationState::default(),
            selected: None,
        }
    }

    fn authenticator(&self, method: AuthMethod) -> Option<&dyn GenericClientAuthenticator> {
        self.authenticators
            .iter()
            .find(|authenticator| authenticator.auth_method() == method)
            .map(|authenticator| authenticator.as_ref())
    }

    /// The current state of the handshake.
    pub fn state(&self) -> AuthenticationState {
        self.state
    }

    /// The method selected by the router's challenge.
    pub fn selected_method(&self) -> Option<AuthMethod> {
        self.selected
    }

    /// Embeds every offered method into the HELLO message, in offer order.
    ///
    /// When methods carry different `authid`s, the last one is sent.
    pub async fn embed_into_hello_message(&self, message: &mut HelloMessage) -> Result<()> {
        for authenticator in &self.authenticators {
            authenticator
                .hello()
                .await?
                .embed_into_hello_message(message);
        }
        Ok(())
    }

    /// Answers a challenge from the router.
    pub async fn handle_challenge(
        &mut self,
        challenge: &ChallengeMessage,
    ) -> Result<AuthenticateMessage> {
        self.transition_state(AuthenticationState::Challenged)?;
        let authenticator = match self.authenticator(challenge.auth_method) {
            Some(authenticator) => authenticator,
            None => {
                self.state = AuthenticationState::Rejected;
                return Err(InteractionError::AuthenticationDenied(format!(
                    "received challenge for {}, which was not offered",
                    challenge.auth_method
                ))
                .into());
            }
        };
        match authenticator.handle_challenge(challenge).await {
            Ok(response) => {
                self.selected = Some(challenge.auth_method);
                self.transition_state(AuthenticationState::Responded)?;
                Ok(response)
            }
            Err(err) => {
                self.state = AuthenticationState::Rejected;
                Err(err.context("failed to answer authentication challenge"))
            }
        }
    }

    /// Accepts the router's WELCOME, returning the identity the peer was authenticated as.
    ///
    /// Fails if the router reports a different method than the one that was challenged, or if the
    /// authenticator rejects the router's final message.
    pub async fn accept(&mut self, welcome: &WelcomeMessage) -> Result<Identity> {
        let result = self.verify_welcome(welcome).await;
        match result {
            Ok(identity) => {
                self.transition_state(AuthenticationState::Accepted)?;
                Ok(identity)
            }
            Err(err) => {
                self.state = AuthenticationState::Rejected;
                Err(err)
            }
        }
    }

    async fn verify_welcome(&self, welcome: &WelcomeMessage) -> Result<Identity> {
        let selected = match (self.state, self.selected) {
            (AuthenticationState::Idle, _) => {
                debug!("Router welcomed peer without authentication challenge");
                return Ok(Identity::from_welcome_details(&welcome.details));
            }
            (AuthenticationState::Responded, Some(selected)) => selected,
            (state, _) => {
                return Err(InteractionError::ProtocolViolation(format!(
                    "received WELCOME while authentication is {state}"
                ))
                .into());
            }
        };
        let method = required_string(&welcome.details, "authmethod")
            .map_err(|err| InteractionError::AuthenticationFailed(err.to_string()))?;
        if method != selected.to_string() {
            return Err(InteractionError::AuthenticationFailed(format!(
                "router authenticated with {method}, expected {selected}"
            ))
            .into());
        }
        let authenticator = self
            .authenticator(selected)
            .ok_or_else(|| Error::msg("expected authenticator to exist"))?;
        authenticator.verify_signature(welcome).await?;
        Ok(Identity::from_welcome_details(&welcome.details))
    }

    /// Marks the handshake as rejected.
    pub fn reject(&mut self) {
        if !self.state.finished() {
            self.state = AuthenticationState::Rejected;
        }
    }

    fn transition_state(&mut self, state: AuthenticationState) -> Result<()> {
        if !self.state.allowed_state_transition(&state) {
            return Err(InteractionError::ProtocolViolation(format!(
                "authentication cannot move from {} to {state}",
                self.state
            ))
            .into());
        }
        self.state = state;
        Ok(())
    }
}
