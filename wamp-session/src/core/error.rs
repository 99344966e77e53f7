use anyhow::Error;
use thiserror::Error;

use crate::{
    core::{
        types::{
            Dictionary,
            List,
            Value,
        },
        uri::Uri,
    },
    message::message::Message,
};

/// A basic error that occurs while processing a WAMP message.
#[derive(Debug, Error)]
pub enum BasicError {
    /// A generic resource was not found.
    #[error("{0}")]
    NotFound(String),
    /// An invalid argument was passed.
    #[error("{0}")]
    InvalidArgument(String),
    /// The operation is not allowed based on process configuration.
    #[error("{0}")]
    NotAllowed(String),
    /// The operation is not allowed based on user permissions.
    #[error("{0}")]
    PermissionDenied(String),
    /// Some internal error occurred.
    #[error("{0}")]
    Internal(String),
}

impl BasicError {
    /// The trailing URI component for the error.
    pub fn uri_component(&self) -> &str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotAllowed(_) => "not_allowed",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Internal(_) => "internal",
        }
    }
}

/// An interaction error defined by the WAMP standard.
///
/// These are reserved for errors that peers must be able to recognize from their URI alone.
#[derive(Debug, Error)]
pub enum InteractionError {
    /// A message violated the WAMP protocol.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("no such procedure")]
    NoSuchProcedure,
    /// The procedure is already registered, either by this session or another.
    #[error("procedure already exists")]
    ProcedureAlreadyExists,
    #[error("no such registration")]
    NoSuchRegistration,
    #[error("no such subscription")]
    NoSuchSubscription,
    #[error("no such realm")]
    NoSuchRealm,
    #[error("no such role")]
    NoSuchRole,
    /// The authentication ID is unknown to the router.
    #[error("no such principal: {0}")]
    NoSuchPrincipal(String),
    /// The router rejected the credentials presented during the handshake.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    /// The router refused to authenticate the peer at all.
    #[error("authentication denied: {0}")]
    AuthenticationDenied(String),
    #[error("not authorized: {0}")]
    NotAuthorized(String),
    /// The operation was canceled before it completed.
    #[error("canceled")]
    Canceled,
}

impl InteractionError {
    /// The trailing URI component for the error.
    pub fn uri_component(&self) -> &str {
        match self {
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::NoSuchProcedure => "no_such_procedure",
            Self::ProcedureAlreadyExists => "procedure_already_exists",
            Self::NoSuchRegistration => "no_such_registration",
            Self::NoSuchSubscription => "no_such_subscription",
            Self::NoSuchRealm => "no_such_realm",
            Self::NoSuchRole => "no_such_role",
            Self::NoSuchPrincipal(_) => "no_such_principal",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::AuthenticationDenied(_) => "authentication_denied",
            Self::NotAuthorized(_) => "not_authorized",
            Self::Canceled => "canceled",
        }
    }

    /// Checks if the error is raised by the authentication handshake.
    pub fn is_authentication_error(&self) -> bool {
        matches!(
            self,
            Self::NoSuchPrincipal(_)
                | Self::AuthenticationFailed(_)
                | Self::AuthenticationDenied(_)
                | Self::NotAuthorized(_)
        )
    }
}

/// A domain error identified by an application-defined URI.
///
/// Procedure handlers return this error to report a failure that the caller should be able to
/// match on. Callers receive the same reason, message, and payload.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ApplicationError {
    pub reason: Uri,
    pub message: String,
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

impl ApplicationError {
    pub fn new<S>(reason: Uri, message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            reason,
            message: message.into(),
            arguments: List::default(),
            arguments_keyword: Dictionary::default(),
        }
    }

    /// Attaches a positional payload to the error.
    pub fn with_arguments(mut self, arguments: List) -> Self {
        self.arguments = arguments;
        self
    }

    /// Attaches a keyword payload to the error.
    pub fn with_arguments_keyword(mut self, arguments_keyword: Dictionary) -> Self {
        self.arguments_keyword = arguments_keyword;
        self
    }
}

/// An error related to the lifecycle of the local session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The operation is not valid in the current session state.
    #[error("cannot {operation} while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    /// The session started leaving the realm before the operation completed.
    #[error("session is closing")]
    Closing,
    /// The session was closed before the operation completed.
    #[error("session closed: {reason}")]
    Closed { reason: Uri },
    /// The connection to the router was lost.
    #[error("transport lost: {0}")]
    TransportLost(String),
}

/// Creates an [`struct@Error`] from a URI error reason and message.
pub fn error_from_uri_reason_and_message(reason: Uri, message: String) -> Error {
    match reason.as_ref() {
        "wamp.error.not_found" => BasicError::NotFound(message).into(),
        "wamp.error.invalid_argument" => BasicError::InvalidArgument(message).into(),
        "wamp.error.not_allowed" => BasicError::NotAllowed(message).into(),
        "wamp.error.permission_denied" => BasicError::PermissionDenied(message).into(),
        "wamp.error.internal" => BasicError::Internal(message).into(),
        "wamp.error.protocol_violation" => InteractionError::ProtocolViolation(message).into(),
        "wamp.error.no_such_procedure" => InteractionError::NoSuchProcedure.into(),
        "wamp.error.procedure_already_exists" => InteractionError::ProcedureAlreadyExists.into(),
        "wamp.error.no_such_registration" => InteractionError::NoSuchRegistration.into(),
        "wamp.error.no_such_subscription" => InteractionError::NoSuchSubscription.into(),
        "wamp.error.no_such_realm" => InteractionError::NoSuchRealm.into(),
        "wamp.error.no_such_role" => InteractionError::NoSuchRole.into(),
        "wamp.error.no_such_principal" => InteractionError::NoSuchPrincipal(message).into(),
        "wamp.error.authentication_failed" => {
            InteractionError::AuthenticationFailed(message).into()
        }
        "wamp.error.authentication_denied" => {
            InteractionError::AuthenticationDenied(message).into()
        }
        "wamp.error.not_authorized" => InteractionError::NotAuthorized(message).into(),
        "wamp.error.canceled" => InteractionError::Canceled.into(),
        _ => ApplicationError::new(reason, message).into(),
    }
}

/// Extracts a URI error reason and message from a WAMP message.
pub fn extract_error_uri_reason_and_message(message: &Message) -> Result<(&Uri, &str), Error> {
    let reason = message
        .reason()
        .ok_or_else(|| Error::msg("message does not contain a reason uri"))?;
    let message = message
        .details()
        .and_then(|details| details.get("message"))
        .and_then(Value::string)
        .unwrap_or("unknown error");
    Ok((reason, message))
}

/// Constructs an [`struct@Error`] from a WAMP message.
///
/// Application errors keep the payload of the message. Fails if the message does not describe any
/// error.
pub fn error_from_message(message: &Message) -> Result<Error, Error> {
    let (reason, text) = extract_error_uri_reason_and_message(message)?;
    let error = error_from_uri_reason_and_message(reason.clone(), text.to_owned());
    let (arguments, arguments_keyword) = match message {
        Message::Error(message) => (&message.arguments, &message.arguments_keyword),
        Message::Abort(message) => (&message.arguments, &message.arguments_keyword),
        _ => return Ok(error),
    };
    match error.downcast::<ApplicationError>() {
        Ok(error) => Ok(error
            .with_arguments(arguments.clone())
            .with_arguments_keyword(arguments_keyword.clone())
            .into()),
        Err(error) => Ok(error),
    }
}
