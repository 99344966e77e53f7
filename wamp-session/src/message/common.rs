use anyhow::Error;

use crate::{
    core::{
        close::CloseReason,
        error::ApplicationError,
        id::Id,
        types::{
            Dictionary,
            Integer,
            List,
            Value,
        },
        uri::Uri,
    },
    message::message::{
        AbortMessage,
        ErrorMessage,
        GoodbyeMessage,
        Message,
    },
};

fn error_details(error: &Error) -> Dictionary {
    Dictionary::from_iter([("message".to_owned(), Value::String(error.to_string()))])
}

fn error_payload(error: &Error) -> (List, Dictionary) {
    match error.downcast_ref::<ApplicationError>() {
        Some(error) => (error.arguments.clone(), error.arguments_keyword.clone()),
        None => (List::default(), Dictionary::default()),
    }
}

/// Creates an ABORT message for the error.
pub fn abort_message_for_error(error: &Error) -> Message {
    let (arguments, arguments_keyword) = error_payload(error);
    Message::Abort(AbortMessage {
        details: error_details(error),
        reason: Uri::for_error(error),
        arguments,
        arguments_keyword,
    })
}

pub fn goodbye_with_close_reason(close_reason: CloseReason) -> Message {
    Message::Goodbye(GoodbyeMessage {
        details: Dictionary::default(),
        reason: close_reason.uri(),
    })
}

/// The reply to a GOODBYE initiated by the other side.
pub fn goodbye_and_out() -> Message {
    goodbye_with_close_reason(CloseReason::GoodbyeAndOut)
}

/// Creates an ERROR message answering a request of the given type.
pub fn error_for_request(request_type: Integer, request: Id, error: &Error) -> Message {
    let (arguments, arguments_keyword) = error_payload(error);
    Message::Error(ErrorMessage {
        request_type,
        request,
        details: error_details(error),
        error: Uri::for_error(error),
        arguments,
        arguments_keyword,
    })
}
