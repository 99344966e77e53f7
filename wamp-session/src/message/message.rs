use serde::de::{
    IgnoredAny,
    SeqAccess,
    Visitor,
};
use serde_struct_tuple::{
    DeserializeStructTuple,
    SerializeStructTuple,
};
use serde_struct_tuple_enum::{
    DeserializeStructTupleEnum,
    SerializeStructTupleEnum,
};

use crate::{
    auth::auth_method::AuthMethod,
    core::{
        id::Id,
        types::{
            Dictionary,
            Integer,
            List,
        },
        uri::{
            Uri,
            WildcardUri,
        },
    },
};

// Positional payloads are always written, even when empty, so that a keyword payload never shifts
// into the position of the positional one.
fn never(_: &List) -> bool {
    false
}

/// A HELLO message for a peer to initiate a WAMP session in a realm.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct HelloMessage {
    pub realm: Uri,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub details: Dictionary,
}

/// A WELCOME message for a router to confirm a peer's WAMP session in a realm.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct WelcomeMessage {
    pub session: Id,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub details: Dictionary,
}

/// An ABORT message for immediately terminating a WAMP session or session attempt.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct AbortMessage {
    pub details: Dictionary,
    pub reason: Uri,
    #[serde_struct_tuple(default, skip_serializing_if = List::is_empty)]
    pub arguments: List,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub arguments_keyword: Dictionary,
}

/// A CHALLENGE message for a router to request authentication from a peer.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct ChallengeMessage {
    pub auth_method: AuthMethod,
    #[serde_struct_tuple(default)]
    pub extra: Dictionary,
}

/// An AUTHENTICATE message for a peer to answer an authentication challenge.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct AuthenticateMessage {
    pub signature: String,
    #[serde_struct_tuple(default)]
    pub extra: Dictionary,
}

/// A GOODBYE message for ending a WAMP session with a two-way handshake.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct GoodbyeMessage {
    pub details: Dictionary,
    pub reason: Uri,
}

/// An ERROR message for communicating an error in response to a single request.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct ErrorMessage {
    pub request_type: Integer,
    pub request: Id,
    pub details: Dictionary,
    pub error: Uri,
    #[serde_struct_tuple(default, skip_serializing_if = never)]
    pub arguments: List,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub arguments_keyword: Dictionary,
}

/// A PUBLISH message for publishing an event to a topic.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct PublishMessage {
    pub request: Id,
    pub options: Dictionary,
    pub topic: Uri,
    #[serde_struct_tuple(default, skip_serializing_if = never)]
    pub arguments: List,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub arguments_keyword: Dictionary,
}

/// A PUBLISHED message for confirming an event was published.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct PublishedMessage {
    pub publish_request: Id,
    pub publication: Id,
}

/// A SUBSCRIBE message for subscribing to a topic.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct SubscribeMessage {
    pub request: Id,
    pub options: Dictionary,
    pub topic: WildcardUri,
}

/// A SUBSCRIBED message for confirming a subscription.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct SubscribedMessage {
    pub subscribe_request: Id,
    pub subscription: Id,
}

/// An UNSUBSCRIBE message for removing a subscription.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct UnsubscribeMessage {
    pub request: Id,
    pub subscribed_subscription: Id,
}

/// An UNSUBSCRIBED message for confirming a subscription was removed.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct UnsubscribedMessage {
    pub unsubscribe_request: Id,
}

/// An EVENT message for relaying a published event to a subscriber.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct EventMessage {
    pub subscribed_subscription: Id,
    pub published_publication: Id,
    pub details: Dictionary,
    #[serde_struct_tuple(default, skip_serializing_if = never)]
    pub publish_arguments: List,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub publish_arguments_keyword: Dictionary,
}

/// A CALL message for calling a procedure.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct CallMessage {
    pub request: Id,
    pub options: Dictionary,
    pub procedure: Uri,
    #[serde_struct_tuple(default, skip_serializing_if = never)]
    pub arguments: List,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub arguments_keyword: Dictionary,
}

/// A CANCEL message for canceling an outstanding call.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct CancelMessage {
    pub call_request: Id,
    pub options: Dictionary,
}

/// A RESULT message carrying a final or progressive result of a call.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct ResultMessage {
    pub call_request: Id,
    pub details: Dictionary,
    #[serde_struct_tuple(default, skip_serializing_if = never)]
    pub yield_arguments: List,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub yield_arguments_keyword: Dictionary,
}

/// A REGISTER message for registering a procedure in the realm.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct RegisterMessage {
    pub request: Id,
    pub options: Dictionary,
    pub procedure: WildcardUri,
}

/// A REGISTERED message for confirming a registration.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct RegisteredMessage {
    pub register_request: Id,
    pub registration: Id,
}

/// An UNREGISTER message for removing a registration.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct UnregisterMessage {
    pub request: Id,
    pub registered_registration: Id,
}

/// An UNREGISTERED message for confirming a registration was removed.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct UnregisteredMessage {
    pub unregister_request: Id,
}

/// An INVOCATION message for invoking a procedure on its callee.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct InvocationMessage {
    pub request: Id,
    pub registered_registration: Id,
    pub details: Dictionary,
    #[serde_struct_tuple(default, skip_serializing_if = never)]
    pub call_arguments: List,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub call_arguments_keyword: Dictionary,
}

/// An INTERRUPT message for canceling an invocation running on the callee.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct InterruptMessage {
    pub invocation_request: Id,
    pub options: Dictionary,
}

/// A YIELD message carrying a final or progressive result of an invocation.
#[derive(Debug, Default, Clone, PartialEq, SerializeStructTuple, DeserializeStructTuple)]
pub struct YieldMessage {
    pub invocation_request: Id,
    pub options: Dictionary,
    #[serde_struct_tuple(default, skip_serializing_if = never)]
    pub arguments: List,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub arguments_keyword: Dictionary,
}

/// A WAMP message.
#[derive(Debug, Clone, PartialEq, SerializeStructTupleEnum, DeserializeStructTupleEnum)]
#[tag(Integer)]
pub enum Message {
    #[tag = 1]
    Hello(HelloMessage),
    #[tag = 2]
    Welcome(WelcomeMessage),
    #[tag = 3]
    Abort(AbortMessage),
    #[tag = 4]
    Challenge(ChallengeMessage),
    #[tag = 5]
    Authenticate(AuthenticateMessage),
    #[tag = 6]
    Goodbye(GoodbyeMessage),
    #[tag = 8]
    Error(ErrorMessage),
    #[tag = 16]
    Publish(PublishMessage),
    #[tag = 17]
    Published(PublishedMessage),
    #[tag = 32]
    Subscribe(SubscribeMessage),
    #[tag = 33]
    Subscribed(SubscribedMessage),
    #[tag = 34]
    Unsubscribe(UnsubscribeMessage),
    #[tag = 35]
    Unsubscribed(UnsubscribedMessage),
    #[tag = 36]
    Event(EventMessage),
    #[tag = 48]
    Call(CallMessage),
    #[tag = 49]
    Cancel(CancelMessage),
    #[tag = 50]
    Result(ResultMessage),
    #[tag = 64]
    Register(RegisterMessage),
    #[tag = 65]
    Registered(RegisteredMessage),
    #[tag = 66]
    Unregister(UnregisterMessage),
    #[tag = 67]
    Unregistered(UnregisteredMessage),
    #[tag = 68]
    Invocation(InvocationMessage),
    #[tag = 69]
    Interrupt(InterruptMessage),
    #[tag = 70]
    Yield(YieldMessage),
}

impl Message {
    /// Checks if a message type tag is understood by this library.
    pub fn is_known_tag(tag: Integer) -> bool {
        matches!(
            tag,
            1 | 2 | 3 | 4 | 5 | 6 | 8 | 16 | 17 | 32..=36 | 48..=50 | 64..=70
        )
    }

    /// The message type tag, as encoded on the wire.
    pub fn message_tag(&self) -> Integer {
        match self {
            Self::Hello(_) => 1,
            Self::Welcome(_) => 2,
            Self::Abort(_) => 3,
            Self::Challenge(_) => 4,
            Self::Authenticate(_) => 5,
            Self::Goodbye(_) => 6,
            Self::Error(_) => 8,
            Self::Publish(_) => Self::PUBLISH_TAG,
            Self::Published(_) => 17,
            Self::Subscribe(_) => Self::SUBSCRIBE_TAG,
            Self::Subscribed(_) => 33,
            Self::Unsubscribe(_) => Self::UNSUBSCRIBE_TAG,
            Self::Unsubscribed(_) => 35,
            Self::Event(_) => 36,
            Self::Call(_) => Self::CALL_TAG,
            Self::Cancel(_) => 49,
            Self::Result(_) => 50,
            Self::Register(_) => Self::REGISTER_TAG,
            Self::Registered(_) => 65,
            Self::Unregister(_) => Self::UNREGISTER_TAG,
            Self::Unregistered(_) => 67,
            Self::Invocation(_) => Self::INVOCATION_TAG,
            Self::Interrupt(_) => 69,
            Self::Yield(_) => 70,
        }
    }

    /// The message name, mostly for logging.
    pub fn message_name(&self) -> &'static str {
        match self {
            Self::Hello(_) => "HELLO",
            Self::Welcome(_) => "WELCOME",
            Self::Abort(_) => "ABORT",
            Self::Challenge(_) => "CHALLENGE",
            Self::Authenticate(_) => "AUTHENTICATE",
            Self::Goodbye(_) => "GOODBYE",
            Self::Error(_) => "ERROR",
            Self::Publish(_) => "PUBLISH",
            Self::Published(_) => "PUBLISHED",
            Self::Subscribe(_) => "SUBSCRIBE",
            Self::Subscribed(_) => "SUBSCRIBED",
            Self::Unsubscribe(_) => "UNSUBSCRIBE",
            Self::Unsubscribed(_) => "UNSUBSCRIBED",
            Self::Event(_) => "EVENT",
            Self::Call(_) => "CALL",
            Self::Cancel(_) => "CANCEL",
            Self::Result(_) => "RESULT",
            Self::Register(_) => "REGISTER",
            Self::Registered(_) => "REGISTERED",
            Self::Unregister(_) => "UNREGISTER",
            Self::Unregistered(_) => "UNREGISTERED",
            Self::Invocation(_) => "INVOCATION",
            Self::Interrupt(_) => "INTERRUPT",
            Self::Yield(_) => "YIELD",
        }
    }

    /// The request ID on the message.
    pub fn request_id(&self) -> Option<Id> {
        match self {
            Self::Error(message) => Some(message.request),
            Self::Publish(message) => Some(message.request),
            Self::Published(message) => Some(message.publish_request),
            Self::Subscribe(message) => Some(message.request),
            Self::Subscribed(message) => Some(message.subscribe_request),
            Self::Unsubscribe(message) => Some(message.request),
            Self::Unsubscribed(message) => Some(message.unsubscribe_request),
            Self::Call(message) => Some(message.request),
            Self::Cancel(message) => Some(message.call_request),
            Self::Result(message) => Some(message.call_request),
            Self::Register(message) => Some(message.request),
            Self::Registered(message) => Some(message.register_request),
            Self::Unregister(message) => Some(message.request),
            Self::Unregistered(message) => Some(message.unregister_request),
            Self::Invocation(message) => Some(message.request),
            Self::Interrupt(message) => Some(message.invocation_request),
            Self::Yield(message) => Some(message.invocation_request),
            _ => None,
        }
    }

    /// The details dictionary on the message.
    pub fn details(&self) -> Option<&Dictionary> {
        match self {
            Self::Hello(message) => Some(&message.details),
            Self::Welcome(message) => Some(&message.details),
            Self::Abort(message) => Some(&message.details),
            Self::Goodbye(message) => Some(&message.details),
            Self::Error(message) => Some(&message.details),
            Self::Event(message) => Some(&message.details),
            Self::Result(message) => Some(&message.details),
            Self::Invocation(message) => Some(&message.details),
            _ => None,
        }
    }

    /// The error or close reason on the message.
    pub fn reason(&self) -> Option<&Uri> {
        match self {
            Self::Abort(message) => Some(&message.reason),
            Self::Goodbye(message) => Some(&message.reason),
            Self::Error(message) => Some(&message.error),
            _ => None,
        }
    }
}

/// The leading type tag of an encoded message, read without decoding the rest of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageTag(pub Integer);

struct MessageTagVisitor;

impl<'de> Visitor<'de> for MessageTagVisitor {
    type Value = MessageTag;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "a message tuple starting with an integer tag")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let tag: Integer = seq
            .next_element()?
            .ok_or_else(|| serde::de::Error::missing_field("tag"))?;
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(MessageTag(tag))
    }
}

impl<'de> serde::Deserialize<'de> for MessageTag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_seq(MessageTagVisitor)
    }
}
