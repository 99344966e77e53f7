use crate::core::uri::Uri;

/// The reason for closing a WAMP session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer is leaving of its own accord.
    #[default]
    Normal,
    /// The peer is shutting down.
    SystemShutdown,
    /// The peer is leaving the realm to join another.
    CloseRealm,
    /// Acknowledges a GOODBYE initiated by the other side.
    GoodbyeAndOut,
}

impl CloseReason {
    /// URI for the close reason.
    pub fn uri(&self) -> Uri {
        let component = match self {
            Self::Normal => "normal",
            Self::SystemShutdown => "system_shutdown",
            Self::CloseRealm => "close_realm",
            Self::GoodbyeAndOut => "goodbye_and_out",
        };
        Uri::from_known(format!("wamp.close.{component}"))
    }
}
