use crate::core::types::Dictionary;

/// The identity a peer was authenticated as, reported by the router in WELCOME.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Identity {
    /// The authentication ID the peer was actually authenticated as.
    pub id: String,
    /// The authentication role the peer was authenticated for.
    pub role: String,
}

impl Identity {
    /// Reads the identity from WELCOME details, which may omit either field for anonymous
    /// sessions.
    pub fn from_welcome_details(details: &Dictionary) -> Self {
        let field = |key: &str| {
            details
                .get(key)
                .and_then(|value| value.string())
                .unwrap_or_default()
                .to_owned()
        };
        Self {
            id: field("authid"),
            role: field("authrole"),
        }
    }
}
