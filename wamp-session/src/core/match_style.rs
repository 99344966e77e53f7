use std::fmt::Display;

/// How the router should match a registration or subscription URI.
///
/// Exact matching is the default and is expressed by omitting the match style entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStyle {
    /// The URI is a prefix of the called procedure or published topic.
    Prefix,
    /// Empty URI components match any single component.
    Wildcard,
}

impl MatchStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prefix => "prefix",
            Self::Wildcard => "wildcard",
        }
    }
}

impl Display for MatchStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
