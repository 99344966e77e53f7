use std::{
    fmt::Display,
    sync::LazyLock,
};

use regex::Regex;
use serde::{
    Deserialize,
    Serialize,
    de::{
        Unexpected,
        Visitor,
    },
};
use thiserror::Error;

use crate::core::error::{
    ApplicationError,
    BasicError,
    InteractionError,
};

/// Error for an invalid URI.
#[derive(Debug, Error)]
#[error("invalid URI: {0}")]
pub struct InvalidUri(String);

static STRICT_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9a-z_]+\.)*([0-9a-z_]+)$").unwrap());

static WILDCARD_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9a-z_]*\.)*([0-9a-z_]*)$").unwrap());

/// Validates a strict URI.
pub fn validate_strict_uri(uri: &str) -> Result<(), InvalidUri> {
    if STRICT_URI.is_match(uri) {
        Ok(())
    } else {
        Err(InvalidUri(uri.to_owned()))
    }
}

/// Validates a URI that may contain empty (wildcard) components.
pub fn validate_wildcard_uri(uri: &str) -> Result<(), InvalidUri> {
    if WILDCARD_URI.is_match(uri) {
        Ok(())
    } else {
        Err(InvalidUri(uri.to_owned()))
    }
}

/// A uniform resource identifier, naming realms, topics, procedures, and error reasons.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Uri(String);

impl Uri {
    /// Constructs a URI directly from a value known to be valid, skipping validation.
    pub(crate) fn from_known<S>(value: S) -> Self
    where
        S: Into<String>,
    {
        Self(value.into())
    }

    /// The URI describing the given error, as reported in ERROR and ABORT messages.
    pub fn for_error(error: &anyhow::Error) -> Self {
        if let Some(error) = error.downcast_ref::<ApplicationError>() {
            return error.reason.clone();
        }
        if let Some(error) = error.downcast_ref::<InteractionError>() {
            return Self::from_known(format!("wamp.error.{}", error.uri_component()));
        }
        if let Some(error) = error.downcast_ref::<BasicError>() {
            return Self::from_known(format!("wamp.error.{}", error.uri_component()));
        }
        Self::from_known("wamp.error.internal")
    }

    /// Splits the URI into its components.
    pub fn split(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl Display for Uri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for Uri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Uri {
    type Error = InvalidUri;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_strict_uri(&value)?;
        Ok(Self(value))
    }
}

impl TryFrom<&str> for Uri {
    type Error = InvalidUri;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_owned())
    }
}

impl From<Uri> for String {
    fn from(value: Uri) -> Self {
        value.0
    }
}

struct UriVisitor;

impl<'de> Visitor<'de> for UriVisitor {
    type Value = Uri;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "a URI")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Uri::try_from(v).map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for Uri {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(UriVisitor)
    }
}

/// [`Uri`], but with empty components allowed for wildcard matching.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct WildcardUri(String);

impl Display for WildcardUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for WildcardUri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WildcardUri {
    type Error = InvalidUri;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_wildcard_uri(&value)?;
        Ok(Self(value))
    }
}

impl TryFrom<&str> for WildcardUri {
    type Error = InvalidUri;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_owned())
    }
}

impl From<Uri> for WildcardUri {
    fn from(value: Uri) -> Self {
        Self(value.0)
    }
}

struct WildcardUriVisitor;

impl<'de> Visitor<'de> for WildcardUriVisitor {
    type Value = WildcardUri;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "a wildcard URI")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        WildcardUri::try_from(v).map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for WildcardUri {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(WildcardUriVisitor)
    }
}
