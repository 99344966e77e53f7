use serde::{
    Deserialize,
    Serialize,
};

/// Hash map used across the library.
pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

/// Hash set used across the library.
pub type HashSet<V> = std::collections::HashSet<V, ahash::RandomState>;

/// An unsigned integer, as transmitted in WAMP messages.
pub type Integer = u64;

/// A string-keyed dictionary of values.
pub type Dictionary = HashMap<String, Value>;

/// An ordered list of values.
pub type List = Vec<Value>;

/// A dynamically-typed value carried in WAMP payloads and message details.
///
/// Non-negative integers are always represented as [`Value::Integer`], so that values compare
/// equal regardless of whether they were constructed locally or decoded off the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(Integer),
    SignedInteger(i64),
    Float(f64),
    String(String),
    List(List),
    Dictionary(Dictionary),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn integer(&self) -> Option<Integer> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// The value as a signed integer, which covers both integer variants.
    pub fn signed_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => i64::try_from(*value).ok(),
            Self::SignedInteger(value) => Some(*value),
            _ => None,
        }
    }

    pub fn float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            Self::SignedInteger(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn string(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn list(&self) -> Option<&List> {
        match self {
            Self::List(value) => Some(value),
            _ => None,
        }
    }

    pub fn list_mut(&mut self) -> Option<&mut List> {
        match self {
            Self::List(value) => Some(value),
            _ => None,
        }
    }

    pub fn dictionary(&self) -> Option<&Dictionary> {
        match self {
            Self::Dictionary(value) => Some(value),
            _ => None,
        }
    }

    pub fn dictionary_mut(&mut self) -> Option<&mut Dictionary> {
        match self {
            Self::Dictionary(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Integer> for Value {
    fn from(value: Integer) -> Self {
        Self::Integer(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        match Integer::try_from(value) {
            Ok(value) => Self::Integer(value),
            Err(_) => Self::SignedInteger(value),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Dictionary> for Value {
    fn from(value: Dictionary) -> Self {
        Self::Dictionary(value)
    }
}

impl From<List> for Value {
    fn from(value: List) -> Self {
        Self::List(value)
    }
}
