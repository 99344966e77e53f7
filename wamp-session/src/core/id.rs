use std::fmt::Display;

use async_trait::async_trait;
use futures_util::lock::Mutex;
use serde::{
    Deserialize,
    Serialize,
    de::{
        Unexpected,
        Visitor,
    },
};
use thiserror::Error;

/// An integer ID, used for identifying sessions, requests, registrations, and subscriptions.
///
/// IDs are drawn from `[1, 2^53]`, so that they are representable in IEEE-754 doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Id(u64);

impl Id {
    /// The minimum allowable value of an ID.
    pub const MIN: Id = Id(1);

    /// The maximum allowable value of an ID.
    pub const MAX: Id = Id(1 << 53);

    /// The ID following this one, wrapping around at [`Self::MAX`].
    pub fn next(self) -> Id {
        if self == Self::MAX {
            Self::MIN
        } else {
            Id(self.0 + 1)
        }
    }

    /// The raw integer value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl Default for Id {
    fn default() -> Self {
        Id::MIN
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Error for an ID being out of range.
#[derive(Debug, Error)]
#[error("{value} is out of range for IDs")]
pub struct IdOutOfRange {
    value: u64,
}

impl TryFrom<u64> for Id {
    type Error = IdOutOfRange;
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value < Self::MIN.0 || value > Self::MAX.0 {
            Err(IdOutOfRange { value })
        } else {
            Ok(Id(value))
        }
    }
}

struct IdVisitor;

impl<'de> Visitor<'de> for IdVisitor {
    type Value = Id;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            "an unsigned integer in the range [{}, {}]",
            Id::MIN,
            Id::MAX
        )
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Id::try_from(v).map_err(|_| E::invalid_value(Unexpected::Unsigned(v), &self))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        u64::try_from(v)
            .ok()
            .and_then(|v| Id::try_from(v).ok())
            .ok_or_else(|| E::invalid_value(Unexpected::Signed(v), &self))
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_u64(IdVisitor)
    }
}

/// An ID allocator.
#[async_trait]
pub trait IdAllocator: Send + Sync {
    /// Generates a new ID.
    async fn generate_id(&self) -> Id;

    /// Resets the allocator to its initial state.
    async fn reset(&self);
}

/// An ID allocator that generates IDs sequentially.
///
/// Used for session-scoped request IDs. Callers are responsible for skipping IDs that are still
/// in use after the sequence wraps.
#[derive(Debug, Default)]
pub struct SequentialIdAllocator {
    next: Mutex<Id>,
}

#[async_trait]
impl IdAllocator for SequentialIdAllocator {
    async fn generate_id(&self) -> Id {
        let mut next = self.next.lock().await;
        let id = *next;
        *next = id.next();
        id
    }

    async fn reset(&self) {
        *self.next.lock().await = Id::MIN;
    }
}

#[cfg(test)]
mod id_test {
    use crate::core::id::{
        Id,
        IdAllocator,
        SequentialIdAllocator,
    };

    #[test]
    fn fails_deserialization_out_of_range() {
        assert_matches::assert_matches!(serde_json::from_str::<Id>(r#"0"#), Err(err) => {
            assert!(err.to_string().contains("expected an unsigned integer in the range"));
        });
        assert_matches::assert_matches!(serde_json::from_str::<Id>(r#"9007199254740993"#), Err(err) => {
            assert!(err.to_string().contains("expected an unsigned integer in the range"));
        });
        assert_matches::assert_matches!(serde_json::from_str::<Id>(r#"-5"#), Err(_));
    }

    #[test]
    fn wraps_at_maximum() {
        assert_eq!(Id::MAX.next(), Id::MIN);
        assert_eq!(Id::MIN.next(), Id::try_from(2).unwrap());
    }

    #[tokio::test]
    async fn sequential_allocator_starts_over_on_reset() {
        let allocator = SequentialIdAllocator::default();
        assert_eq!(allocator.generate_id().await, Id::try_from(1).unwrap());
        assert_eq!(allocator.generate_id().await, Id::try_from(2).unwrap());
        allocator.reset().await;
        assert_eq!(allocator.generate_id().await, Id::try_from(1).unwrap());
    }
}
