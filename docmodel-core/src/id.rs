//! Entity-branded document identifiers.

use std::{fmt, hash, marker::PhantomData, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::{error::ModelError, schema::IdSchema};

/// The id of a document of entity `E`.
///
/// Ids of different entities are distinct types, so a post id cannot be passed where an
/// author id is expected. The only ways to build one validate the string: it must be
/// non-empty and must not contain `/`.
pub struct Id<E> {
    value: String,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Id<E> {
    pub fn new(value: impl Into<String>) -> Result<Self, ModelError> {
        let value = value.into();
        IdSchema::validate(&value)?;
        Ok(Self {
            value,
            _entity: PhantomData,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_string(self) -> String {
        self.value
    }
}

impl<E> Clone for Id<E> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> PartialEq for Id<E> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<E> Eq for Id<E> {}

impl<E> PartialOrd for Id<E> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Id<E> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl<E> hash::Hash for Id<E> {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<E> fmt::Debug for Id<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Id").field(&self.value).finish()
    }
}

impl<E> fmt::Display for Id<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<E> AsRef<str> for Id<E> {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl<E> FromStr for Id<E> {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Id::new(value)
    }
}

impl<E> TryFrom<String> for Id<E> {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Id::new(value)
    }
}

impl<E> TryFrom<&str> for Id<E> {
    type Error = ModelError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Id::new(value)
    }
}

impl<E> Serialize for Id<E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de, E> Deserialize<'de> for Id<E> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Id::new(value).map_err(de::Error::custom)
    }
}
