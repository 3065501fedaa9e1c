//! Structured pointers to documents.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, ser::SerializeStruct};

use crate::error::{ParseError, ParseResult};

/// A pointer to a single document: its id, its full path, and the document that owns its
/// collection, if any.
///
/// A valid path has a positive, even number of non-empty `/`-delimited segments, so
/// `users/alice` and `users/alice/posts/p1` are documents while `users` is a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    id: String,
    path: String,
    parent: Option<Box<Reference>>,
}

impl Reference {
    /// Parses a document path.
    ///
    /// # Errors
    ///
    /// Fails when the path is empty, contains an empty segment, or has an odd number of
    /// segments.
    pub fn from_path(path: &str) -> ParseResult<Self> {
        let segments = split_path(path)?;
        if segments.len() % 2 != 0 {
            return Err(ParseError::validation(format!(
                "Document path must have an even number of segments: \"{path}\""
            )));
        }

        Ok(Self::from_segments(&segments))
    }

    /// Builds the reference to document `id` inside `collection_path`.
    pub fn new(collection_path: &str, id: &str) -> ParseResult<Self> {
        Self::from_path(&format!("{collection_path}/{id}"))
    }

    fn from_segments(segments: &[&str]) -> Self {
        let parent = if segments.len() > 2 {
            Some(Box::new(Self::from_segments(&segments[..segments.len() - 2])))
        } else {
            None
        };

        Self {
            id: segments[segments.len() - 1].to_string(),
            path: segments.join("/"),
            parent,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parent(&self) -> Option<&Reference> {
        self.parent.as_deref()
    }

    /// The path of the collection holding this document.
    pub fn collection_path(&self) -> &str {
        &self.path[..self.path.len() - self.id.len() - 1]
    }

    /// The reference to document `id` in the sub-collection `collection` of this document.
    pub fn child(&self, collection: &str, id: &str) -> ParseResult<Self> {
        Self::from_path(&format!("{}/{collection}/{id}", self.path))
    }
}

/// Splits a `/`-delimited path, rejecting empty paths and empty segments.
pub fn split_path(path: &str) -> ParseResult<Vec<&str>> {
    if path.is_empty() {
        return Err(ParseError::validation("Path must not be empty"));
    }

    let segments = path.split('/').collect::<Vec<_>>();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(ParseError::validation(format!(
            "Path must not contain empty segments: \"{path}\""
        )));
    }

    Ok(segments)
}

/// Checks that `path` addresses a collection: a positive, odd number of non-empty segments.
pub fn validate_collection_path(path: &str) -> ParseResult<()> {
    if split_path(path)?.len() % 2 == 0 {
        return Err(ParseError::validation(format!(
            "Collection path must have an odd number of segments: \"{path}\""
        )));
    }

    Ok(())
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Reference", 2)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("path", &self.path)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            id: Option<String>,
            path: String,
        }

        let raw = Raw::deserialize(deserializer)?;
        let reference = Reference::from_path(&raw.path).map_err(serde::de::Error::custom)?;
        match raw.id {
            Some(id) if id != reference.id => Err(serde::de::Error::custom(format!(
                "Reference id \"{id}\" does not match path \"{}\"",
                reference.path
            ))),
            _ => Ok(reference),
        }
    }
}
