//! Error types and result types for modeling and repository operations.
//!
//! Errors are grouped by where they originate:
//!
//! - [`StoreError`] - a failure reported by a backend (network, permission, quota)
//! - [`UnexpectedTypeError`] - a backend handed back a value that is not its native special type
//! - [`ParseError`] - a value failed to decode or encode against a variant schema
//! - [`ModelError`] - the crate-wide error that every operation returns
//!
//! Use [`ModelResult<T>`] as the return type for fallible operations.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// An error reported by a document store backend.
///
/// Backends map whatever their transport raises into this shape. The `code` is always
/// populated, falling back to `"unknown"` when the cause is not recognized.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{name} ({code}): {message}")]
pub struct StoreError {
    /// Machine readable error code, e.g. `permission-denied`.
    pub code: String,
    /// Error class name reported by the backend.
    pub name: String,
    /// Human readable description.
    pub message: String,
}

impl StoreError {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    /// The error used when nothing is known about the failure.
    pub fn unknown() -> Self {
        Self::new("unknown", "UnknownError", "Unknown error")
    }

    /// Wraps an unrecognized error, keeping its message.
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        Self::new("unknown", "UnknownError", err.to_string())
    }
}

/// The closed set of special types a codec can expect from a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpecialType {
    Timestamp,
    GeoPoint,
    DocumentReference,
}

impl fmt::Display for SpecialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SpecialType::Timestamp => "Timestamp",
            SpecialType::GeoPoint => "GeoPoint",
            SpecialType::DocumentReference => "DocumentReference",
        })
    }
}

/// A backend returned a value that is not the native special type a codec expected.
///
/// This signals a mismatch between the codec and the backend, not malformed data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Expected {expected}, got {actual}")]
pub struct UnexpectedTypeError {
    pub expected: SpecialType,
    pub actual: String,
}

impl UnexpectedTypeError {
    pub fn new(expected: SpecialType, actual: impl Into<String>) -> Self {
        Self {
            expected,
            actual: actual.into(),
        }
    }
}

/// What went wrong while decoding or encoding a single value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    /// The value has the wrong shape.
    #[error("Expected {expected}, got {actual}")]
    Type { expected: String, actual: String },
    /// A required key is missing.
    #[error("is missing")]
    Missing,
    /// The value is well formed but not allowed here.
    #[error("is forbidden: {0}")]
    Forbidden(String),
    /// The value failed a refinement.
    #[error("{0}")]
    Validation(String),
    /// A codec was handed a foreign special type.
    #[error(transparent)]
    UnexpectedType(#[from] UnexpectedTypeError),
}

/// A decode or encode failure, located by the key path where it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub path: Vec<String>,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind) -> Self {
        Self {
            path: Vec::new(),
            kind,
        }
    }

    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::Type {
            expected: expected.into(),
            actual: actual.into(),
        })
    }

    pub fn missing() -> Self {
        Self::new(ParseErrorKind::Missing)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::Forbidden(message.into()))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::Validation(message.into()))
    }

    /// Prefixes the error path with `segment`, used while unwinding out of nested values.
    pub fn at(mut self, segment: impl Into<String>) -> Self {
        self.path.insert(0, segment.into());
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "[{}] {}", self.path.join("."), self.kind)
        }
    }
}

impl std::error::Error for ParseError {}

impl From<UnexpectedTypeError> for ParseError {
    fn from(err: UnexpectedTypeError) -> Self {
        ParseError::new(ParseErrorKind::UnexpectedType(err))
    }
}

/// A specialized `Result` type for schema decoding and encoding.
pub type ParseResult<T> = Result<T, ParseError>;

/// Represents every error a modeling or repository operation can return.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The backend reported a failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    /// A codec received a special value of the wrong native type.
    #[error("Unexpected type: {0}")]
    UnexpectedType(#[from] UnexpectedTypeError),
    /// Stored data or caller input did not match a variant schema.
    #[error("Parse error: {0}")]
    Parse(ParseError),
    /// A required single result was not there.
    #[error("No such element: {0}")]
    NoSuchElement(String),
    /// An entity definition or repository configuration is invalid.
    #[error("Invalid definition: {0}")]
    Definition(String),
    /// Conversion between typed values and the JSON application form failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A defect: anything that does not fall into the categories above.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// A specialized `Result` type for modeling and repository operations.
pub type ModelResult<T> = Result<T, ModelError>;

impl ModelError {
    /// The backend error code, when this error came from the backend.
    pub fn store_code(&self) -> Option<&str> {
        match self {
            ModelError::Store(err) => Some(err.code.as_str()),
            _ => None,
        }
    }
}

impl From<ParseError> for ModelError {
    fn from(err: ParseError) -> Self {
        match err.kind {
            ParseErrorKind::UnexpectedType(inner) => ModelError::UnexpectedType(inner),
            _ => ModelError::Parse(err),
        }
    }
}

impl From<SerdeJsonError> for ModelError {
    fn from(err: SerdeJsonError) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_store_error_has_best_effort_fields() {
        let err = StoreError::unknown();
        assert_eq!(err.code, "unknown");
        assert_eq!(err.name, "UnknownError");
        assert_eq!(err.message, "Unknown error");

        let io = std::io::Error::other("socket closed");
        let wrapped = StoreError::from_error(&io);
        assert_eq!(wrapped.code, "unknown");
        assert_eq!(wrapped.message, "socket closed");
    }

    #[test]
    fn parse_error_path_is_prefixed_outward() {
        let err = ParseError::missing().at("lat").at("location");
        assert_eq!(err.path, vec!["location".to_string(), "lat".to_string()]);
        assert_eq!(err.to_string(), "[location.lat] is missing");
    }

    #[test]
    fn unexpected_type_is_lifted_out_of_parse_errors() {
        let err: ModelError = ParseError::from(UnexpectedTypeError::new(
            SpecialType::GeoPoint,
            "string",
        ))
        .at("location")
        .into();

        match err {
            ModelError::UnexpectedType(inner) => {
                assert_eq!(inner.expected, SpecialType::GeoPoint);
                assert_eq!(inner.actual, "string");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err: ModelError = ParseError::missing().into();
        assert!(matches!(err, ModelError::Parse(_)));
    }
}
