//! Conversions between neutral special types and a backend's native representation.
//!
//! Every codec receives a [`NativeConverter`] explicitly, so the same entity definition can
//! be encoded for any backend. A backend with native special types (a concrete timestamp
//! class, a reference handle) overrides the methods; one that stores the neutral [`Value`]
//! variants as they are keeps the defaults.

use std::sync::Arc;

use crate::{
    error::{SpecialType, UnexpectedTypeError},
    geo_point::GeoPoint,
    reference::Reference,
    timestamp::Timestamp,
    value::Value,
};

pub trait NativeConverter: Send + Sync {
    /// Recognizes and unwraps a native timestamp.
    fn timestamp_from_native(&self, value: &Value) -> Result<Timestamp, UnexpectedTypeError> {
        match value {
            Value::Timestamp(timestamp) => Ok(*timestamp),
            other => Err(UnexpectedTypeError::new(SpecialType::Timestamp, other.type_name())),
        }
    }

    fn timestamp_to_native(&self, timestamp: Timestamp) -> Value {
        Value::Timestamp(timestamp)
    }

    /// Recognizes and unwraps a native geo point.
    fn geo_point_from_native(&self, value: &Value) -> Result<GeoPoint, UnexpectedTypeError> {
        match value {
            Value::GeoPoint(point) => Ok(*point),
            other => Err(UnexpectedTypeError::new(SpecialType::GeoPoint, other.type_name())),
        }
    }

    fn geo_point_to_native(&self, point: GeoPoint) -> Value {
        Value::GeoPoint(point)
    }

    /// Recognizes and unwraps a native document reference.
    fn reference_from_native(&self, value: &Value) -> Result<Reference, UnexpectedTypeError> {
        match value {
            Value::Reference(reference) => Ok(reference.clone()),
            other => Err(UnexpectedTypeError::new(
                SpecialType::DocumentReference,
                other.type_name(),
            )),
        }
    }

    fn reference_to_native(&self, reference: &Reference) -> Value {
        Value::Reference(reference.clone())
    }

    /// The value that asks the backend to stamp the commit time.
    fn server_timestamp(&self) -> Value {
        Value::ServerTimestamp
    }

    fn is_server_timestamp(&self, value: &Value) -> bool {
        matches!(value, Value::ServerTimestamp)
    }
}

/// A converter for backends that keep special types in their neutral form.
///
/// Also used to encode and decode wire JSON, where no backend is involved.
#[derive(Debug, Default, Clone, Copy)]
pub struct Neutral;

impl NativeConverter for Neutral {}

impl<C: NativeConverter + ?Sized> NativeConverter for &C {
    fn timestamp_from_native(&self, value: &Value) -> Result<Timestamp, UnexpectedTypeError> {
        (**self).timestamp_from_native(value)
    }

    fn timestamp_to_native(&self, timestamp: Timestamp) -> Value {
        (**self).timestamp_to_native(timestamp)
    }

    fn geo_point_from_native(&self, value: &Value) -> Result<GeoPoint, UnexpectedTypeError> {
        (**self).geo_point_from_native(value)
    }

    fn geo_point_to_native(&self, point: GeoPoint) -> Value {
        (**self).geo_point_to_native(point)
    }

    fn reference_from_native(&self, value: &Value) -> Result<Reference, UnexpectedTypeError> {
        (**self).reference_from_native(value)
    }

    fn reference_to_native(&self, reference: &Reference) -> Value {
        (**self).reference_to_native(reference)
    }

    fn server_timestamp(&self) -> Value {
        (**self).server_timestamp()
    }

    fn is_server_timestamp(&self, value: &Value) -> bool {
        (**self).is_server_timestamp(value)
    }
}

impl<C: NativeConverter + ?Sized> NativeConverter for Arc<C> {
    fn timestamp_from_native(&self, value: &Value) -> Result<Timestamp, UnexpectedTypeError> {
        (**self).timestamp_from_native(value)
    }

    fn timestamp_to_native(&self, timestamp: Timestamp) -> Value {
        (**self).timestamp_to_native(timestamp)
    }

    fn geo_point_from_native(&self, value: &Value) -> Result<GeoPoint, UnexpectedTypeError> {
        (**self).geo_point_from_native(value)
    }

    fn geo_point_to_native(&self, point: GeoPoint) -> Value {
        (**self).geo_point_to_native(point)
    }

    fn reference_from_native(&self, value: &Value) -> Result<Reference, UnexpectedTypeError> {
        (**self).reference_from_native(value)
    }

    fn reference_to_native(&self, reference: &Reference) -> Value {
        (**self).reference_to_native(reference)
    }

    fn server_timestamp(&self) -> Value {
        (**self).server_timestamp()
    }

    fn is_server_timestamp(&self, value: &Value) -> bool {
        (**self).is_server_timestamp(value)
    }
}
