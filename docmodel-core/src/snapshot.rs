//! Point-in-time document reads and the recursive packing walk.
//!
//! Backends use [`to_native`] before they store or compare caller data and [`from_native`]
//! when they need neutral values back. The walk dispatches over the closed set of special
//! kinds, recurses into arrays and maps, and passes everything else through untouched.
//! Explicit `null` counts as "everything else".

use serde::Serialize;

use crate::{
    converter::NativeConverter,
    reference::Reference,
    value::{Fields, Value},
};

/// A document as read from the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub reference: Reference,
    pub data: Fields,
}

impl Snapshot {
    pub fn new(reference: Reference, data: Fields) -> Self {
        Self { reference, data }
    }

    /// Packs a backend read. A read with no data is an absent snapshot, never an error.
    pub fn pack(reference: Reference, data: Option<Fields>) -> Option<Snapshot> {
        data.map(|data| Snapshot::new(reference, data))
    }

    pub fn id(&self) -> &str {
        self.reference.id()
    }

    pub fn path(&self) -> &str {
        self.reference.path()
    }
}

/// Converts neutral special values and the server timestamp marker into the backend's
/// native shapes.
pub fn to_native(value: &Value, converter: &dyn NativeConverter) -> Value {
    match value {
        Value::Timestamp(timestamp) => converter.timestamp_to_native(*timestamp),
        Value::GeoPoint(point) => converter.geo_point_to_native(*point),
        Value::Reference(reference) => converter.reference_to_native(reference),
        Value::ServerTimestamp => converter.server_timestamp(),
        Value::Array(items) => Value::Array(items.iter().map(|item| to_native(item, converter)).collect()),
        Value::Map(fields) => Value::Map(to_native_fields(fields, converter)),
        other => other.clone(),
    }
}

/// Converts the backend's native special values back into their neutral form. Natives the
/// converter does not recognize pass through.
pub fn from_native(value: &Value, converter: &dyn NativeConverter) -> Value {
    match value {
        Value::Native(_) => {
            if converter.is_server_timestamp(value) {
                Value::ServerTimestamp
            } else if let Ok(timestamp) = converter.timestamp_from_native(value) {
                Value::Timestamp(timestamp)
            } else if let Ok(point) = converter.geo_point_from_native(value) {
                Value::GeoPoint(point)
            } else if let Ok(reference) = converter.reference_from_native(value) {
                Value::Reference(reference)
            } else {
                value.clone()
            }
        }
        Value::Array(items) => Value::Array(items.iter().map(|item| from_native(item, converter)).collect()),
        Value::Map(fields) => Value::Map(from_native_fields(fields, converter)),
        other => other.clone(),
    }
}

pub fn to_native_fields(fields: &Fields, converter: &dyn NativeConverter) -> Fields {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), to_native(value, converter)))
        .collect()
}

pub fn from_native_fields(fields: &Fields, converter: &dyn NativeConverter) -> Fields {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), from_native(value, converter)))
        .collect()
}
