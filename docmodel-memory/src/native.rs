//! The store's own representations of the special types.
//!
//! Everything the store writes goes through [`to_native`](docmodel_core::snapshot::to_native)
//! with the store as converter, so stored documents only ever hold these types inside
//! [`Value::Native`]. Neutral special values handed back by a caller are rejected by the
//! converter, as a real backend would reject a foreign timestamp class.

use std::any::Any;

use docmodel_core::{
    converter::NativeConverter,
    error::{SpecialType, UnexpectedTypeError},
    geo_point::GeoPoint,
    reference::Reference,
    timestamp::Timestamp,
    value::{NativeValue, Value},
};

use crate::store::InMemoryStore;

const TIMESTAMP: &str = "MemoryTimestamp";
const GEO_POINT: &str = "MemoryGeoPoint";
const REFERENCE: &str = "MemoryReference";
const SERVER_TIMESTAMP: &str = "MemoryServerTimestamp";

/// A stored point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryTimestamp {
    seconds: i64,
    nanoseconds: u32,
}

impl MemoryTimestamp {
    pub fn from_millis(millis: i64) -> Self {
        Timestamp::from_millis(millis).into()
    }

    pub fn to_millis(&self) -> i64 {
        Timestamp::from(*self).to_millis()
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn nanoseconds(&self) -> u32 {
        self.nanoseconds
    }
}

impl From<Timestamp> for MemoryTimestamp {
    fn from(timestamp: Timestamp) -> Self {
        Self {
            seconds: timestamp.seconds,
            nanoseconds: timestamp.nanoseconds,
        }
    }
}

impl From<MemoryTimestamp> for Timestamp {
    fn from(timestamp: MemoryTimestamp) -> Self {
        Timestamp {
            seconds: timestamp.seconds,
            nanoseconds: timestamp.nanoseconds,
        }
    }
}

/// A stored coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryGeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl MemoryGeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A stored pointer to another document of the same store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryReference {
    id: String,
    path: String,
}

impl MemoryReference {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl From<&Reference> for MemoryReference {
    fn from(reference: &Reference) -> Self {
        Self {
            id: reference.id().to_string(),
            path: reference.path().to_string(),
        }
    }
}

/// Placeholder replaced with the store clock when a write commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryServerTimestamp;

impl From<MemoryTimestamp> for Value {
    fn from(timestamp: MemoryTimestamp) -> Self {
        Value::Native(NativeValue::new(TIMESTAMP, timestamp))
    }
}

impl From<MemoryGeoPoint> for Value {
    fn from(point: MemoryGeoPoint) -> Self {
        Value::Native(NativeValue::new(GEO_POINT, point))
    }
}

impl From<MemoryReference> for Value {
    fn from(reference: MemoryReference) -> Self {
        Value::Native(NativeValue::new(REFERENCE, reference))
    }
}

impl From<MemoryServerTimestamp> for Value {
    fn from(marker: MemoryServerTimestamp) -> Self {
        Value::Native(NativeValue::new(SERVER_TIMESTAMP, marker))
    }
}

/// Borrows the native `T` inside `value`, if that is what it holds.
pub fn native_as<T: Any>(value: &Value) -> Option<&T> {
    match value {
        Value::Native(native) => native.downcast_ref::<T>(),
        _ => None,
    }
}

impl NativeConverter for InMemoryStore {
    fn timestamp_from_native(&self, value: &Value) -> Result<Timestamp, UnexpectedTypeError> {
        native_as::<MemoryTimestamp>(value)
            .map(|timestamp| Timestamp::from(*timestamp))
            .ok_or_else(|| UnexpectedTypeError::new(SpecialType::Timestamp, value.type_name()))
    }

    fn timestamp_to_native(&self, timestamp: Timestamp) -> Value {
        MemoryTimestamp::from(timestamp).into()
    }

    fn geo_point_from_native(&self, value: &Value) -> Result<GeoPoint, UnexpectedTypeError> {
        native_as::<MemoryGeoPoint>(value)
            .map(|point| GeoPoint::new(point.latitude, point.longitude))
            .ok_or_else(|| UnexpectedTypeError::new(SpecialType::GeoPoint, value.type_name()))
    }

    fn geo_point_to_native(&self, point: GeoPoint) -> Value {
        MemoryGeoPoint::new(point.latitude, point.longitude).into()
    }

    fn reference_from_native(&self, value: &Value) -> Result<Reference, UnexpectedTypeError> {
        native_as::<MemoryReference>(value)
            .and_then(|reference| Reference::from_path(reference.path()).ok())
            .ok_or_else(|| {
                UnexpectedTypeError::new(SpecialType::DocumentReference, value.type_name())
            })
    }

    fn reference_to_native(&self, reference: &Reference) -> Value {
        MemoryReference::from(reference).into()
    }

    fn server_timestamp(&self) -> Value {
        MemoryServerTimestamp.into()
    }

    fn is_server_timestamp(&self, value: &Value) -> bool {
        native_as::<MemoryServerTimestamp>(value).is_some()
    }
}
