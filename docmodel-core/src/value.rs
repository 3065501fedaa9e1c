//! Raw document values exchanged with a backend.
//!
//! [`Value`] is what a [`StoreBackend`](crate::backend::StoreBackend) reads and writes. Besides
//! the JSON-like scalars it has first-class variants for the special types
//! ([`Timestamp`], [`GeoPoint`], [`Reference`] and the server timestamp marker) in their
//! backend-neutral form, and [`Value::Native`] for a backend's own representation of them.
//!
//! The application side of every schema is plain [`Json`], so typed entities convert to and
//! from it with serde.

use std::{any::Any, fmt, sync::Arc};

use indexmap::IndexMap;
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, MapAccess, SeqAccess, Visitor},
    ser::{self, SerializeMap},
};

use crate::{
    error::{ParseError, ParseResult},
    geo_point::GeoPoint,
    reference::Reference,
    timestamp::Timestamp,
};

/// Application-side values: the decoded form of every schema.
pub type Json = serde_json::Value;

/// An insertion-ordered map of field name to value.
pub type Fields = IndexMap<String, Value>;

/// Key used to tag special values in their serialized form.
pub const TAG: &str = "_tag";

/// `2^63`: integral doubles in `-2^63..2^63` convert to `i64` exactly.
const I64_UPPER: f64 = 9_223_372_036_854_775_808.0;
const I64_LOWER: f64 = -I64_UPPER;

/// A raw document value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(Fields),
    Timestamp(Timestamp),
    GeoPoint(GeoPoint),
    Reference(Reference),
    /// Marker asking the backend to stamp the commit time.
    ServerTimestamp,
    /// A backend-owned object, opaque to everything but that backend's converter.
    Native(NativeValue),
}

impl Value {
    /// The runtime type name, as reported in type mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Timestamp(_) => "Timestamp",
            Value::GeoPoint(_) => "GeoPoint",
            Value::Reference(_) => "DocumentReference",
            Value::ServerTimestamp => "ServerTimestamp",
            Value::Native(native) => native.type_name(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            Value::Double(value) if value.fract() == 0.0 && (I64_LOWER..I64_UPPER).contains(value) => {
                Some(*value as i64)
            }
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(value) => Some(*value as f64),
            Value::Double(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Fields> {
        match self {
            Value::Map(fields) => Some(fields),
            _ => None,
        }
    }

    /// Converts wire JSON into a raw value. Integral numbers become [`Value::Integer`].
    pub fn from_json(json: Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(value) => Value::Boolean(value),
            Json::Number(number) => match number.as_i64() {
                Some(value) => Value::Integer(value),
                None => Value::Double(number.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(value) => Value::String(value),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from_json).collect()),
            Json::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from_json(value)))
                    .collect(),
            ),
        }
    }

    /// Converts a raw value into JSON.
    ///
    /// # Errors
    ///
    /// Special, native and byte values have no JSON form and are rejected, as are
    /// non-finite doubles.
    pub fn to_json(&self) -> ParseResult<Json> {
        match self {
            Value::Null => Ok(Json::Null),
            Value::Boolean(value) => Ok(Json::Bool(*value)),
            Value::Integer(value) => Ok(Json::from(*value)),
            Value::Double(value) => serde_json::Number::from_f64(*value)
                .map(Json::Number)
                .ok_or_else(|| ParseError::type_mismatch("finite number", value.to_string())),
            Value::String(value) => Ok(Json::String(value.clone())),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| item.to_json().map_err(|err| err.at(index.to_string())))
                .collect::<ParseResult<Vec<_>>>()
                .map(Json::Array),
            Value::Map(fields) => fields
                .iter()
                .map(|(key, value)| {
                    value
                        .to_json()
                        .map(|json| (key.clone(), json))
                        .map_err(|err| err.at(key.clone()))
                })
                .collect::<ParseResult<serde_json::Map<_, _>>>()
                .map(Json::Object),
            other => Err(ParseError::type_mismatch("JSON value", other.type_name())),
        }
    }
}

/// Converts a map of raw values into a JSON object.
pub fn fields_to_json(fields: &Fields) -> ParseResult<serde_json::Map<String, Json>> {
    match Value::Map(fields.clone()).to_json()? {
        Json::Object(map) => Ok(map),
        _ => Ok(serde_json::Map::new()),
    }
}

/// A backend-owned object carried inside a [`Value`].
///
/// Only the backend that created it knows its concrete type, and it gets it back with
/// [`NativeValue::downcast_ref`].
#[derive(Clone)]
pub struct NativeValue {
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
    eq: fn(&(dyn Any + Send + Sync), &(dyn Any + Send + Sync)) -> bool,
    fmt: fn(&(dyn Any + Send + Sync), &mut fmt::Formatter<'_>) -> fmt::Result,
}

impl NativeValue {
    pub fn new<T>(type_name: &'static str, value: T) -> Self
    where
        T: Any + Send + Sync + PartialEq + fmt::Debug,
    {
        Self {
            type_name,
            inner: Arc::new(value),
            eq: eq_as::<T>,
            fmt: fmt_as::<T>,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.inner).downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        (*self.inner).is::<T>()
    }
}

fn eq_as<T: Any + PartialEq>(left: &(dyn Any + Send + Sync), right: &(dyn Any + Send + Sync)) -> bool {
    match (left.downcast_ref::<T>(), right.downcast_ref::<T>()) {
        (Some(left), Some(right)) => left == right,
        _ => false,
    }
}

fn fmt_as<T: Any + fmt::Debug>(value: &(dyn Any + Send + Sync), f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value.downcast_ref::<T>() {
        Some(value) => fmt::Debug::fmt(value, f),
        None => f.write_str("?"),
    }
}

impl PartialEq for NativeValue {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name && (self.eq)(&*self.inner, &*other.inner)
    }
}

impl fmt::Debug for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Native<{}>(", self.type_name)?;
        (self.fmt)(&*self.inner, f)?;
        f.write_str(")")
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<Fields> for Value {
    fn from(fields: Fields) -> Self {
        Value::Map(fields)
    }
}

impl From<Timestamp> for Value {
    fn from(value: Timestamp) -> Self {
        Value::Timestamp(value)
    }
}

impl From<GeoPoint> for Value {
    fn from(value: GeoPoint) -> Self {
        Value::GeoPoint(value)
    }
}

impl From<Reference> for Value {
    fn from(value: Reference) -> Self {
        Value::Reference(value)
    }
}

impl From<NativeValue> for Value {
    fn from(value: NativeValue) -> Self {
        Value::Native(value)
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        Value::from_json(json)
    }
}

/// Builds a [`Fields`] map from `key => value` pairs.
///
/// ```ignore
/// let data = fields! { "title" => "Hello", "views" => 3 };
/// ```
#[macro_export]
macro_rules! fields {
    () => {
        $crate::value::Fields::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut fields = $crate::value::Fields::new();
        $(fields.insert(::std::string::String::from($key), $crate::value::Value::from($value));)+
        fields
    }};
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Boolean(value) => serializer.serialize_bool(*value),
            Value::Integer(value) => serializer.serialize_i64(*value),
            Value::Double(value) => serializer.serialize_f64(*value),
            Value::String(value) => serializer.serialize_str(value),
            Value::Bytes(value) => serializer.serialize_bytes(value),
            Value::Array(items) => items.serialize(serializer),
            Value::Map(fields) => fields.serialize(serializer),
            Value::Timestamp(value) => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry(TAG, "Timestamp")?;
                map.serialize_entry("seconds", &value.seconds)?;
                map.serialize_entry("nanoseconds", &value.nanoseconds)?;
                map.end()
            }
            Value::GeoPoint(value) => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry(TAG, "GeoPoint")?;
                map.serialize_entry("latitude", &value.latitude)?;
                map.serialize_entry("longitude", &value.longitude)?;
                map.end()
            }
            Value::Reference(value) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry(TAG, "Reference")?;
                map.serialize_entry("path", value.path())?;
                map.end()
            }
            Value::ServerTimestamp => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(TAG, "ServerTimestamp")?;
                map.end()
            }
            Value::Native(native) => Err(ser::Error::custom(format!(
                "{} is backend-native and cannot be serialized",
                native.type_name()
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a document value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> Result<Value, E> {
        Ok(Value::Boolean(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Value, E> {
        Ok(Value::Integer(value))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Value, E> {
        Ok(match i64::try_from(value) {
            Ok(value) => Value::Integer(value),
            Err(_) => Value::Double(value as f64),
        })
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Value, E> {
        Ok(Value::Double(value))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Value, E> {
        Ok(Value::String(value.to_string()))
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<Value, E> {
        Ok(Value::String(value))
    }

    fn visit_bytes<E: de::Error>(self, value: &[u8]) -> Result<Value, E> {
        Ok(Value::Bytes(value.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, value: Vec<u8>) -> Result<Value, E> {
        Ok(Value::Bytes(value))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut fields = Fields::new();
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            fields.insert(key, value);
        }
        untag(fields).map_err(de::Error::custom)
    }
}

/// Turns a `_tag`ged map back into the special value it describes. Maps with no tag, or
/// with a tag that names no special type, stay maps.
fn untag(fields: Fields) -> ParseResult<Value> {
    let tag = match fields.get(TAG).and_then(Value::as_str) {
        Some(tag) => tag,
        None => return Ok(Value::Map(fields)),
    };

    match tag {
        "Timestamp" => {
            let seconds = fields
                .get("seconds")
                .and_then(Value::as_i64)
                .ok_or_else(|| ParseError::missing().at("seconds"))?;
            let nanoseconds = fields
                .get("nanoseconds")
                .and_then(Value::as_i64)
                .and_then(|nanos| u32::try_from(nanos).ok())
                .ok_or_else(|| ParseError::missing().at("nanoseconds"))?;
            Ok(Value::Timestamp(Timestamp::new(seconds, nanoseconds)?))
        }
        "GeoPoint" => {
            let latitude = fields
                .get("latitude")
                .and_then(Value::as_f64)
                .ok_or_else(|| ParseError::missing().at("latitude"))?;
            let longitude = fields
                .get("longitude")
                .and_then(Value::as_f64)
                .ok_or_else(|| ParseError::missing().at("longitude"))?;
            Ok(Value::GeoPoint(GeoPoint::new(latitude, longitude)))
        }
        "Reference" => {
            let path = fields
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| ParseError::missing().at("path"))?;
            Ok(Value::Reference(Reference::from_path(path)?))
        }
        "ServerTimestamp" => Ok(Value::ServerTimestamp),
        _ => Ok(Value::Map(fields)),
    }
}
