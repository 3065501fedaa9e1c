//! Codecs between a backend's native special types and their application form.
//!
//! Each codec is a [`Schema`] whose storage side is the native shape a backend hands back
//! and whose application side is plain JSON. The conversion itself is delegated to the
//! [`NativeConverter`] passed in, so a codec never knows which backend it serves.
//!
//! | codec | native | application |
//! |---|---|---|
//! | [`TimestampCodec`] | timestamp | RFC 3339 date-time |
//! | [`ServerTimestampCodec`] | server timestamp marker | date-time, encode only |
//! | [`GeoPointCodec`] | geo point | `{latitude, longitude}` |
//! | [`ReferenceIdCodec`] | reference | document id |
//! | [`ReferencePathCodec`] | reference | document path |

use std::sync::Arc;

use crate::{
    converter::NativeConverter,
    error::{ParseError, ParseResult},
    geo_point::GeoPoint,
    reference::Reference,
    schema::{IdSchema, Schema, SchemaRef, format_date_time, json_type_name, parse_date_time},
    timestamp::Timestamp,
    value::{Json, Value},
};

fn present<T>(input: Option<&T>) -> ParseResult<&T> {
    input.ok_or_else(ParseError::missing)
}

fn expect_str(value: &Json) -> ParseResult<&str> {
    value
        .as_str()
        .ok_or_else(|| ParseError::type_mismatch("string", json_type_name(value)))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampCodec;

impl Schema for TimestampCodec {
    fn decode(&self, input: Option<&Value>, converter: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        let timestamp = converter.timestamp_from_native(present(input)?)?;
        Ok(Some(Json::String(format_date_time(&timestamp.to_date_time()?))))
    }

    fn encode(&self, value: Option<&Json>, converter: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        let date_time = parse_date_time(present(value)?)?;
        Ok(Some(converter.timestamp_to_native(Timestamp::from_date_time(date_time))))
    }
}

/// Writes the server timestamp marker when no value is given.
///
/// A given date-time is written as a regular timestamp. Reading the marker back is
/// forbidden: it only exists until the backend commits the write.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerTimestampCodec;

impl Schema for ServerTimestampCodec {
    fn decode(&self, input: Option<&Value>, converter: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        let input = present(input)?;
        if converter.is_server_timestamp(input) {
            return Err(ParseError::forbidden("ServerTimestamp cannot be decoded to a date-time"));
        }
        TimestampCodec.decode(Some(input), converter)
    }

    fn encode(&self, value: Option<&Json>, converter: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        match value {
            None | Some(Json::Null) => Ok(Some(converter.server_timestamp())),
            Some(value) => TimestampCodec.encode(Some(value), converter),
        }
    }

    fn generates_when_absent(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GeoPointCodec;

impl Schema for GeoPointCodec {
    fn decode(&self, input: Option<&Value>, converter: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        let point = converter.geo_point_from_native(present(input)?)?;
        Ok(Some(geo_point_to_json(point)))
    }

    fn encode(&self, value: Option<&Json>, converter: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        let point = geo_point_from_json(present(value)?)?;
        Ok(Some(converter.geo_point_to_native(point)))
    }
}

fn geo_point_to_json(point: GeoPoint) -> Json {
    serde_json::json!({ "latitude": point.latitude, "longitude": point.longitude })
}

fn geo_point_from_json(value: &Json) -> ParseResult<GeoPoint> {
    let object = value
        .as_object()
        .ok_or_else(|| ParseError::type_mismatch("object", json_type_name(value)))?;
    let coordinate = |key: &str| {
        let coordinate = object.get(key).ok_or_else(|| ParseError::missing().at(key))?;
        coordinate
            .as_f64()
            .ok_or_else(|| ParseError::type_mismatch("number", json_type_name(coordinate)).at(key))
    };
    Ok(GeoPoint::new(coordinate("latitude")?, coordinate("longitude")?))
}

/// The wire form of a geo point: an object with both `latitude` and `longitude`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoPointSchema;

impl Schema for GeoPointSchema {
    fn decode(&self, input: Option<&Value>, _: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        let input = present(input)?;
        let json = input.to_json()?;
        Ok(Some(geo_point_to_json(geo_point_from_json(&json)?)))
    }

    fn encode(&self, value: Option<&Json>, _: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        let point = geo_point_from_json(present(value)?)?;
        Ok(Some(Value::from_json(geo_point_to_json(point))))
    }
}

/// A string that must start with `{prefix}/`.
#[derive(Debug, Clone)]
pub struct PathPrefix {
    prefix: String,
}

impl PathPrefix {
    pub fn new(collection_path: impl Into<String>) -> Self {
        Self {
            prefix: format!("{}/", collection_path.into()),
        }
    }

    fn check(&self, path: &str) -> ParseResult<()> {
        if path.starts_with(&self.prefix) {
            Ok(())
        } else {
            Err(ParseError::validation(format!(
                "Path must start with \"{}\"",
                self.prefix
            )))
        }
    }
}

impl Schema for PathPrefix {
    fn decode(&self, input: Option<&Value>, _: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        match present(input)? {
            Value::String(path) => {
                self.check(path)?;
                Ok(Some(Json::String(path.clone())))
            }
            other => Err(ParseError::type_mismatch("string", other.type_name())),
        }
    }

    fn encode(&self, value: Option<&Json>, _: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        let path = expect_str(present(value)?)?;
        self.check(path)?;
        Ok(Some(Value::String(path.to_string())))
    }
}

/// A document reference exposed as the referenced document's id.
///
/// The untyped form can only decode: an id alone does not say which collection it lives in.
#[derive(Debug, Clone, Default)]
pub struct ReferenceIdCodec {
    collection_path: Option<String>,
}

impl ReferenceIdCodec {
    pub fn any() -> Self {
        Self::default()
    }

    /// A reference into the collection at `collection_path`.
    pub fn new(collection_path: impl Into<String>) -> Self {
        Self {
            collection_path: Some(collection_path.into()),
        }
    }
}

impl Schema for ReferenceIdCodec {
    fn decode(&self, input: Option<&Value>, converter: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        let reference = converter.reference_from_native(present(input)?)?;
        if let Some(collection_path) = &self.collection_path
            && reference.collection_path() != collection_path
        {
            return Err(ParseError::validation(format!(
                "Reference \"{}\" is not in collection \"{collection_path}\"",
                reference.path()
            )));
        }
        Ok(Some(Json::String(reference.id().to_string())))
    }

    fn encode(&self, value: Option<&Json>, converter: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        let id = expect_str(present(value)?)?;
        let Some(collection_path) = &self.collection_path else {
            return Err(ParseError::forbidden(
                "Id string cannot be encoded to DocumentReference",
            ));
        };
        IdSchema::validate(id)?;
        let reference = Reference::new(collection_path, id)?;
        Ok(Some(converter.reference_to_native(&reference)))
    }
}

/// A document reference exposed as the referenced document's full path.
#[derive(Debug, Clone, Default)]
pub struct ReferencePathCodec {
    prefix: Option<PathPrefix>,
}

impl ReferencePathCodec {
    pub fn any() -> Self {
        Self::default()
    }

    /// A reference whose path must start with `{collection_path}/`.
    pub fn new(collection_path: impl Into<String>) -> Self {
        Self {
            prefix: Some(PathPrefix::new(collection_path)),
        }
    }
}

impl Schema for ReferencePathCodec {
    fn decode(&self, input: Option<&Value>, converter: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        let reference = converter.reference_from_native(present(input)?)?;
        if let Some(prefix) = &self.prefix {
            prefix.check(reference.path())?;
        }
        Ok(Some(Json::String(reference.path().to_string())))
    }

    fn encode(&self, value: Option<&Json>, converter: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        let path = expect_str(present(value)?)?;
        if let Some(prefix) = &self.prefix {
            prefix.check(path)?;
        }
        let reference = Reference::from_path(path)?;
        Ok(Some(converter.reference_to_native(&reference)))
    }
}

pub fn timestamp() -> SchemaRef {
    Arc::new(TimestampCodec)
}

pub fn server_timestamp() -> SchemaRef {
    Arc::new(ServerTimestampCodec)
}

pub fn geo_point() -> SchemaRef {
    Arc::new(GeoPointCodec)
}

pub fn geo_point_json() -> SchemaRef {
    Arc::new(GeoPointSchema)
}

pub fn path_prefix(collection_path: impl Into<String>) -> SchemaRef {
    Arc::new(PathPrefix::new(collection_path))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        converter::Neutral,
        error::{ParseErrorKind, SpecialType},
    };

    #[test]
    fn timestamps_decode_to_date_time_strings() {
        let input = Value::Timestamp(Timestamp::from_millis(1_705_315_800_123));
        let decoded = TimestampCodec.decode(Some(&input), &Neutral).unwrap();
        assert_eq!(decoded, Some(json!("2024-01-15T10:50:00.123Z")));

        let encoded = TimestampCodec.encode(decoded.as_ref(), &Neutral).unwrap();
        assert_eq!(encoded, Some(input));
    }

    #[test]
    fn foreign_types_are_unexpected() {
        let err = TimestampCodec
            .decode(Some(&Value::String("2024-01-15".into())), &Neutral)
            .unwrap_err();
        match err.kind {
            ParseErrorKind::UnexpectedType(inner) => {
                assert_eq!(inner.expected, SpecialType::Timestamp);
                assert_eq!(inner.actual, "string");
            }
            other => panic!("unexpected kind: {other:?}"),
        }

        let err = GeoPointCodec.decode(Some(&Value::Integer(1)), &Neutral).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnexpectedType(_)));
    }

    #[test]
    fn server_timestamp_generates_the_marker() {
        assert!(ServerTimestampCodec.generates_when_absent());
        assert_eq!(
            ServerTimestampCodec.encode(None, &Neutral).unwrap(),
            Some(Value::ServerTimestamp)
        );

        let encoded = ServerTimestampCodec
            .encode(Some(&json!("2024-01-15T10:50:00Z")), &Neutral)
            .unwrap();
        assert_eq!(
            encoded,
            Some(Value::Timestamp(Timestamp::from_millis(1_705_315_800_000)))
        );

        let err = ServerTimestampCodec
            .decode(Some(&Value::ServerTimestamp), &Neutral)
            .unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::Forbidden(_)));
    }

    #[test]
    fn geo_points_require_both_coordinates() {
        let point = Value::GeoPoint(GeoPoint::new(52.5, 13.4));
        let decoded = GeoPointCodec.decode(Some(&point), &Neutral).unwrap();
        assert_eq!(decoded, Some(json!({ "latitude": 52.5, "longitude": 13.4 })));

        let err = GeoPointSchema
            .encode(Some(&json!({ "latitude": 52.5 })), &Neutral)
            .unwrap_err();
        assert_eq!(err.path, vec!["longitude".to_string()]);
        assert_eq!(err.kind, ParseErrorKind::Missing);
    }

    #[test]
    fn untyped_id_references_cannot_encode() {
        let reference = Value::Reference(Reference::from_path("authors/a1").unwrap());
        let decoded = ReferenceIdCodec::any().decode(Some(&reference), &Neutral).unwrap();
        assert_eq!(decoded, Some(json!("a1")));

        let err = ReferenceIdCodec::any().encode(Some(&json!("a1")), &Neutral).unwrap_err();
        assert!(err.to_string().contains("Id string cannot be encoded to DocumentReference"));
    }

    #[test]
    fn typed_references_build_and_check_paths() {
        let codec = ReferenceIdCodec::new("authors");
        assert_eq!(
            codec.encode(Some(&json!("a1")), &Neutral).unwrap(),
            Some(Value::Reference(Reference::from_path("authors/a1").unwrap()))
        );

        let other = Value::Reference(Reference::from_path("users/u1").unwrap());
        assert!(codec.decode(Some(&other), &Neutral).is_err());

        let paths = ReferencePathCodec::new("authors");
        let err = paths.encode(Some(&json!("users/u1")), &Neutral).unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::Validation("Path must start with \"authors/\"".into())
        );
        assert!(paths.encode(Some(&json!("authors/a1")), &Neutral).is_ok());
    }
}
