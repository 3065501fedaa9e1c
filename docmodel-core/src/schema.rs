//! Bidirectional schemas between raw [`Value`]s and application [`Json`].
//!
//! A [`Schema`] decodes a raw value into its application form and encodes it back. Both
//! directions work on `Option`s so that a missing key can be told apart from an explicit
//! `null`: `None` on input means the key was absent, `None` on output means the key should
//! be left out.
//!
//! Schemas are shared as [`SchemaRef`]s and composed into field descriptors
//! ([`Field`](crate::field::Field)) and entity definitions
//! ([`EntityDefinition`](crate::entity::EntityDefinition)).

use std::{fmt, sync::Arc};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use indexmap::IndexMap;

use crate::{
    converter::NativeConverter,
    error::{ParseError, ParseResult},
    value::{Fields, Json, Value},
};

pub trait Schema: fmt::Debug + Send + Sync {
    /// Decodes a raw value. `input` is `None` when the key is missing.
    fn decode(&self, input: Option<&Value>, converter: &dyn NativeConverter) -> ParseResult<Option<Json>>;

    /// Encodes an application value. `value` is `None` when the key is missing.
    fn encode(&self, value: Option<&Json>, converter: &dyn NativeConverter) -> ParseResult<Option<Value>>;

    /// Whether encoding a missing value produces something, as the server timestamp does.
    fn generates_when_absent(&self) -> bool {
        false
    }
}

pub type SchemaRef = Arc<dyn Schema>;

fn present<T>(input: Option<&T>) -> ParseResult<&T> {
    input.ok_or_else(ParseError::missing)
}

/// The type name of an application value, as reported in type mismatch errors.
pub fn json_type_name(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Formats a date-time the way every schema hands date-times to the application.
pub fn format_date_time(date_time: &DateTime<Utc>) -> String {
    date_time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Reads an application date-time: an RFC 3339 string or epoch milliseconds.
pub fn parse_date_time(json: &Json) -> ParseResult<DateTime<Utc>> {
    match json {
        Json::String(text) => parse_date_time_str(text),
        Json::Number(number) => number
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .ok_or_else(|| ParseError::validation(format!("Invalid epoch milliseconds: {number}"))),
        other => Err(ParseError::type_mismatch("date-time", json_type_name(other))),
    }
}

fn parse_date_time_str(text: &str) -> ParseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|date_time| date_time.with_timezone(&Utc))
        .map_err(|err| ParseError::validation(format!("Invalid date-time \"{text}\": {err}")))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StringSchema;

impl Schema for StringSchema {
    fn decode(&self, input: Option<&Value>, _: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        match present(input)? {
            Value::String(value) => Ok(Some(Json::String(value.clone()))),
            other => Err(ParseError::type_mismatch("string", other.type_name())),
        }
    }

    fn encode(&self, value: Option<&Json>, _: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        match present(value)? {
            Json::String(value) => Ok(Some(Value::String(value.clone()))),
            other => Err(ParseError::type_mismatch("string", json_type_name(other))),
        }
    }
}

/// A document identifier: a non-empty string without `/`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdSchema;

impl IdSchema {
    pub fn validate(id: &str) -> ParseResult<()> {
        if id.is_empty() {
            return Err(ParseError::validation("Id must not be empty"));
        }
        if id.contains('/') {
            return Err(ParseError::validation(format!("Id must not contain \"/\": \"{id}\"")));
        }
        Ok(())
    }
}

impl Schema for IdSchema {
    fn decode(&self, input: Option<&Value>, converter: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        let decoded = StringSchema.decode(input, converter)?;
        if let Some(Json::String(id)) = &decoded {
            IdSchema::validate(id)?;
        }
        Ok(decoded)
    }

    fn encode(&self, value: Option<&Json>, converter: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        if let Some(Json::String(id)) = value {
            IdSchema::validate(id)?;
        }
        StringSchema.encode(value, converter)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerSchema;

impl Schema for IntegerSchema {
    fn decode(&self, input: Option<&Value>, _: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        let input = present(input)?;
        input
            .as_i64()
            .map(|value| Some(Json::from(value)))
            .ok_or_else(|| ParseError::type_mismatch("integer", input.type_name()))
    }

    fn encode(&self, value: Option<&Json>, _: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        let value = present(value)?;
        value
            .as_i64()
            .map(|value| Some(Value::Integer(value)))
            .ok_or_else(|| ParseError::type_mismatch("integer", json_type_name(value)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NumberSchema;

impl Schema for NumberSchema {
    fn decode(&self, input: Option<&Value>, _: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        let input = present(input)?;
        input
            .as_f64()
            .and_then(serde_json::Number::from_f64)
            .map(|number| Some(Json::Number(number)))
            .ok_or_else(|| ParseError::type_mismatch("number", input.type_name()))
    }

    fn encode(&self, value: Option<&Json>, _: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        let value = present(value)?;
        value
            .as_f64()
            .map(|number| Some(Value::Double(number)))
            .ok_or_else(|| ParseError::type_mismatch("number", json_type_name(value)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanSchema;

impl Schema for BooleanSchema {
    fn decode(&self, input: Option<&Value>, _: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        match present(input)? {
            Value::Boolean(value) => Ok(Some(Json::Bool(*value))),
            other => Err(ParseError::type_mismatch("boolean", other.type_name())),
        }
    }

    fn encode(&self, value: Option<&Json>, _: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        match present(value)? {
            Json::Bool(value) => Ok(Some(Value::Boolean(*value))),
            other => Err(ParseError::type_mismatch("boolean", json_type_name(other))),
        }
    }
}

/// Any JSON-representable value, passed through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnySchema;

impl Schema for AnySchema {
    fn decode(&self, input: Option<&Value>, _: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        present(input)?.to_json().map(Some)
    }

    fn encode(&self, value: Option<&Json>, _: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        Ok(Some(Value::from_json(present(value)?.clone())))
    }
}

/// One of a fixed set of strings.
#[derive(Debug, Clone)]
pub struct LiteralSchema {
    values: Vec<String>,
}

impl LiteralSchema {
    fn check(&self, value: &str) -> ParseResult<()> {
        if self.values.iter().any(|allowed| allowed == value) {
            Ok(())
        } else {
            Err(ParseError::type_mismatch(
                self.values
                    .iter()
                    .map(|allowed| format!("\"{allowed}\""))
                    .collect::<Vec<_>>()
                    .join(" | "),
                format!("\"{value}\""),
            ))
        }
    }
}

impl Schema for LiteralSchema {
    fn decode(&self, input: Option<&Value>, converter: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        let decoded = StringSchema.decode(input, converter)?;
        if let Some(Json::String(value)) = &decoded {
            self.check(value)?;
        }
        Ok(decoded)
    }

    fn encode(&self, value: Option<&Json>, converter: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        if let Some(Json::String(text)) = value {
            self.check(text)?;
        }
        StringSchema.encode(value, converter)
    }
}

#[derive(Debug, Clone)]
pub struct ArraySchema {
    item: SchemaRef,
}

impl Schema for ArraySchema {
    fn decode(&self, input: Option<&Value>, converter: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        match present(input)? {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    self.item
                        .decode(Some(item), converter)
                        .map(|decoded| decoded.unwrap_or(Json::Null))
                        .map_err(|err| err.at(index.to_string()))
                })
                .collect::<ParseResult<Vec<_>>>()
                .map(|items| Some(Json::Array(items))),
            other => Err(ParseError::type_mismatch("array", other.type_name())),
        }
    }

    fn encode(&self, value: Option<&Json>, converter: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        match present(value)? {
            Json::Array(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    self.item
                        .encode(Some(item), converter)
                        .map(|encoded| encoded.unwrap_or(Value::Null))
                        .map_err(|err| err.at(index.to_string()))
                })
                .collect::<ParseResult<Vec<_>>>()
                .map(|items| Some(Value::Array(items))),
            other => Err(ParseError::type_mismatch("array", json_type_name(other))),
        }
    }
}

/// An object with a fixed set of named fields. Keys not listed are dropped in both
/// directions.
#[derive(Debug, Clone, Default)]
pub struct StructSchema {
    fields: IndexMap<String, SchemaRef>,
}

impl StructSchema {
    pub fn new(fields: IndexMap<String, SchemaRef>) -> Self {
        Self { fields }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn schema(&self, name: &str) -> Option<&SchemaRef> {
        self.fields.get(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn decode_fields(
        &self,
        input: &Fields,
        converter: &dyn NativeConverter,
    ) -> ParseResult<serde_json::Map<String, Json>> {
        let mut output = serde_json::Map::new();
        for (name, schema) in &self.fields {
            let decoded = schema
                .decode(input.get(name), converter)
                .map_err(|err| err.at(name.clone()))?;
            if let Some(decoded) = decoded {
                output.insert(name.clone(), decoded);
            }
        }
        Ok(output)
    }

    pub fn encode_fields(&self, value: &Json, converter: &dyn NativeConverter) -> ParseResult<Fields> {
        let object = value
            .as_object()
            .ok_or_else(|| ParseError::type_mismatch("object", json_type_name(value)))?;

        let mut output = Fields::new();
        for (name, schema) in &self.fields {
            let encoded = schema
                .encode(object.get(name), converter)
                .map_err(|err| err.at(name.clone()))?;
            if let Some(encoded) = encoded {
                output.insert(name.clone(), encoded);
            }
        }
        Ok(output)
    }
}

impl Schema for StructSchema {
    fn decode(&self, input: Option<&Value>, converter: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        match present(input)? {
            Value::Map(fields) => self
                .decode_fields(fields, converter)
                .map(|object| Some(Json::Object(object))),
            other => Err(ParseError::type_mismatch("object", other.type_name())),
        }
    }

    fn encode(&self, value: Option<&Json>, converter: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        self.encode_fields(present(value)?, converter)
            .map(|fields| Some(Value::Map(fields)))
    }
}

/// A date-time carried as an RFC 3339 string, as it travels over the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeString;

impl Schema for DateTimeString {
    fn decode(&self, input: Option<&Value>, _: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        match present(input)? {
            Value::String(text) => {
                parse_date_time_str(text).map(|date_time| Some(Json::String(format_date_time(&date_time))))
            }
            other => Err(ParseError::type_mismatch("date-time string", other.type_name())),
        }
    }

    fn encode(&self, value: Option<&Json>, _: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        parse_date_time(present(value)?)
            .map(|date_time| Some(Value::String(format_date_time(&date_time))))
    }
}

/// How an optional schema treats a missing key on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingKey {
    /// Decode a missing key as absent.
    Absent,
    /// A missing key is an error, only an explicit `null` means absent.
    Reject,
}

/// How an optional schema writes an absent value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsentEncoding {
    /// Write an explicit `null`. Used by the storage variants.
    Null,
    /// Leave the key out. Used by the wire variants.
    Omit,
}

/// Wraps a schema so that `null` (and, depending on [`MissingKey`], a missing key) means
/// "absent". Absent decodes to JSON `null`.
#[derive(Debug, Clone)]
pub struct OptionalSchema {
    inner: SchemaRef,
    missing: MissingKey,
    absent: AbsentEncoding,
}

impl OptionalSchema {
    pub fn new(inner: SchemaRef, missing: MissingKey, absent: AbsentEncoding) -> Self {
        Self {
            inner,
            missing,
            absent,
        }
    }
}

impl Schema for OptionalSchema {
    fn decode(&self, input: Option<&Value>, converter: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        match input {
            None if self.missing == MissingKey::Reject => Err(ParseError::missing()),
            None | Some(Value::Null) => Ok(Some(Json::Null)),
            Some(value) => self
                .inner
                .decode(Some(value), converter)
                .map(|decoded| Some(decoded.unwrap_or(Json::Null))),
        }
    }

    fn encode(&self, value: Option<&Json>, converter: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        match value {
            None | Some(Json::Null) => Ok(match self.absent {
                AbsentEncoding::Null => Some(Value::Null),
                AbsentEncoding::Omit => None,
            }),
            Some(value) => self.inner.encode(Some(value), converter),
        }
    }
}

/// Makes a schema individually optional for partial updates.
///
/// A missing key stays missing in both directions, except that a schema which
/// [generates a value when absent](Schema::generates_when_absent) still gets to encode.
#[derive(Debug, Clone)]
pub struct PartialSchema {
    inner: SchemaRef,
}

impl PartialSchema {
    pub fn new(inner: SchemaRef) -> Self {
        Self { inner }
    }
}

impl Schema for PartialSchema {
    fn decode(&self, input: Option<&Value>, converter: &dyn NativeConverter) -> ParseResult<Option<Json>> {
        match input {
            None => Ok(None),
            Some(value) => self.inner.decode(Some(value), converter),
        }
    }

    fn encode(&self, value: Option<&Json>, converter: &dyn NativeConverter) -> ParseResult<Option<Value>> {
        match value {
            None if !self.inner.generates_when_absent() => Ok(None),
            value => self.inner.encode(value, converter),
        }
    }

    fn generates_when_absent(&self) -> bool {
        self.inner.generates_when_absent()
    }
}

pub fn string() -> SchemaRef {
    Arc::new(StringSchema)
}

pub fn id() -> SchemaRef {
    Arc::new(IdSchema)
}

pub fn integer() -> SchemaRef {
    Arc::new(IntegerSchema)
}

pub fn number() -> SchemaRef {
    Arc::new(NumberSchema)
}

pub fn boolean() -> SchemaRef {
    Arc::new(BooleanSchema)
}

pub fn any() -> SchemaRef {
    Arc::new(AnySchema)
}

pub fn literal<S: Into<String>>(values: impl IntoIterator<Item = S>) -> SchemaRef {
    Arc::new(LiteralSchema {
        values: values.into_iter().map(Into::into).collect(),
    })
}

pub fn array(item: SchemaRef) -> SchemaRef {
    Arc::new(ArraySchema { item })
}

pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, SchemaRef)>) -> SchemaRef {
    Arc::new(StructSchema::new(
        fields
            .into_iter()
            .map(|(name, schema)| (name.into(), schema))
            .collect(),
    ))
}

pub fn date_time_string() -> SchemaRef {
    Arc::new(DateTimeString)
}

pub fn partial(inner: SchemaRef) -> SchemaRef {
    Arc::new(PartialSchema::new(inner))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{converter::Neutral, error::ParseErrorKind, fields};

    #[test]
    fn struct_strips_unknown_keys_and_locates_errors() {
        let schema = StructSchema::new(IndexMap::from([
            ("title".to_string(), string()),
            ("views".to_string(), integer()),
        ]));

        let decoded = schema
            .decode_fields(&fields! { "title" => "Hi", "views" => 3, "extra" => true }, &Neutral)
            .unwrap();
        assert_eq!(Json::Object(decoded), json!({ "title": "Hi", "views": 3 }));

        let err = schema
            .decode_fields(&fields! { "title" => "Hi", "views" => "three" }, &Neutral)
            .unwrap_err();
        assert_eq!(err.path, vec!["views".to_string()]);

        let err = schema.encode_fields(&json!({ "views": 1 }), &Neutral).unwrap_err();
        assert_eq!(err.path, vec!["title".to_string()]);
        assert_eq!(err.kind, ParseErrorKind::Missing);
    }

    #[test]
    fn optional_storage_writes_null_and_json_omits() {
        let storage = OptionalSchema::new(string(), MissingKey::Absent, AbsentEncoding::Null);
        let wire = OptionalSchema::new(string(), MissingKey::Absent, AbsentEncoding::Omit);

        assert_eq!(storage.decode(None, &Neutral).unwrap(), Some(Json::Null));
        assert_eq!(storage.decode(Some(&Value::Null), &Neutral).unwrap(), Some(Json::Null));
        assert_eq!(storage.encode(Some(&Json::Null), &Neutral).unwrap(), Some(Value::Null));
        assert_eq!(wire.encode(Some(&Json::Null), &Neutral).unwrap(), None);
        assert_eq!(
            wire.encode(Some(&json!("x")), &Neutral).unwrap(),
            Some(Value::String("x".into()))
        );
    }

    #[test]
    fn optional_null_rejects_missing_keys_only() {
        let schema = OptionalSchema::new(string(), MissingKey::Reject, AbsentEncoding::Null);
        assert!(schema.decode(None, &Neutral).is_err());
        assert_eq!(schema.decode(Some(&Value::Null), &Neutral).unwrap(), Some(Json::Null));
    }

    #[test]
    fn partial_leaves_missing_keys_out() {
        let schema = PartialSchema::new(string());
        assert_eq!(schema.decode(None, &Neutral).unwrap(), None);
        assert_eq!(schema.encode(None, &Neutral).unwrap(), None);
        assert!(schema.encode(Some(&json!(1)), &Neutral).is_err());
    }

    #[test]
    fn date_time_strings_normalize_to_utc() {
        let decoded = DateTimeString
            .decode(Some(&Value::String("2024-01-15T12:50:00.123+02:00".into())), &Neutral)
            .unwrap();
        assert_eq!(decoded, Some(json!("2024-01-15T10:50:00.123Z")));

        let encoded = DateTimeString.encode(Some(&json!(1_705_315_800_000_i64)), &Neutral).unwrap();
        assert_eq!(encoded, Some(Value::String("2024-01-15T10:50:00Z".into())));

        assert!(DateTimeString.decode(Some(&Value::String("yesterday".into())), &Neutral).is_err());
    }

    #[test]
    fn literals_and_ids_are_refined_strings() {
        let status = literal(["draft", "published"]);
        assert!(status.decode(Some(&Value::from("draft")), &Neutral).is_ok());
        assert!(status.encode(Some(&json!("archived")), &Neutral).is_err());

        assert!(id().decode(Some(&Value::from("p1")), &Neutral).is_ok());
        assert!(id().decode(Some(&Value::from("")), &Neutral).is_err());
        assert!(id().encode(Some(&json!("a/b")), &Neutral).is_err());
    }

    #[test]
    fn arrays_locate_item_errors() {
        let tags = array(string());
        let err = tags
            .decode(Some(&Value::from(vec![Value::from("a"), Value::from(2)])), &Neutral)
            .unwrap_err();
        assert_eq!(err.path, vec!["1".to_string()]);
    }
}
