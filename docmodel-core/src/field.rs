//! Field descriptors with one schema per usage variant.
//!
//! A document field is read, created, patched and sent over the wire in different shapes. A
//! [`Field`] carries one optional schema for each [`Variant`]. A variant without a schema
//! means the field does not take part in that usage at all.
//!
//! Schemas left [`Unset`](Slot::Unset) are filled from their neighbours by
//! [`resolve_variants`]:
//!
//! ```text
//! get ──► add ──► update
//!  │
//!  └────► json ──► json_add
//!           │
//!           └────► json_update
//! ```
//!
//! # Examples
//!
//! ```ignore
//! use docmodel::{field::{self, Field}, schema};
//!
//! let title: Field = schema::string().into();
//! let secret = field::sensitive(schema::string());
//! let created_at = field::date_time_insert();
//! ```

use std::sync::Arc;

use crate::{
    codec::{
        GeoPointCodec, GeoPointSchema, PathPrefix, ReferenceIdCodec, ReferencePathCodec,
        ServerTimestampCodec, TimestampCodec,
    },
    schema::{self, AbsentEncoding, MissingKey, OptionalSchema, SchemaRef},
};

/// The usages a field schema can be selected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// Reading a stored document.
    Get,
    /// Creating a document.
    Add,
    /// Patching a document.
    Update,
    /// The wire form of a read document.
    Json,
    /// The wire form of a create request.
    JsonAdd,
    /// The wire form of a patch request.
    JsonUpdate,
}

impl Variant {
    pub const ALL: [Variant; 6] = [
        Variant::Get,
        Variant::Add,
        Variant::Update,
        Variant::Json,
        Variant::JsonAdd,
        Variant::JsonUpdate,
    ];

    pub const STORAGE: [Variant; 3] = [Variant::Get, Variant::Add, Variant::Update];

    pub const WIRE: [Variant; 3] = [Variant::Json, Variant::JsonAdd, Variant::JsonUpdate];

    pub fn is_wire(self) -> bool {
        matches!(self, Variant::Json | Variant::JsonAdd | Variant::JsonUpdate)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Get => "get",
            Variant::Add => "add",
            Variant::Update => "update",
            Variant::Json => "json",
            Variant::JsonAdd => "jsonAdd",
            Variant::JsonUpdate => "jsonUpdate",
        }
    }
}

/// An explicitly configured variant slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Slot<S> {
    /// Not configured, filled in from the default chain.
    #[default]
    Unset,
    /// The field takes no part in this variant.
    Absent,
    Set(S),
}

impl<S> Slot<S> {
    fn or_inherit(self, fallback: &Option<S>) -> Option<S>
    where
        S: Clone,
    {
        match self {
            Slot::Unset => fallback.clone(),
            Slot::Absent => None,
            Slot::Set(value) => Some(value),
        }
    }
}

/// One value per [`Variant`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantMap<T> {
    pub get: T,
    pub add: T,
    pub update: T,
    pub json: T,
    pub json_add: T,
    pub json_update: T,
}

impl<T> VariantMap<T> {
    pub fn variant(&self, variant: Variant) -> &T {
        match variant {
            Variant::Get => &self.get,
            Variant::Add => &self.add,
            Variant::Update => &self.update,
            Variant::Json => &self.json,
            Variant::JsonAdd => &self.json_add,
            Variant::JsonUpdate => &self.json_update,
        }
    }

    pub fn variant_mut(&mut self, variant: Variant) -> &mut T {
        match variant {
            Variant::Get => &mut self.get,
            Variant::Add => &mut self.add,
            Variant::Update => &mut self.update,
            Variant::Json => &mut self.json,
            Variant::JsonAdd => &mut self.json_add,
            Variant::JsonUpdate => &mut self.json_update,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(Variant, T) -> U) -> VariantMap<U> {
        VariantMap {
            get: f(Variant::Get, self.get),
            add: f(Variant::Add, self.add),
            update: f(Variant::Update, self.update),
            json: f(Variant::Json, self.json),
            json_add: f(Variant::JsonAdd, self.json_add),
            json_update: f(Variant::JsonUpdate, self.json_update),
        }
    }
}

/// Fills unset slots from the default chain. Explicitly absent slots stay absent and are
/// inherited as absent.
pub fn resolve_variants<S: Clone>(slots: VariantMap<Slot<S>>) -> VariantMap<Option<S>> {
    let get = slots.get.or_inherit(&None);
    let add = slots.add.or_inherit(&get);
    let update = slots.update.or_inherit(&add);
    let json = slots.json.or_inherit(&get);
    let json_add = slots.json_add.or_inherit(&json);
    let json_update = slots.json_update.or_inherit(&json);

    VariantMap {
        get,
        add,
        update,
        json,
        json_add,
        json_update,
    }
}

/// A field descriptor: the resolved schema of each variant and the modifier flags.
#[derive(Debug, Clone)]
pub struct Field {
    schemas: VariantMap<Option<SchemaRef>>,
    generated: bool,
    generated_by_app: bool,
    sensitive: bool,
}

impl Field {
    /// A field using `schema` for every variant.
    pub fn new(schema: SchemaRef) -> Self {
        Field::builder().get(schema).build()
    }

    pub fn builder() -> FieldBuilder {
        FieldBuilder::default()
    }

    pub fn schema(&self, variant: Variant) -> Option<&SchemaRef> {
        self.schemas.variant(variant).as_ref()
    }

    pub fn has_variant(&self, variant: Variant) -> bool {
        self.schemas.variant(variant).is_some()
    }

    pub fn is_empty(&self) -> bool {
        Variant::ALL.iter().all(|variant| !self.has_variant(*variant))
    }

    /// Whether the store assigns the value, so callers never send it on create.
    pub fn is_generated(&self) -> bool {
        self.generated
    }

    /// Whether the application assigns the value before it is stored.
    pub fn is_generated_by_app(&self) -> bool {
        self.generated_by_app
    }

    /// Whether the value is kept off the wire.
    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    fn without(mut self, variants: &[Variant]) -> Self {
        for variant in variants {
            *self.schemas.variant_mut(*variant) = None;
        }
        self
    }

    fn map_schemas(mut self, mut f: impl FnMut(Variant, SchemaRef) -> SchemaRef) -> Self {
        self.schemas = self
            .schemas
            .map(|variant, schema| schema.map(|schema| f(variant, schema)));
        self
    }
}

impl From<SchemaRef> for Field {
    fn from(schema: SchemaRef) -> Self {
        Field::new(schema)
    }
}

impl From<FieldBuilder> for Field {
    fn from(builder: FieldBuilder) -> Self {
        builder.build()
    }
}

/// Configures the variant slots of a [`Field`] one by one.
#[derive(Debug, Clone, Default)]
pub struct FieldBuilder {
    slots: VariantMap<Slot<SchemaRef>>,
}

impl FieldBuilder {
    pub fn get(self, schema: SchemaRef) -> Self {
        self.slot(Variant::Get, Slot::Set(schema))
    }

    pub fn add(self, schema: SchemaRef) -> Self {
        self.slot(Variant::Add, Slot::Set(schema))
    }

    pub fn update(self, schema: SchemaRef) -> Self {
        self.slot(Variant::Update, Slot::Set(schema))
    }

    pub fn json(self, schema: SchemaRef) -> Self {
        self.slot(Variant::Json, Slot::Set(schema))
    }

    pub fn json_add(self, schema: SchemaRef) -> Self {
        self.slot(Variant::JsonAdd, Slot::Set(schema))
    }

    pub fn json_update(self, schema: SchemaRef) -> Self {
        self.slot(Variant::JsonUpdate, Slot::Set(schema))
    }

    /// Removes the field from `variant`, and from every variant that would inherit from it.
    pub fn absent(self, variant: Variant) -> Self {
        self.slot(variant, Slot::Absent)
    }

    pub fn slot(mut self, variant: Variant, slot: Slot<SchemaRef>) -> Self {
        *self.slots.variant_mut(variant) = slot;
        self
    }

    pub fn build(self) -> Field {
        Field {
            schemas: resolve_variants(self.slots),
            generated: false,
            generated_by_app: false,
            sensitive: false,
        }
    }
}

/// The store assigns this field: it is left out of `add` and `json_add`.
pub fn generated(field: impl Into<Field>) -> Field {
    let mut field = field.into().without(&[Variant::Add, Variant::JsonAdd]);
    field.generated = true;
    field
}

/// The application assigns this field before storing it. Every variant is kept.
pub fn generated_by_app(field: impl Into<Field>) -> Field {
    let mut field = field.into();
    field.generated_by_app = true;
    field
}

/// Keeps this field off the wire: it is left out of every JSON variant.
pub fn sensitive(field: impl Into<Field>) -> Field {
    let mut field = field.into().without(&Variant::WIRE);
    field.sensitive = true;
    field
}

/// Makes the field optional. Storage variants write `null` for an absent value, wire
/// variants leave the key out. A missing key reads as absent everywhere.
pub fn optional(field: impl Into<Field>) -> Field {
    wrap_optional(field.into(), MissingKey::Absent)
}

/// Like [`optional`], but a stored document must carry the key, explicitly set to `null`
/// when absent.
pub fn optional_null(field: impl Into<Field>) -> Field {
    wrap_optional(field.into(), MissingKey::Reject)
}

fn wrap_optional(field: Field, storage_missing: MissingKey) -> Field {
    field.map_schemas(|variant, schema| {
        let optional = if variant.is_wire() {
            OptionalSchema::new(schema, MissingKey::Absent, AbsentEncoding::Omit)
        } else {
            OptionalSchema::new(schema, storage_missing, AbsentEncoding::Null)
        };
        Arc::new(optional) as SchemaRef
    })
}

fn stored_as(storage: SchemaRef, wire: SchemaRef) -> Field {
    Field::builder().get(storage).json(wire).build()
}

/// A date-time stored as a native timestamp and sent as an RFC 3339 string.
pub fn date_time() -> Field {
    stored_as(Arc::new(TimestampCodec), schema::date_time_string())
}

/// A creation time stamped by the store. It is never updated and never sent by callers.
pub fn date_time_insert() -> Field {
    Field::builder()
        .get(Arc::new(TimestampCodec))
        .add(Arc::new(ServerTimestampCodec))
        .absent(Variant::Update)
        .json(schema::date_time_string())
        .absent(Variant::JsonAdd)
        .absent(Variant::JsonUpdate)
        .build()
}

/// A modification time stamped by the store on every create and update.
pub fn date_time_update() -> Field {
    Field::builder()
        .get(Arc::new(TimestampCodec))
        .add(Arc::new(ServerTimestampCodec))
        .update(Arc::new(ServerTimestampCodec))
        .json(schema::date_time_string())
        .absent(Variant::JsonAdd)
        .absent(Variant::JsonUpdate)
        .build()
}

pub fn geo_point() -> Field {
    stored_as(Arc::new(GeoPointCodec), Arc::new(GeoPointSchema))
}

/// A reference into any collection, exposed as the referenced id. Only readable, since an
/// id alone cannot be written back as a reference.
pub fn any_id_reference() -> Field {
    stored_as(Arc::new(ReferenceIdCodec::any()), schema::string())
}

/// A reference into any collection, exposed as the referenced path.
pub fn any_path_reference() -> Field {
    stored_as(Arc::new(ReferencePathCodec::any()), schema::string())
}

/// A reference into `collection_path`, exposed as the referenced id.
pub fn reference(collection_path: impl Into<String>) -> Field {
    stored_as(Arc::new(ReferenceIdCodec::new(collection_path)), schema::id())
}

/// An optional reference into `collection_path`, exposed as the referenced id.
///
/// Stored documents carry the key, set to `null` when there is no reference. Wire forms
/// leave it out. This is [`optional_null`] over [`reference`].
pub fn optional_reference(collection_path: impl Into<String>) -> Field {
    optional_null(reference(collection_path))
}

/// A reference into `collection_path`, exposed as the referenced path.
pub fn reference_path(collection_path: impl Into<String>) -> Field {
    let collection_path = collection_path.into();
    stored_as(
        Arc::new(ReferencePathCodec::new(collection_path.clone())),
        Arc::new(PathPrefix::new(collection_path)),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{converter::Neutral, reference::Reference, timestamp::Timestamp, value::Value};

    fn resolved(slots: VariantMap<Slot<&'static str>>) -> VariantMap<Option<&'static str>> {
        resolve_variants(slots)
    }

    #[test]
    fn unset_slots_follow_the_default_chain() {
        let variants = resolved(VariantMap {
            get: Slot::Set("stored"),
            json: Slot::Set("wire"),
            ..Default::default()
        });

        assert_eq!(variants.add, Some("stored"));
        assert_eq!(variants.update, Some("stored"));
        assert_eq!(variants.json_add, Some("wire"));
        assert_eq!(variants.json_update, Some("wire"));
    }

    #[test]
    fn absent_slots_are_inherited_as_absent() {
        let variants = resolved(VariantMap {
            get: Slot::Set("stored"),
            add: Slot::Absent,
            ..Default::default()
        });

        assert_eq!(variants.add, None);
        assert_eq!(variants.update, None);
        assert_eq!(variants.json, Some("stored"));
    }

    #[test]
    fn nothing_set_resolves_to_nothing() {
        let variants = resolved(VariantMap::default());
        assert!(Variant::ALL.iter().all(|variant| variants.variant(*variant).is_none()));
    }

    #[test]
    fn generated_fields_are_not_sent_on_create() {
        let id = generated(schema::id());
        assert!(id.is_generated());
        assert!(id.has_variant(Variant::Get));
        assert!(id.has_variant(Variant::Update));
        assert!(!id.has_variant(Variant::Add));
        assert!(!id.has_variant(Variant::JsonAdd));
        assert!(id.has_variant(Variant::Json));
    }

    #[test]
    fn sensitive_fields_stay_off_the_wire() {
        let secret = sensitive(schema::string());
        assert!(secret.is_sensitive());
        assert!(Variant::STORAGE.iter().all(|variant| secret.has_variant(*variant)));
        assert!(Variant::WIRE.iter().all(|variant| !secret.has_variant(*variant)));
    }

    #[test]
    fn optional_differs_between_storage_and_wire() {
        let nickname = optional(schema::string());
        let stored = nickname.schema(Variant::Add).unwrap();
        let wire = nickname.schema(Variant::JsonAdd).unwrap();

        assert_eq!(stored.encode(Some(&json!(null)), &Neutral).unwrap(), Some(Value::Null));
        assert_eq!(wire.encode(Some(&json!(null)), &Neutral).unwrap(), None);
        assert_eq!(stored.decode(None, &Neutral).unwrap(), Some(json!(null)));

        let strict = optional_null(schema::string());
        assert!(strict.schema(Variant::Get).unwrap().decode(None, &Neutral).is_err());
        assert_eq!(
            strict.schema(Variant::Json).unwrap().decode(None, &Neutral).unwrap(),
            Some(json!(null))
        );
    }

    #[test]
    fn date_time_insert_is_stamped_once() {
        let created_at = date_time_insert();
        assert!(created_at.has_variant(Variant::Get));
        assert!(created_at.has_variant(Variant::Json));
        assert!(!created_at.has_variant(Variant::Update));
        assert!(!created_at.has_variant(Variant::JsonAdd));
        assert!(!created_at.has_variant(Variant::JsonUpdate));

        let add = created_at.schema(Variant::Add).unwrap();
        assert!(add.generates_when_absent());
        assert_eq!(add.encode(None, &Neutral).unwrap(), Some(Value::ServerTimestamp));
    }

    #[test]
    fn date_time_update_is_stamped_on_every_write() {
        let updated_at = date_time_update();
        let update = updated_at.schema(Variant::Update).unwrap();
        assert_eq!(update.encode(None, &Neutral).unwrap(), Some(Value::ServerTimestamp));
        assert!(!updated_at.has_variant(Variant::JsonUpdate));

        let get = updated_at.schema(Variant::Get).unwrap();
        assert_eq!(
            get.decode(Some(&Value::Timestamp(Timestamp::from_millis(0))), &Neutral)
                .unwrap(),
            Some(json!("1970-01-01T00:00:00Z"))
        );
    }

    #[test]
    fn optional_reference_writes_null_and_requires_the_stored_key() {
        let author = optional_reference("authors");
        let stored = author.schema(Variant::Add).unwrap();
        assert_eq!(stored.encode(None, &Neutral).unwrap(), Some(Value::Null));
        assert_eq!(
            stored.encode(Some(&json!("alice")), &Neutral).unwrap(),
            Some(Value::Reference(Reference::new("authors", "alice").unwrap()))
        );

        let get = author.schema(Variant::Get).unwrap();
        assert!(get.decode(None, &Neutral).is_err());
        assert_eq!(get.decode(Some(&Value::Null), &Neutral).unwrap(), Some(json!(null)));

        let wire = author.schema(Variant::JsonAdd).unwrap();
        assert_eq!(wire.encode(None, &Neutral).unwrap(), None);
    }

    #[test]
    fn reference_path_checks_the_collection_on_the_wire() {
        let author = reference_path("authors");
        let wire = author.schema(Variant::JsonAdd).unwrap();
        assert!(wire.encode(Some(&json!("authors/a1")), &Neutral).is_ok());
        assert!(wire.encode(Some(&json!("users/u1")), &Neutral).is_err());
    }
}
