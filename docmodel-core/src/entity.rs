//! Entity definitions and the typed entity traits.
//!
//! An [`EntityDefinition`] is a named, ordered set of [`Field`]s plus the name of the
//! identifier field. From it one [`StructSchema`] per [`Variant`] is derived: a variant
//! schema holds the fields that take part in that variant, and drops every other key.
//!
//! The `update` variant is a patch: the identifier is required and every other field is
//! individually optional. The `json_update` variant makes every field optional.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::{entity::EntityDefinition, field, schema};
//!
//! let definition = EntityDefinition::builder("Post")
//!     .field("id", field::generated(schema::id()))
//!     .field("title", schema::string())
//!     .field("createdAt", field::date_time_insert())
//!     .build()?;
//! ```

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    converter::{NativeConverter, Neutral},
    error::{ModelError, ModelResult, ParseError},
    field::{Field, Variant, VariantMap},
    schema::{PartialSchema, SchemaRef, StructSchema, json_type_name},
    value::{Fields, Json, Value, fields_to_json},
};

/// The resolved model of an entity.
#[derive(Debug, Clone)]
pub struct EntityDefinition {
    name: String,
    identifier: String,
    fields: IndexMap<String, Field>,
    schemas: VariantMap<StructSchema>,
}

impl EntityDefinition {
    pub fn builder(name: impl Into<String>) -> EntityDefinitionBuilder {
        EntityDefinitionBuilder {
            name: name.into(),
            identifier: "id".to_string(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name of the field that holds the document id.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    pub fn schema(&self, variant: Variant) -> &StructSchema {
        self.schemas.variant(variant)
    }

    /// Decodes stored fields with the schema of a storage variant.
    pub fn decode(
        &self,
        variant: Variant,
        fields: &Fields,
        converter: &dyn NativeConverter,
    ) -> ModelResult<Json> {
        Ok(Json::Object(self.schema(variant).decode_fields(fields, converter)?))
    }

    /// Encodes an application object into fields with the schema of a storage variant.
    pub fn encode(
        &self,
        variant: Variant,
        value: &Json,
        converter: &dyn NativeConverter,
    ) -> ModelResult<Fields> {
        Ok(self.schema(variant).encode_fields(value, converter)?)
    }

    /// Decodes a wire JSON object with the schema of a wire variant.
    pub fn decode_json(&self, variant: Variant, json: &Json) -> ModelResult<Json> {
        let Value::Map(fields) = Value::from_json(json.clone()) else {
            return Err(ParseError::type_mismatch("object", json_type_name(json)).into());
        };
        self.decode(variant, &fields, &Neutral)
    }

    /// Encodes an application object into wire JSON with the schema of a wire variant.
    pub fn encode_json(&self, variant: Variant, value: &Json) -> ModelResult<Json> {
        let fields = self.encode(variant, value, &Neutral)?;
        Ok(Json::Object(fields_to_json(&fields)?))
    }
}

/// Builds and validates an [`EntityDefinition`].
#[derive(Debug, Clone)]
pub struct EntityDefinitionBuilder {
    name: String,
    identifier: String,
    fields: Vec<(String, Field)>,
}

impl EntityDefinitionBuilder {
    /// Sets the identifier field. Defaults to `id`.
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn field(mut self, name: impl Into<String>, field: impl Into<Field>) -> Self {
        self.fields.push((name.into(), field.into()));
        self
    }

    /// # Errors
    ///
    /// Fails with [`ModelError::Definition`] when a field name repeats, a field takes part
    /// in no variant, or the identifier is not readable and patchable.
    pub fn build(self) -> ModelResult<EntityDefinition> {
        let Self {
            name,
            identifier,
            fields: entries,
        } = self;

        let mut fields = IndexMap::with_capacity(entries.len());
        for (field_name, field) in entries {
            if field.is_empty() {
                return Err(ModelError::Definition(format!(
                    "Field \"{field_name}\" of {name} has no variants"
                )));
            }
            if fields.insert(field_name.clone(), field).is_some() {
                return Err(ModelError::Definition(format!(
                    "Field \"{field_name}\" of {name} is defined twice"
                )));
            }
        }

        let Some(id_field) = fields.get(&identifier) else {
            return Err(ModelError::Definition(format!(
                "Identifier \"{identifier}\" is not a field of {name}"
            )));
        };
        for variant in [Variant::Get, Variant::Update] {
            if !id_field.has_variant(variant) {
                return Err(ModelError::Definition(format!(
                    "Identifier \"{identifier}\" of {name} must be part of the {} variant",
                    variant.as_str()
                )));
            }
        }

        let schemas = VariantMap::default().map(|variant, ()| variant_schema(&fields, &identifier, variant));

        Ok(EntityDefinition {
            name,
            identifier,
            fields,
            schemas,
        })
    }
}

fn variant_schema(fields: &IndexMap<String, Field>, identifier: &str, variant: Variant) -> StructSchema {
    StructSchema::new(
        fields
            .iter()
            .filter_map(|(name, field)| {
                let schema = field.schema(variant)?.clone();
                let schema = match variant {
                    Variant::Update if name != identifier => partial(schema),
                    Variant::JsonUpdate => partial(schema),
                    _ => schema,
                };
                Some((name.clone(), schema))
            })
            .collect(),
    )
}

fn partial(schema: SchemaRef) -> SchemaRef {
    Arc::new(PartialSchema::new(schema))
}

/// A typed entity backed by an [`EntityDefinition`].
///
/// The serde form of the type is its application form: the JSON that the variant schemas
/// decode to and encode from. It can be derived with `#[derive(Entity)]`.
///
/// # Example
///
/// ```ignore
/// use docmodel::prelude::*;
///
/// #[derive(Debug, Clone, Serialize, Deserialize, Entity)]
/// #[entity(name = "Post")]
/// struct Post {
///     #[field(field::generated(schema::id()))]
///     id: Id<Post>,
///     #[field(schema::string())]
///     title: String,
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn definition() -> &'static EntityDefinition;
}

/// Conversions between an entity and its stored and wire forms.
///
/// Implemented for every [`Entity`].
pub trait EntityExt: Entity {
    /// Decodes a stored document with the `get` variant.
    fn from_fields(fields: &Fields, converter: &dyn NativeConverter) -> ModelResult<Self>;

    /// Encodes this entity with a storage variant.
    fn to_fields(&self, variant: Variant, converter: &dyn NativeConverter) -> ModelResult<Fields>;

    /// Decodes wire JSON with the `json` variant.
    fn from_wire(json: &Json) -> ModelResult<Self>;

    /// Encodes this entity as wire JSON with the `json` variant.
    fn to_wire(&self) -> ModelResult<Json>;
}

impl<E: Entity> EntityExt for E {
    fn from_fields(fields: &Fields, converter: &dyn NativeConverter) -> ModelResult<Self> {
        let decoded = E::definition().decode(Variant::Get, fields, converter)?;
        Ok(serde_json::from_value(decoded)?)
    }

    fn to_fields(&self, variant: Variant, converter: &dyn NativeConverter) -> ModelResult<Fields> {
        E::definition().encode(variant, &serde_json::to_value(self)?, converter)
    }

    fn from_wire(json: &Json) -> ModelResult<Self> {
        let decoded = E::definition().decode_json(Variant::Json, json)?;
        Ok(serde_json::from_value(decoded)?)
    }

    fn to_wire(&self) -> ModelResult<Json> {
        E::definition().encode_json(Variant::Json, &serde_json::to_value(self)?)
    }
}
