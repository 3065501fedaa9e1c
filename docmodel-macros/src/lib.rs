//! Procedural macros for the docmodel project.
//!
//! # `Entity`
//!
//! Derives [`Entity`] for a struct with named fields. Every field carries a
//! `#[field(...)]` attribute holding an expression that evaluates to something
//! `Into<Field>`: a schema, a codec, a field built with the modifiers, or a preset. The
//! expression is evaluated once, the first time the definition is used, with `codec`,
//! `field` and `schema` in scope.
//!
//! Field names follow serde: `#[serde(rename = "...")]` on a field and
//! `#[serde(rename_all = "...")]` on the struct are honored, and `#[serde(skip)]` fields are
//! left out of the definition.
//!
//! Container attributes:
//!
//! - `#[entity(name = "...")]` - the entity name, defaulting to the struct name
//! - `#[entity(identifier = "...")]` - the identifier field, defaulting to `"id"`
//!
//! ```rust,ignore
//! use docmodel::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Entity)]
//! #[serde(rename_all = "camelCase")]
//! pub struct Post {
//!     #[field(field::generated(schema::id()))]
//!     pub id: String,
//!     #[field(schema::string())]
//!     pub title: String,
//!     #[field(field::date_time_insert())]
//!     pub created_at: String,
//! }
//! ```
//!
//! [`Entity`]: https://docs.rs/docmodel/latest/docmodel/entity/trait.Entity.html

#[allow(unused_extern_crates)]
extern crate self as docmodel_macros;

mod entity;

use proc_macro::TokenStream;
use syn::{Data, DeriveInput, parse_macro_input};

#[proc_macro_derive(Entity, attributes(entity, field))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);

    let result = match &ast.data {
        Data::Struct(data) => entity::generate_entity(&ast, data),
        Data::Enum(_) | Data::Union(_) => Err(syn::Error::new_spanned(
            &ast.ident,
            "Entity can only be derived for structs with named fields",
        )),
    };

    result.unwrap_or_else(syn::Error::into_compile_error).into()
}
