use proc_macro2::TokenStream;
use quote::quote;
use syn::{
    DataStruct, DeriveInput, Expr, Fields, LitStr, Result, Token, meta::ParseNestedMeta,
    spanned::Spanned,
};

pub(crate) fn generate_entity(ast: &DeriveInput, data: &DataStruct) -> Result<TokenStream> {
    let ident = &ast.ident;
    if !ast.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &ast.generics,
            "Entity cannot be derived for generic structs",
        ));
    }

    let mut name = ident.to_string();
    let mut identifier: Option<String> = None;
    let mut rename_all: Option<RenameRule> = None;

    for attr in &ast.attrs {
        if attr.path().is_ident("entity") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    name = meta.value()?.parse::<LitStr>()?.value();
                    Ok(())
                } else if meta.path.is_ident("identifier") {
                    identifier = Some(meta.value()?.parse::<LitStr>()?.value());
                    Ok(())
                } else {
                    Err(meta.error("Unknown entity attribute, expected `name` or `identifier`"))
                }
            })?;
        } else if attr.path().is_ident("serde") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename_all") {
                    let rule = meta.value()?.parse::<LitStr>()?;
                    rename_all = Some(RenameRule::parse(&rule)?);
                    Ok(())
                } else {
                    skip_meta(meta)
                }
            })?;
        }
    }

    let named = match &data.fields {
        Fields::Named(named) => named,
        other => {
            return Err(syn::Error::new(
                other.span(),
                "Entity can only be derived for structs with named fields",
            ));
        }
    };

    let mut fields = Vec::with_capacity(named.named.len());
    for field in &named.named {
        let Some(field_ident) = &field.ident else {
            continue;
        };

        let mut rename: Option<String> = None;
        let mut skipped = false;
        let mut expr: Option<Expr> = None;

        for attr in &field.attrs {
            if attr.path().is_ident("serde") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("rename") && meta.input.peek(Token![=]) {
                        rename = Some(meta.value()?.parse::<LitStr>()?.value());
                        Ok(())
                    } else if meta.path.is_ident("skip") {
                        skipped = true;
                        Ok(())
                    } else {
                        skip_meta(meta)
                    }
                })?;
            } else if attr.path().is_ident("field") {
                if expr.is_some() {
                    return Err(syn::Error::new_spanned(attr, "Duplicate #[field(...)] attribute"));
                }
                expr = Some(attr.parse_args::<Expr>()?);
            }
        }

        if skipped {
            continue;
        }

        let expr = expr.ok_or_else(|| {
            syn::Error::new_spanned(
                field_ident,
                format!("Field `{field_ident}` needs a #[field(...)] attribute describing its schema"),
            )
        })?;

        let raw = field_ident.to_string();
        let raw = raw.strip_prefix("r#").unwrap_or(&raw).to_string();
        let key = rename.unwrap_or_else(|| match rename_all {
            Some(rule) => rule.apply(&raw),
            None => raw,
        });
        fields.push((key, expr));
    }

    let identifier = identifier.map(|identifier| quote! { .identifier(#identifier) });
    let field_calls = fields.iter().map(|(key, expr)| quote! { .field(#key, #expr) });

    Ok(quote! {
        impl ::docmodel::entity::Entity for #ident {
            fn definition() -> &'static ::docmodel::entity::EntityDefinition {
                static DEFINITION: ::std::sync::LazyLock<::docmodel::entity::EntityDefinition> =
                    ::std::sync::LazyLock::new(|| {
                        #[allow(unused_imports)]
                        use ::docmodel::{codec, field, schema};

                        match ::docmodel::entity::EntityDefinition::builder(#name)
                            #identifier
                            #(#field_calls)*
                            .build()
                        {
                            ::std::result::Result::Ok(definition) => definition,
                            ::std::result::Result::Err(err) => {
                                ::std::panic!("invalid entity definition for {}: {}", #name, err)
                            }
                        }
                    });

                &DEFINITION
            }
        }
    })
}

/// Consumes a serde meta item this macro does not care about.
fn skip_meta(meta: ParseNestedMeta<'_>) -> Result<()> {
    if meta.input.peek(Token![=]) {
        meta.value()?.parse::<Expr>()?;
    } else if meta.input.peek(syn::token::Paren) {
        meta.parse_nested_meta(skip_meta)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenameRule {
    Lower,
    Upper,
    Pascal,
    Camel,
    Snake,
    ScreamingSnake,
    Kebab,
    ScreamingKebab,
}

impl RenameRule {
    fn parse(literal: &LitStr) -> Result<Self> {
        Ok(match literal.value().as_str() {
            "lowercase" => RenameRule::Lower,
            "UPPERCASE" => RenameRule::Upper,
            "PascalCase" => RenameRule::Pascal,
            "camelCase" => RenameRule::Camel,
            "snake_case" => RenameRule::Snake,
            "SCREAMING_SNAKE_CASE" => RenameRule::ScreamingSnake,
            "kebab-case" => RenameRule::Kebab,
            "SCREAMING-KEBAB-CASE" => RenameRule::ScreamingKebab,
            other => {
                return Err(syn::Error::new_spanned(
                    literal,
                    format!("Unknown rename rule `{other}`"),
                ));
            }
        })
    }

    /// Renames a snake_case field name.
    fn apply(self, field: &str) -> String {
        match self {
            RenameRule::Lower | RenameRule::Snake => field.to_string(),
            RenameRule::Upper | RenameRule::ScreamingSnake => field.to_ascii_uppercase(),
            RenameRule::Kebab => field.replace('_', "-"),
            RenameRule::ScreamingKebab => field.replace('_', "-").to_ascii_uppercase(),
            RenameRule::Pascal | RenameRule::Camel => {
                let mut renamed = String::with_capacity(field.len());
                let mut capitalize = self == RenameRule::Pascal;
                for ch in field.chars() {
                    if ch == '_' {
                        capitalize = true;
                    } else if capitalize {
                        renamed.push(ch.to_ascii_uppercase());
                        capitalize = false;
                    } else {
                        renamed.push(ch);
                    }
                }
                renamed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_rules_follow_serde() {
        assert_eq!(RenameRule::Camel.apply("created_at"), "createdAt");
        assert_eq!(RenameRule::Pascal.apply("created_at"), "CreatedAt");
        assert_eq!(RenameRule::Kebab.apply("created_at"), "created-at");
        assert_eq!(RenameRule::ScreamingSnake.apply("created_at"), "CREATED_AT");
        assert_eq!(RenameRule::Camel.apply("id"), "id");
    }

    #[test]
    fn generates_a_definition_from_field_attributes() {
        let ast: DeriveInput = syn::parse_quote! {
            #[serde(rename_all = "camelCase")]
            #[entity(name = "BlogPost")]
            struct Post {
                #[field(field::generated(schema::id()))]
                id: String,
                #[serde(rename = "headline", default)]
                #[field(schema::string())]
                title: String,
                #[field(field::date_time_insert())]
                created_at: String,
                #[serde(skip)]
                cache: Option<String>,
            }
        };
        let syn::Data::Struct(data) = &ast.data else {
            unreachable!()
        };

        let tokens = generate_entity(&ast, data).unwrap().to_string();
        assert!(tokens.contains("\"BlogPost\""));
        assert!(tokens.contains("\"headline\""));
        assert!(tokens.contains("\"createdAt\""));
        assert!(!tokens.contains("\"cache\""));
    }

    #[test]
    fn requires_a_field_attribute() {
        let ast: DeriveInput = syn::parse_quote! {
            struct Post {
                id: String,
            }
        };
        let syn::Data::Struct(data) = &ast.data else {
            unreachable!()
        };

        let err = generate_entity(&ast, data).unwrap_err();
        assert!(err.to_string().contains("#[field(...)]"));
    }
}
