//! `#[derive(Entity)]` — generates a `silo_data::Entity` impl from field
//! attributes (spec §4.2), the same declarative shape `AuditLog` (in
//! `silo-data::audit`) writes by hand: a `schema()` built from
//! `FieldDescriptor`s, `to_record()`/`from_record()` converting between the
//! struct and the backend-agnostic `Record`/`Value` currency.
//!
//! ```ignore
//! #[derive(Entity)]
//! #[entity(table = "widgets")]
//! struct Widget {
//!     #[column(primary_key)]
//!     id: String,
//!     #[column(unique, indexed)]
//!     sku: String,
//!     #[column(private)]
//!     cost_cents: i64,
//!     description: Option<String>,
//!     created_at: chrono::DateTime<chrono::Utc>,
//! }
//! ```

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, LitStr, Type};

use crate::crate_path::silo_data_path;

struct ColumnAttrs {
    primary_key: bool,
    unique: bool,
    indexed: bool,
    private: bool,
    default_now: bool,
    default_id57: bool,
    /// `#[column(values = "a,b,c")]` — the finite set of strings a categorical
    /// field accepts, overriding its inferred `FieldType` to `Enum`.
    values: Option<Vec<String>>,
}

impl ColumnAttrs {
    fn parse(field: &syn::Field) -> syn::Result<Self> {
        let mut attrs = ColumnAttrs {
            primary_key: false,
            unique: false,
            indexed: false,
            private: false,
            default_now: false,
            default_id57: false,
            values: None,
        };
        for attr in &field.attrs {
            if !attr.path().is_ident("column") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("primary_key") {
                    attrs.primary_key = true;
                } else if meta.path.is_ident("unique") {
                    attrs.unique = true;
                } else if meta.path.is_ident("indexed") {
                    attrs.indexed = true;
                } else if meta.path.is_ident("private") {
                    attrs.private = true;
                } else if meta.path.is_ident("default") {
                    let value = meta.value()?;
                    let lit: LitStr = value.parse()?;
                    match lit.value().as_str() {
                        "now" => attrs.default_now = true,
                        "id57" => attrs.default_id57 = true,
                        other => {
                            return Err(meta.error(format!(
                                "unknown #[column(default = \"{other}\")], expected \"now\" or \"id57\""
                            )))
                        }
                    }
                } else if meta.path.is_ident("values") {
                    let value = meta.value()?;
                    let lit: LitStr = value.parse()?;
                    let values: Vec<String> = lit
                        .value()
                        .split(',')
                        .map(|v| v.trim().to_string())
                        .filter(|v| !v.is_empty())
                        .collect();
                    if values.is_empty() {
                        return Err(meta.error("#[column(values = \"...\")] needs at least one comma-separated value"));
                    }
                    attrs.values = Some(values);
                } else {
                    return Err(meta.error("unknown #[column(...)] option"));
                }
                Ok(())
            })?;
        }
        Ok(attrs)
    }
}

/// The Rust-level scalar types the derive understands, independent of
/// whether the field is wrapped in `Option<_>`.
enum Scalar {
    String,
    I64,
    I32,
    Bool,
    Timestamp,
    Json,
}

fn inner_type(ty: &Type) -> (Option<&Type>, bool) {
    if let Type::Path(path) = ty {
        if let Some(segment) = path.path.segments.last() {
            if segment.ident == "Option" {
                if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                    if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
                        return (Some(inner), true);
                    }
                }
            }
        }
    }
    (Some(ty), false)
}

fn scalar_of(ty: &Type) -> syn::Result<Scalar> {
    let name = quote!(#ty).to_string().replace(' ', "");
    let scalar = match name.as_str() {
        "String" => Scalar::String,
        "i64" => Scalar::I64,
        "i32" => Scalar::I32,
        "bool" => Scalar::Bool,
        "serde_json::Value" | "Value" | "Json" => Scalar::Json,
        other if other.ends_with("DateTime<Utc>") || other.ends_with("DateTime<chrono::Utc>") => {
            Scalar::Timestamp
        }
        other => {
            return Err(syn::Error::new_spanned(
                ty,
                format!(
                    "#[derive(Entity)] does not know how to map field type `{other}` — \
                     supported types are String, i64, i32, bool, serde_json::Value, \
                     chrono::DateTime<Utc>, and Option<T> of each"
                ),
            ))
        }
    };
    Ok(scalar)
}

fn field_type_tokens(scalar: &Scalar, krate: &TokenStream) -> TokenStream {
    match scalar {
        Scalar::String => quote!(#krate::field::FieldType::Varchar(255)),
        Scalar::I64 => quote!(#krate::field::FieldType::BigInteger),
        Scalar::I32 => quote!(#krate::field::FieldType::Integer),
        Scalar::Bool => quote!(#krate::field::FieldType::Boolean),
        Scalar::Timestamp => quote!(#krate::field::FieldType::Timestamp),
        Scalar::Json => quote!(#krate::field::FieldType::Json),
    }
}

fn to_value_expr(scalar: &Scalar, access: TokenStream, krate: &TokenStream) -> TokenStream {
    match scalar {
        Scalar::String => quote!(#krate::field::Value::Text(#access.clone())),
        Scalar::I64 => quote!(#krate::field::Value::Integer(#access)),
        Scalar::I32 => quote!(#krate::field::Value::Integer(#access as i64)),
        Scalar::Bool => quote!(#krate::field::Value::Bool(#access)),
        Scalar::Timestamp => quote!(#krate::field::Value::Timestamp(#access)),
        Scalar::Json => quote!(#krate::field::Value::Json(#access.clone())),
    }
}

pub fn expand(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    match expand_inner(input) {
        Ok(ts) => ts.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_inner(input: DeriveInput) -> syn::Result<TokenStream> {
    let krate = silo_data_path();
    let name = &input.ident;

    let mut table_name: Option<String> = None;
    let mut is_public = false;
    for attr in &input.attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                let value = meta.value()?;
                let lit: LitStr = value.parse()?;
                table_name = Some(lit.value());
            } else if meta.path.is_ident("public") {
                is_public = true;
            } else {
                return Err(meta.error("unknown #[entity(...)] option"));
            }
            Ok(())
        })?;
    }
    let table_name = table_name.ok_or_else(|| {
        syn::Error::new_spanned(name, "#[derive(Entity)] requires #[entity(table = \"...\")]")
    })?;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(f) => &f.named,
            _ => return Err(syn::Error::new_spanned(name, "Entity can only be derived for structs with named fields")),
        },
        _ => return Err(syn::Error::new_spanned(name, "Entity can only be derived for structs")),
    };

    let mut schema_fields = Vec::new();
    let mut to_record_sets = Vec::new();
    let mut from_record_gets = Vec::new();
    let mut struct_inits = Vec::new();

    for field in fields {
        let ident = field.ident.clone().expect("named field");
        let field_name = ident.to_string();
        let (inner, is_optional) = inner_type(&field.ty);
        let scalar = scalar_of(inner.unwrap())?;
        let column = ColumnAttrs::parse(field)?;

        let field_type = match &column.values {
            Some(values) => {
                if !matches!(scalar, Scalar::String) {
                    return Err(syn::Error::new_spanned(
                        &field.ident,
                        "#[column(values = \"...\")] is only supported on String fields",
                    ));
                }
                quote!(#krate::field::FieldType::Enum(&[#(#values),*]))
            }
            None => field_type_tokens(&scalar, &krate),
        };
        let mut descriptor = quote!(#krate::field::FieldDescriptor::new(#field_name, #field_type));
        if column.primary_key {
            descriptor = quote!(#descriptor.primary_key());
        }
        if column.unique {
            descriptor = quote!(#descriptor.unique());
        }
        if column.indexed {
            descriptor = quote!(#descriptor.indexed());
        }
        if column.private {
            descriptor = quote!(#descriptor.private());
        }
        if is_optional {
            descriptor = quote!(#descriptor.nullable());
        }
        if column.default_now {
            descriptor = quote!(#descriptor.default(#krate::field::FieldDefault::Factory(#krate::field::now_factory)));
        } else if column.default_id57 {
            descriptor = quote!(#descriptor.default(#krate::field::FieldDefault::Factory(#krate::field::id57_factory)));
        }
        schema_fields.push(quote!(.field(#descriptor)));

        let access = quote!(self.#ident);
        let to_value = if is_optional {
            let inner_access = quote!(value);
            let wrapped = to_value_expr(&scalar, inner_access, &krate);
            quote! {
                match &#access {
                    Some(value) => #wrapped,
                    None => #krate::field::Value::Null,
                }
            }
        } else {
            to_value_expr(&scalar, access.clone(), &krate)
        };
        to_record_sets.push(quote! {
            record.set(#field_name, #to_value);
        });

        let getter = quote!(record.get(#field_name));
        let extracted = match scalar {
            Scalar::String => quote! {
                #getter.and_then(|v| match v {
                    #krate::field::Value::Text(s) => Some(s.clone()),
                    _ => None,
                })
            },
            Scalar::I64 => quote! {
                #getter.and_then(|v| match v {
                    #krate::field::Value::Integer(n) => Some(*n),
                    _ => None,
                })
            },
            Scalar::I32 => quote! {
                #getter.and_then(|v| match v {
                    #krate::field::Value::Integer(n) => Some(*n as i32),
                    _ => None,
                })
            },
            Scalar::Bool => quote! {
                #getter.and_then(|v| match v {
                    #krate::field::Value::Bool(b) => Some(*b),
                    _ => None,
                })
            },
            Scalar::Timestamp => quote! {
                #getter.and_then(|v| match v {
                    #krate::field::Value::Timestamp(ts) => Some(*ts),
                    _ => None,
                })
            },
            Scalar::Json => quote! {
                #getter.and_then(|v| match v {
                    #krate::field::Value::Json(j) => Some(j.clone()),
                    _ => None,
                })
            },
        };

        if is_optional {
            from_record_gets.push(quote! {
                let #ident = #extracted;
            });
        } else {
            let missing_msg = format!("{table_name}.{field_name} missing or wrong type");
            from_record_gets.push(quote! {
                let #ident = #extracted.ok_or_else(|| #krate::entity::RecordError(#missing_msg.to_string()))?;
            });
        }
        struct_inits.push(quote!(#ident));
    }

    let output = quote! {
        impl #krate::entity::Entity for #name {
            fn table_name() -> &'static str {
                #table_name
            }

            fn is_public() -> bool {
                #is_public
            }

            fn schema() -> #krate::entity::EntitySchema {
                #krate::entity::EntitySchema::new(#table_name)
                    #(#schema_fields)*
            }

            fn to_record(&self) -> #krate::entity::Record {
                let mut record = #krate::entity::Record::new();
                #(#to_record_sets)*
                record
            }

            fn from_record(record: &#krate::entity::Record) -> Result<Self, #krate::entity::RecordError> {
                #(#from_record_gets)*
                Ok(Self {
                    #(#struct_inits),*
                })
            }
        }
    };

    Ok(output)
}
