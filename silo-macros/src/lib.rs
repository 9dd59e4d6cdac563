//! Procedural macros for SILO.
//!
//! Currently a single derive macro: `#[derive(Entity)]` generates a
//! `silo_data::Entity` impl from field attributes, the declarative shape
//! `silo-data::audit::AuditLog` writes by hand for the one entity the
//! runtime itself owns. Hand-writing the `Entity` impl stays just as valid
//! for entities with relationships or field types this derive doesn't know
//! about.

extern crate proc_macro;
use proc_macro::TokenStream;

pub(crate) mod crate_path;
pub(crate) mod entity_derive;

/// Derives `silo_data::Entity` for a struct.
///
/// ```ignore
/// #[derive(Entity)]
/// #[entity(table = "widgets")]
/// struct Widget {
///     #[column(primary_key)]
///     id: String,
///     #[column(unique, indexed)]
///     sku: String,
///     #[column(private)]
///     cost_cents: i64,
///     description: Option<String>,
///     created_at: chrono::DateTime<chrono::Utc>,
/// }
/// ```
///
/// Struct-level `#[entity(table = "...", public)]`: `table` is required,
/// `public` marks the entity as living in the shared namespace rather than
/// being duplicated per tenant (spec §2).
///
/// Field-level `#[column(...)]`: `primary_key`, `unique`, `indexed`,
/// `private` (omitted from `Record::to_json` unless the reader asks for
/// private fields), and `default = "now"` / `default = "id57"`. A field
/// wrapped in `Option<T>` is nullable automatically.
///
/// Supported field types: `String`, `i64`, `i32`, `bool`,
/// `serde_json::Value`, `chrono::DateTime<chrono::Utc>`, and `Option<T>` of
/// each.
#[proc_macro_derive(Entity, attributes(entity, column))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    entity_derive::expand(input)
}
