//! The `Entity` trait and the runtime `Record` representation (spec §4.2,
//! §4.4): `table_name`/fields/relationships as declarative metadata,
//! `dict()`/`json()` as a private-field-aware projection, and an
//! `is_public()` hook that decides whether an entity lives in the shared
//! namespace or per-tenant.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::field::{FieldDescriptor, RelationshipDescriptor, Value};

/// The full declarative schema for one entity (spec §4.2). Built once, by
/// convention in `Entity::schema()`, and read by the registry, the ORM, and
/// the migration generator.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub table_name: &'static str,
    pub fields: Vec<FieldDescriptor>,
    pub relationships: Vec<RelationshipDescriptor>,
}

impl EntitySchema {
    pub fn new(table_name: &'static str) -> Self {
        Self {
            table_name,
            fields: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relationship(mut self, rel: RelationshipDescriptor) -> Self {
        self.relationships.push(rel);
        self
    }

    pub fn primary_key(&self) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.primary_key)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.name)
    }
}

/// A Rust type mapped to a SQL table (spec §4.2).
///
/// Implementations are expected to be thin and declarative — a
/// `#[derive(Entity)]` (in `silo-macros`) generates this from field
/// attributes for the common case; hand-writing it is just as valid.
pub trait Entity: Send + Sync + 'static {
    fn table_name() -> &'static str;

    fn schema() -> EntitySchema;

    /// `true` if rows of this entity live in the shared `public` namespace
    /// rather than being duplicated per tenant (§2, mirrors the original
    /// `Public` mixin detected via MRO).
    fn is_public() -> bool {
        false
    }

    fn to_record(&self) -> Record;

    fn from_record(record: &Record) -> Result<Self, RecordError>
    where
        Self: Sized;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordError(pub String);

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "record conversion error: {}", self.0)
    }
}

impl std::error::Error for RecordError {}

/// A backend-agnostic row: a bag of named [`Value`]s, the set of fields
/// whose values differ from last persistence (*dirty*), the set of fields
/// known to have been hydrated from storage (*loaded*), plus any loaded
/// relationship results keyed by relationship name. This is what flows
/// between the sqlx backend and entity structs, and what
/// [`Record::to_json`] projects into a response body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    values: HashMap<String, Value>,
    #[serde(skip)]
    loaded_relationships: HashMap<String, Vec<Record>>,
    #[serde(skip)]
    dirty: HashSet<String>,
    #[serde(skip)]
    loaded: HashSet<String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field's value as a mutation, adding it to the dirty set —
    /// the shape every in-memory edit (handler-built create payloads,
    /// bulk setters) goes through.
    pub fn set(&mut self, field: impl Into<String>, value: Value) -> &mut Self {
        let field = field.into();
        self.dirty.insert(field.clone());
        self.values.insert(field, value);
        self
    }

    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.set(field, value);
        self
    }

    /// Sets a field's value as freshly hydrated from storage — added to the
    /// loaded set, not the dirty set. What `row_to_record` uses to build a
    /// `Record` straight off a `SELECT`.
    pub fn set_loaded(&mut self, field: impl Into<String>, value: Value) -> &mut Self {
        let field = field.into();
        self.loaded.insert(field.clone());
        self.values.insert(field, value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// `true` if any field has been mutated since this record was either
    /// constructed fresh or last hydrated from storage.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn is_dirty_field(&self, field: &str) -> bool {
        self.dirty.contains(field)
    }

    pub fn is_loaded_field(&self, field: &str) -> bool {
        self.loaded.contains(field)
    }

    /// Clears the dirty set — called once a mutation has been persisted.
    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    pub fn set_relationship(&mut self, name: impl Into<String>, rows: Vec<Record>) {
        self.loaded_relationships.insert(name.into(), rows);
    }

    pub fn relationship(&self, name: &str) -> Option<&[Record]> {
        self.loaded_relationships.get(name).map(|v| v.as_slice())
    }

    /// Projects this record to a JSON object, honoring each field's
    /// `private` flag (spec §4.2) and attaching any loaded relationships.
    /// `allow_private` mirrors the original's caller-supplied override used
    /// for internal/system code paths that need the full row.
    pub fn to_json(&self, schema: &EntitySchema, allow_private: bool) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for field in &schema.fields {
            if field.private && !allow_private {
                continue;
            }
            let value = self
                .values
                .get(field.name)
                .cloned()
                .unwrap_or(Value::Null);
            map.insert(
                field.name.to_string(),
                serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
            );
        }
        for (name, rows) in &self.loaded_relationships {
            let rel_schema_fields = schema
                .relationships
                .iter()
                .find(|r| r.name == name.as_str());
            if rel_schema_fields.is_none() {
                continue;
            }
            let projected: Vec<serde_json::Value> =
                rows.iter().map(|r| r.to_json(schema, allow_private)).collect();
            map.insert(name.clone(), serde_json::Value::Array(projected));
        }
        serde_json::Value::Object(map)
    }

    /// Reads a field, raising [`RecordError`] rather than silently returning
    /// `Null` if it is marked `private` and the caller did not request
    /// private access — mirrors the original descriptor's `AttributeError`
    /// on unauthorized private-field reads.
    pub fn get_checked(
        &self,
        schema: &EntitySchema,
        field: &str,
        allow_private: bool,
    ) -> Result<Option<&Value>, RecordError> {
        if let Some(descriptor) = schema.fields.iter().find(|f| f.name == field) {
            if descriptor.private && !allow_private {
                return Err(RecordError(format!("field '{field}' is private")));
            }
        }
        Ok(self.values.get(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;

    fn user_schema() -> EntitySchema {
        EntitySchema::new("users")
            .field(FieldDescriptor::new("id", FieldType::BigInteger).primary_key())
            .field(FieldDescriptor::new("email", FieldType::Varchar(255)).unique())
            .field(FieldDescriptor::new("password_hash", FieldType::Text).private())
    }

    #[test]
    fn to_json_omits_private_fields_by_default() {
        let schema = user_schema();
        let record = Record::new()
            .with("id", Value::Integer(1))
            .with("email", Value::Text("a@b.com".into()))
            .with("password_hash", Value::Text("secret".into()));

        let json = record.to_json(&schema, false);
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["email"], "a@b.com");
    }

    #[test]
    fn to_json_includes_private_fields_when_allowed() {
        let schema = user_schema();
        let record = Record::new().with("password_hash", Value::Text("secret".into()));
        let json = record.to_json(&schema, true);
        assert_eq!(json["password_hash"], "secret");
    }

    #[test]
    fn with_marks_the_field_dirty() {
        let record = Record::new().with("email", Value::Text("a@b.com".into()));
        assert!(record.is_dirty());
        assert!(record.is_dirty_field("email"));
        assert!(!record.is_loaded_field("email"));
    }

    #[test]
    fn set_loaded_does_not_mark_the_field_dirty() {
        let mut record = Record::new();
        record.set_loaded("email", Value::Text("a@b.com".into()));
        assert!(!record.is_dirty());
        assert!(record.is_loaded_field("email"));
    }

    #[test]
    fn clear_dirty_empties_the_dirty_set() {
        let mut record = Record::new().with("email", Value::Text("a@b.com".into()));
        record.clear_dirty();
        assert!(!record.is_dirty());
    }

    #[test]
    fn get_checked_rejects_private_field_without_allow() {
        let schema = user_schema();
        let record = Record::new().with("password_hash", Value::Text("secret".into()));
        assert!(record
            .get_checked(&schema, "password_hash", false)
            .is_err());
        assert!(record
            .get_checked(&schema, "password_hash", true)
            .is_ok());
    }
}
