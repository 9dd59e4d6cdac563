//! Field and relationship descriptors (spec §4.2).
//!
//! An `Entity` does not hand-write SQL or `serde` impls for its columns —
//! it declares a [`FieldDescriptor`] per field, the same way the original
//! implementation's `DatabaseField` descriptor protocol worked. The schema
//! diffing/migration generator (`silo-data-sqlx::migration`) and the
//! runtime ORM both read these descriptors instead of re-deriving column
//! metadata from Rust types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A runtime-typed column value. This is the currency the ORM and the
/// migration generator both speak — it is what lets `Record` stay agnostic
/// over concrete entity structs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// The SQL-level storage class of a field, independent of any one backend's
/// concrete type names — `silo-data-sqlx` maps each variant to the dialect's
/// column type when it emits `CREATE TABLE`/`ALTER TABLE` (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    BigInteger,
    /// Bounded text; the `u32` is the column's max length.
    Varchar(u32),
    Text,
    Boolean,
    Timestamp,
    Json,
    Uuid,
    /// A string constrained to one of a finite set of allowed values.
    Enum(&'static [&'static str]),
}

/// How a field is populated when no value is supplied at insert time.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldDefault {
    None,
    /// A fixed literal.
    Value(Value),
    /// A zero-argument producer, evaluated at insert time — covers
    /// generated values (the current timestamp, a fresh id57 primary key)
    /// that can't be expressed as one static literal. See [`now_factory`]
    /// and [`id57_factory`].
    Factory(fn() -> Value),
}

/// Built-in factory for [`FieldDefault::Factory`]: the current timestamp,
/// evaluated at insert time.
pub fn now_factory() -> Value {
    Value::Timestamp(Utc::now())
}

/// Built-in factory for [`FieldDefault::Factory`]: a fresh id57 value
/// (§4.10), used for primary keys.
pub fn id57_factory() -> Value {
    Value::Text(silo_utils::id57::generate())
}

/// One field of an entity's schema (spec §4.2).
///
/// Mirrors the original `DatabaseField` descriptor: a field can be a primary
/// key, unique, indexed, nullable, carry a default, and — distinctly from a
/// plain SQL column — be marked `private`, meaning `Record::to_json` omits
/// it unless the caller explicitly asks for private fields.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub field_type: FieldType,
    pub primary_key: bool,
    pub unique: bool,
    pub indexed: bool,
    pub nullable: bool,
    pub private: bool,
    pub default: FieldDefault,
}

impl FieldDescriptor {
    pub fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            primary_key: false,
            unique: false,
            indexed: false,
            nullable: false,
            private: false,
            default: FieldDefault::None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.unique = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    pub fn default(mut self, default: FieldDefault) -> Self {
        self.default = default;
        self
    }
}

/// The three relationship shapes the original ORM supported (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    /// This entity holds a foreign key pointing at one row of another table.
    HasOne,
    /// Another table holds a foreign key pointing back at this entity.
    HasMany,
    /// Like `HasOne`, but deleting this entity cascades to the owned row.
    OwnsOne,
}

#[derive(Debug, Clone)]
pub struct RelationshipDescriptor {
    pub name: &'static str,
    pub kind: RelationshipKind,
    pub target_table: &'static str,
    pub foreign_key: &'static str,
}

impl RelationshipDescriptor {
    pub fn has_one(name: &'static str, target_table: &'static str, foreign_key: &'static str) -> Self {
        Self {
            name,
            kind: RelationshipKind::HasOne,
            target_table,
            foreign_key,
        }
    }

    pub fn has_many(name: &'static str, target_table: &'static str, foreign_key: &'static str) -> Self {
        Self {
            name,
            kind: RelationshipKind::HasMany,
            target_table,
            foreign_key,
        }
    }

    pub fn owns_one(name: &'static str, target_table: &'static str, foreign_key: &'static str) -> Self {
        Self {
            name,
            kind: RelationshipKind::OwnsOne,
            target_table,
            foreign_key,
        }
    }
}
