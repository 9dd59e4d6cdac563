//! Entity registry (spec §4.2, §4.3).
//!
//! Every entity registers its schema once, at startup, the same way the
//! original implementation's `ModelRegistry` collected every `Model`
//! subclass as it was imported. `silo-data-sqlx`'s migration generator reads
//! this registry to build the desired schema it diffs against the
//! cumulative schema file; the ORM reads it to resolve relationships by
//! table name.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::entity::EntitySchema;

/// Thread-safe collection of every entity schema registered in the process.
pub struct EntityRegistry {
    schemas: RwLock<HashMap<&'static str, EntitySchema>>,
    /// Insertion order, preserved separately since `HashMap` iteration order
    /// is unspecified and the migration generator wants stable file output.
    order: RwLock<Vec<&'static str>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            schemas: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Registers `schema`, replacing any prior schema registered under the
    /// same table name. Returns `true` if this was the first registration
    /// for that table.
    pub fn register(&self, schema: EntitySchema) -> bool {
        let table_name = schema.table_name;
        let mut schemas = self.schemas.write().expect("registry lock poisoned");
        let is_new = !schemas.contains_key(table_name);
        schemas.insert(table_name, schema);
        if is_new {
            self.order.write().expect("registry lock poisoned").push(table_name);
        }
        is_new
    }

    pub fn get(&self, table_name: &str) -> Option<EntitySchema> {
        self.schemas
            .read()
            .expect("registry lock poisoned")
            .get(table_name)
            .cloned()
    }

    pub fn contains(&self, table_name: &str) -> bool {
        self.schemas
            .read()
            .expect("registry lock poisoned")
            .contains_key(table_name)
    }

    /// All registered schemas, in registration order — the order the
    /// migration generator should emit `CREATE TABLE` statements for a
    /// fresh schema.
    pub fn all(&self) -> Vec<EntitySchema> {
        let order = self.order.read().expect("registry lock poisoned");
        let schemas = self.schemas.read().expect("registry lock poisoned");
        order
            .iter()
            .filter_map(|name| schemas.get(name).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.schemas.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldDescriptor, FieldType};

    fn schema(table: &'static str) -> EntitySchema {
        EntitySchema::new(table).field(FieldDescriptor::new("id", FieldType::BigInteger).primary_key())
    }

    #[test]
    fn register_reports_whether_the_table_is_new() {
        let registry = EntityRegistry::new();
        assert!(registry.register(schema("users")));
        assert!(!registry.register(schema("users")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn all_preserves_registration_order() {
        let registry = EntityRegistry::new();
        registry.register(schema("users"));
        registry.register(schema("orders"));
        registry.register(schema("products"));
        let names: Vec<_> = registry.all().into_iter().map(|s| s.table_name).collect();
        assert_eq!(names, vec!["users", "orders", "products"]);
    }

    #[test]
    fn get_returns_none_for_unknown_table() {
        let registry = EntityRegistry::new();
        assert!(registry.get("ghosts").is_none());
    }
}
