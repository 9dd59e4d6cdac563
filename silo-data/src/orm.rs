//! Backend-agnostic ORM contract (spec §4.4).
//!
//! `silo-data` only describes *what* an ORM backend must support — schema
//! introspection aside, it never touches a driver. `silo-data-sqlx`
//! implements [`Orm`] against a tenant-scoped [`crate::entity::Record`]
//! store. Grounded on the original `Model` class methods `get`, `all`,
//! `filter`, `create`, `update`, `delete`, and `first_or_create`.

use async_trait::async_trait;

use crate::entity::{EntitySchema, Record};
use crate::field::Value;

/// A single `field OP value` predicate. [`Filter::All`]/[`Filter::Any`]
/// compose predicates the way the original's `Q` objects did for
/// `filter(Q(a) & Q(b))`-style queries.
#[derive(Debug, Clone)]
pub enum Filter {
    Eq(&'static str, Value),
    Ne(&'static str, Value),
    Gt(&'static str, Value),
    Lt(&'static str, Value),
    Like(&'static str, String),
    IsNull(&'static str),
    All(Vec<Filter>),
    Any(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &'static str, value: impl Into<Value>) -> Self {
        Filter::Eq(field, value.into())
    }

    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::All(filters.into_iter().collect())
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Any(filters.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub field: &'static str,
    pub order: SortOrder,
}

/// A bounded, sorted query against one table (spec §4.4).
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filter: Option<Filter>,
    pub sort: Vec<SortKey>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Relationship names to eager-load alongside the matched rows.
    pub include: Vec<&'static str>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn sort_by(mut self, field: &'static str, order: SortOrder) -> Self {
        self.sort.push(SortKey { field, order });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn include(mut self, relationship: &'static str) -> Self {
        self.include.push(relationship);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrmError {
    NotFound(String),
    UniqueViolation(String),
    Backend(String),
}

impl std::fmt::Display for OrmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrmError::NotFound(table) => write!(f, "no row found in '{table}'"),
            OrmError::UniqueViolation(detail) => write!(f, "unique constraint violated: {detail}"),
            OrmError::Backend(detail) => write!(f, "backend error: {detail}"),
        }
    }
}

impl std::error::Error for OrmError {}

/// A tenant- and schema-aware CRUD contract over [`Record`] (spec §4.4).
///
/// Every method takes the [`EntitySchema`] explicitly rather than a
/// generic type parameter bound to [`crate::entity::Entity`] — the runtime
/// ORM operates on schema + [`Record`] so it can be driven by schemas
/// assembled from the registry without requiring every caller to know the
/// concrete Rust entity type.
#[async_trait]
pub trait Orm: Send + Sync {
    async fn insert(&self, schema: &EntitySchema, record: Record) -> Result<Record, OrmError>;

    /// Persists only `record`'s dirty fields (§4.2's dirty-tracking
    /// invariant: a record with nothing mutated since it was last fetched
    /// or inserted has an empty dirty set). A no-op dirty set is a no-op
    /// update — no `UPDATE` statement is issued and no audit event should
    /// fire for it.
    async fn update(
        &self,
        schema: &EntitySchema,
        id: &Value,
        record: Record,
    ) -> Result<Record, OrmError>;

    async fn fetch(&self, schema: &EntitySchema, id: &Value) -> Result<Option<Record>, OrmError>;

    async fn fetch_many(&self, schema: &EntitySchema, query: Query) -> Result<Vec<Record>, OrmError>;

    async fn delete(&self, schema: &EntitySchema, id: &Value) -> Result<(), OrmError>;

    /// Fetches the first row matching `query`'s filter, or inserts
    /// `defaults` and returns the newly created row — mirrors the original
    /// `Model.first_or_create`. `defaults` is merged over any field values
    /// already implied by an `Eq` filter.
    async fn first_or_create(
        &self,
        schema: &EntitySchema,
        filter: Filter,
        defaults: Record,
    ) -> Result<(Record, bool), OrmError> {
        let query = Query::new().filter(filter.clone());
        let existing = self.fetch_many(schema, query).await?;
        if let Some(record) = existing.into_iter().next() {
            return Ok((record, false));
        }
        let mut to_insert = defaults;
        merge_eq_filter_into_record(&filter, &mut to_insert);
        let created = self.insert(schema, to_insert).await?;
        Ok((created, true))
    }
}

fn merge_eq_filter_into_record(filter: &Filter, record: &mut Record) {
    match filter {
        Filter::Eq(field, value) => {
            if record.get(field).is_none() {
                record.set(*field, value.clone());
            }
        }
        Filter::All(filters) => {
            for f in filters {
                merge_eq_filter_into_record(f, record);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_eq_filter_fills_only_missing_fields() {
        let mut record = Record::new().with("email", Value::Text("set@already.com".into()));
        let filter = Filter::and([
            Filter::eq("email", "ignored@example.com"),
            Filter::eq("tenant_id", "t1"),
        ]);
        merge_eq_filter_into_record(&filter, &mut record);
        assert_eq!(record.get("email").unwrap().as_str(), Some("set@already.com"));
        assert_eq!(record.get("tenant_id").unwrap().as_str(), Some("t1"));
    }

    #[test]
    fn query_builder_accumulates_sort_keys() {
        let query = Query::new()
            .sort_by("created_at", SortOrder::Descending)
            .sort_by("id", SortOrder::Ascending)
            .limit(20);
        assert_eq!(query.sort.len(), 2);
        assert_eq!(query.limit, Some(20));
    }
}
