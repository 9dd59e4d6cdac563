//! The sqlx-backed [`Orm`] implementation (spec §4.4).
//!
//! [`TenantScopedOrm`] is what `DbHandle::scoped` hands back: an `Orm` bound
//! to one namespace (a tenant schema, or the shared public namespace). It
//! builds `SELECT`/`COUNT` SQL with [`silo_data::query::QueryBuilder`] where
//! the builder's condition language covers the request, and hand-assembles
//! `INSERT`/`UPDATE`/`DELETE` statements directly, since those aren't the
//! builder's job.
//!
//! Binding uses `sqlx::Any`, which only agrees on a handful of primitive
//! wire types across backends — every [`Value`] is therefore coerced to a
//! `String`, `i64`, `f64`, or `bool` bind. This loses a little of Postgres's
//! richer native typing (`JSON`, `TIMESTAMPTZ`) in exchange for one code
//! path instead of three; call sites that need a specific backend's native
//! types should open an `Any`-backed connection and `.bind()` directly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use silo_data::field::id57_factory;
use silo_data::query::{Dialect, QueryBuilder};
use silo_data::{
    Entity, EntityRegistry, EntitySchema, FieldDefault, Filter, Orm, OrmError, Query, Record,
    RelationshipDescriptor, RelationshipKind, SortOrder, Value,
};
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Column, Row, TypeInfo};

use crate::error::SqlxErrorExt;
use crate::handle::qualify;

/// Resolves a field's default for a value missing from an inserted
/// [`Record`]. `FieldDefault::Factory` is evaluated here, at insert time,
/// rather than left for the database to fill in — `sqlx::Any` has no
/// portable `DEFAULT` expression that works the same way across
/// sqlite/postgres/mysql, so SILO resolves these itself.
fn resolve_default(default: &FieldDefault) -> Value {
    match default {
        FieldDefault::None => Value::Null,
        FieldDefault::Value(value) => value.clone(),
        FieldDefault::Factory(factory) => factory(),
    }
}

/// An [`Orm`] bound to one physical pool and one namespace.
pub struct TenantScopedOrm {
    pool: AnyPool,
    dialect: Dialect,
    namespace: String,
    registry: Arc<EntityRegistry>,
}

impl TenantScopedOrm {
    pub fn new(pool: AnyPool, dialect: Dialect, namespace: String, registry: Arc<EntityRegistry>) -> Self {
        Self { pool, dialect, namespace, registry }
    }

    fn table(&self, schema: &EntitySchema) -> String {
        qualify(self.dialect, &self.namespace, schema.table_name)
    }

    fn primary_key_column(&self, schema: &EntitySchema) -> Result<&'static str, OrmError> {
        schema
            .primary_key()
            .map(|f| f.name)
            .ok_or_else(|| OrmError::Backend(format!("{} has no primary key", schema.table_name)))
    }

    fn relationship<'s>(schema: &'s EntitySchema, name: &str) -> Option<&'s RelationshipDescriptor> {
        schema.relationships.iter().find(|r| r.name == name)
    }

    /// Fills in `record.loaded_relationships` for every name in `include`
    /// (spec §4.4's relationship materialisation). Unknown relationship
    /// names, or ones whose target table isn't registered, are silently
    /// skipped — same leniency `fetch_many`'s caller-supplied `fields`
    /// already has no enforcement around.
    async fn materialise_includes(
        &self,
        schema: &EntitySchema,
        records: &mut [Record],
        include: &[&'static str],
    ) -> Result<(), OrmError> {
        if include.is_empty() || records.is_empty() {
            return Ok(());
        }
        for name in include {
            let Some(rel) = Self::relationship(schema, name) else {
                continue;
            };
            let Some(target_schema) = self.registry.get(rel.target_table) else {
                continue;
            };
            match rel.kind {
                RelationshipKind::HasOne | RelationshipKind::OwnsOne => {
                    for record in records.iter_mut() {
                        let Some(fk_value) = record.get(rel.foreign_key).cloned() else {
                            continue;
                        };
                        if fk_value.is_null() {
                            continue;
                        }
                        let target = self.fetch(&target_schema, &fk_value).await?;
                        record.set_relationship(rel.name, target.into_iter().collect());
                    }
                }
                RelationshipKind::HasMany => {
                    let pk = self.primary_key_column(schema)?;
                    for record in records.iter_mut() {
                        let Some(pk_value) = record.get(pk).cloned() else {
                            continue;
                        };
                        let targets = self
                            .fetch_many(
                                &target_schema,
                                Query::new().filter(Filter::Eq(rel.foreign_key, pk_value)),
                            )
                            .await?;
                        record.set_relationship(rel.name, targets);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Positional bind placeholder for hand-assembled `INSERT`/`UPDATE`/`DELETE`
/// statements, matching `QueryBuilder`'s own placeholder style per dialect.
fn placeholder(dialect: Dialect, index: usize) -> String {
    match dialect {
        Dialect::Postgres => format!("${index}"),
        Dialect::Generic | Dialect::Sqlite | Dialect::MySql => "?".to_string(),
    }
}

fn value_to_placeholder_param(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Integer(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Json(j) => j.to_string(),
        Value::Timestamp(ts) => ts.to_rfc3339(),
    }
}

/// Flattens a [`Filter`] into the builder's implicitly-ANDed condition list.
/// `Filter::Any` (OR) has no equivalent in [`QueryBuilder`] today, so it is
/// rejected rather than silently treated as AND.
fn apply_filter(mut builder: QueryBuilder, filter: &Filter) -> Result<QueryBuilder, OrmError> {
    match filter {
        Filter::Eq(field, value) => Ok(builder.where_eq(field, &value_to_placeholder_param(value))),
        Filter::Ne(field, value) => Ok(builder.where_not_eq(field, &value_to_placeholder_param(value))),
        Filter::Gt(field, value) => Ok(builder.where_gt(field, &value_to_placeholder_param(value))),
        Filter::Lt(field, value) => Ok(builder.where_lt(field, &value_to_placeholder_param(value))),
        Filter::Like(field, pattern) => Ok(builder.where_like(field, pattern)),
        Filter::IsNull(field) => Ok(builder.where_null(field)),
        Filter::All(filters) => {
            for f in filters {
                builder = apply_filter(builder, f)?;
            }
            Ok(builder)
        }
        Filter::Any(_) => Err(OrmError::Backend(
            "OR-composed filters are not supported by the sqlx query builder".into(),
        )),
    }
}

fn row_to_record(row: &AnyRow, schema: &EntitySchema) -> Record {
    let mut record = Record::new();
    for field in &schema.fields {
        let Ok(idx) = row.try_column(field.name).map(|c| c.ordinal()) else {
            continue;
        };
        let value = match row.column(idx).type_info().name() {
            "INTEGER" | "BIGINT" | "INT" | "INT4" | "INT8" => row
                .try_get::<i64, _>(idx)
                .map(Value::Integer)
                .unwrap_or(Value::Null),
            "REAL" | "FLOAT" | "DOUBLE" | "FLOAT8" => row
                .try_get::<f64, _>(idx)
                .map(Value::Float)
                .unwrap_or(Value::Null),
            "BOOLEAN" | "BOOL" => row
                .try_get::<bool, _>(idx)
                .map(Value::Bool)
                .unwrap_or(Value::Null),
            _ => row
                .try_get::<String, _>(idx)
                .map(Value::Text)
                .unwrap_or(Value::Null),
        };
        record.set_loaded(field.name, value);
    }
    record
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
    value: Value,
) -> sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(b),
        Value::Integer(n) => query.bind(n),
        Value::Float(f) => query.bind(f),
        Value::Text(s) => query.bind(s),
        Value::Json(j) => query.bind(j.to_string()),
        Value::Timestamp(ts) => query.bind(ts.to_rfc3339()),
    }
}

#[async_trait]
impl Orm for TenantScopedOrm {
    async fn insert(&self, schema: &EntitySchema, record: Record) -> Result<Record, OrmError> {
        let table = self.table(schema);
        let mut columns = Vec::new();
        let mut placeholders = Vec::new();
        let mut values = Vec::new();
        let mut resolved: HashMap<&'static str, Value> = HashMap::new();
        for (idx, field) in schema.fields.iter().enumerate() {
            let value = match record.get(field.name).cloned() {
                Some(value) => value,
                None => resolve_default(&field.default),
            };
            resolved.insert(field.name, value.clone());
            columns.push(field.name);
            placeholders.push(placeholder(self.dialect, idx + 1));
            values.push(value);
        }
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );
        let mut query = sqlx::query(&sql);
        for value in values {
            query = bind_value(query, value);
        }
        query
            .execute(&self.pool)
            .await
            .map_err(|e| e.into_orm_error(schema.table_name))?;

        let pk = self.primary_key_column(schema)?;
        let id = resolved.get(pk).cloned().unwrap_or(Value::Null);
        self.fetch(schema, &id)
            .await?
            .ok_or_else(|| OrmError::NotFound(schema.table_name.to_string()))
    }

    async fn update(
        &self,
        schema: &EntitySchema,
        id: &Value,
        record: Record,
    ) -> Result<Record, OrmError> {
        if !record.is_dirty() {
            return self
                .fetch(schema, id)
                .await?
                .ok_or_else(|| OrmError::NotFound(schema.table_name.to_string()));
        }
        let table = self.table(schema);
        let pk = self.primary_key_column(schema)?;
        let mut assignments = Vec::new();
        let mut values = Vec::new();
        let mut placeholder_idx = 1usize;
        for field in &schema.fields {
            if field.name == pk || !record.is_dirty_field(field.name) {
                continue;
            }
            if let Some(value) = record.get(field.name) {
                assignments.push(format!(
                    "{} = {}",
                    field.name,
                    placeholder(self.dialect, placeholder_idx)
                ));
                values.push(value.clone());
                placeholder_idx += 1;
            }
        }
        if assignments.is_empty() {
            return self
                .fetch(schema, id)
                .await?
                .ok_or_else(|| OrmError::NotFound(schema.table_name.to_string()));
        }
        let sql = format!(
            "UPDATE {table} SET {} WHERE {pk} = {}",
            assignments.join(", "),
            placeholder(self.dialect, placeholder_idx)
        );
        let mut query = sqlx::query(&sql);
        for value in values {
            query = bind_value(query, value);
        }
        query = bind_value(query, id.clone());
        query
            .execute(&self.pool)
            .await
            .map_err(|e| e.into_orm_error(schema.table_name))?;

        self.fetch(schema, id)
            .await?
            .ok_or_else(|| OrmError::NotFound(schema.table_name.to_string()))
    }

    async fn fetch(&self, schema: &EntitySchema, id: &Value) -> Result<Option<Record>, OrmError> {
        let pk = self.primary_key_column(schema)?;
        let query = Query::new().filter(Filter::Eq(pk, id.clone())).limit(1);
        let mut rows = self.fetch_many(schema, query).await?;
        Ok(if rows.is_empty() { None } else { Some(rows.remove(0)) })
    }

    async fn fetch_many(&self, schema: &EntitySchema, query: Query) -> Result<Vec<Record>, OrmError> {
        let table = self.table(schema);
        let mut builder = QueryBuilder::new_with_dialect(&table, self.dialect);
        if let Some(filter) = &query.filter {
            builder = apply_filter(builder, filter)?;
        }
        for sort in &query.sort {
            builder = builder.order_by(sort.field, matches!(sort.order, SortOrder::Ascending));
        }
        if let Some(limit) = query.limit {
            builder = builder.limit(limit as u64);
        }
        if let Some(offset) = query.offset {
            builder = builder.offset(offset as u64);
        }

        let (sql, params) = builder.build_select("*");
        let mut sqlx_query = sqlx::query(&sql);
        for param in params {
            sqlx_query = sqlx_query.bind(param);
        }
        let rows = sqlx_query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.into_orm_error(schema.table_name))?;

        let mut records: Vec<Record> = rows.iter().map(|row| row_to_record(row, schema)).collect();
        self.materialise_includes(schema, &mut records, &query.include).await?;
        Ok(records)
    }

    async fn delete(&self, schema: &EntitySchema, id: &Value) -> Result<(), OrmError> {
        let table = self.table(schema);
        let pk = self.primary_key_column(schema)?;
        let sql = format!("DELETE FROM {table} WHERE {pk} = {}", placeholder(self.dialect, 1));
        let query = bind_value(sqlx::query(&sql), id.clone());
        query
            .execute(&self.pool)
            .await
            .map_err(|e| e.into_orm_error(schema.table_name))?;
        Ok(())
    }
}

/// Loads every row of `table` into typed entities — a convenience built on
/// [`Orm::fetch_many`] for call sites that want `Vec<E>` rather than raw
/// records. Not part of the [`Orm`] trait itself, since `E` is a
/// compile-time type the trait's dyn-compatible methods can't carry.
pub async fn fetch_all_as<E: Entity>(orm: &dyn Orm, query: Query) -> Result<Vec<E>, OrmError> {
    let schema = E::schema();
    let records = orm.fetch_many(&schema, query).await?;
    records
        .iter()
        .map(|r| E::from_record(r).map_err(|e| OrmError::Backend(e.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_filter_rejects_any_composition() {
        let builder = QueryBuilder::new("users");
        let filter = Filter::Any(vec![Filter::eq("id", 1i64), Filter::eq("id", 2i64)]);
        assert!(apply_filter(builder, &filter).is_err());
    }

    #[test]
    fn apply_filter_flattens_all_into_and_conditions() {
        let builder = QueryBuilder::new("users");
        let filter = Filter::and([Filter::eq("tenant_id", "t1"), Filter::eq("active", true)]);
        let builder = apply_filter(builder, &filter).unwrap();
        let (sql, params) = builder.build_select("*");
        assert!(sql.contains("WHERE"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn resolve_default_generates_an_id57_for_missing_primary_keys() {
        let value = resolve_default(&FieldDefault::Factory(id57_factory));
        match value {
            Value::Text(id) => assert_eq!(id.len(), 30),
            other => panic!("expected a text id57, got {other:?}"),
        }
    }

    #[test]
    fn resolve_default_returns_null_when_no_default_is_set() {
        assert_eq!(resolve_default(&FieldDefault::None), Value::Null);
    }

    #[test]
    fn resolve_default_passes_through_literal_defaults() {
        assert_eq!(
            resolve_default(&FieldDefault::Value(Value::Integer(7))),
            Value::Integer(7)
        );
    }

    fn widget_schema() -> EntitySchema {
        use silo_data::{FieldDescriptor, FieldType};
        EntitySchema::new("widgets")
            .field(FieldDescriptor::new("id", FieldType::Varchar(32)).primary_key())
            .field(FieldDescriptor::new("name", FieldType::Varchar(255)))
    }

    async fn sqlite_orm() -> TenantScopedOrm {
        sqlite_orm_with_registry(Arc::new(EntityRegistry::new())).await
    }

    async fn sqlite_orm_with_registry(registry: Arc<EntityRegistry>) -> TenantScopedOrm {
        sqlx::any::install_default_drivers();
        let pool = sqlx::any::AnyPoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE public_widgets (id VARCHAR(32) PRIMARY KEY, name VARCHAR(255))")
            .execute(&pool)
            .await
            .unwrap();
        TenantScopedOrm::new(pool, Dialect::Sqlite, "public".to_string(), registry)
    }

    #[tokio::test]
    async fn update_is_a_no_op_when_the_record_has_no_dirty_fields() {
        let orm = sqlite_orm().await;
        let schema = widget_schema();
        let created = orm
            .insert(
                &schema,
                Record::new()
                    .with("id", Value::Text("w1".into()))
                    .with("name", Value::Text("gear".into())),
            )
            .await
            .unwrap();
        assert!(!created.is_dirty());

        // A record freshly fetched from storage is loaded, not dirty, so
        // passing it straight to update() must not issue an UPDATE at all.
        let unchanged = orm
            .update(&schema, &Value::Text("w1".into()), created.clone())
            .await
            .unwrap();
        assert_eq!(unchanged.get("name"), Some(&Value::Text("gear".into())));

        let mut dirty = created;
        dirty.set("name", Value::Text("sprocket".into()));
        let updated = orm
            .update(&schema, &Value::Text("w1".into()), dirty)
            .await
            .unwrap();
        assert_eq!(updated.get("name"), Some(&Value::Text("sprocket".into())));
    }

    fn author_schema() -> EntitySchema {
        use silo_data::{FieldDescriptor, FieldType};
        EntitySchema::new("authors")
            .field(FieldDescriptor::new("id", FieldType::Varchar(32)).primary_key())
            .field(FieldDescriptor::new("name", FieldType::Varchar(255)))
            .relationship(RelationshipDescriptor::has_many("books", "books", "author_id"))
    }

    fn book_schema() -> EntitySchema {
        use silo_data::{FieldDescriptor, FieldType};
        EntitySchema::new("books")
            .field(FieldDescriptor::new("id", FieldType::Varchar(32)).primary_key())
            .field(FieldDescriptor::new("title", FieldType::Varchar(255)))
            .field(FieldDescriptor::new("author_id", FieldType::Varchar(32)))
            .relationship(RelationshipDescriptor::has_one("author", "authors", "author_id"))
    }

    async fn related_sqlite_orm() -> TenantScopedOrm {
        let registry = Arc::new(EntityRegistry::new());
        registry.register(author_schema());
        registry.register(book_schema());
        let orm = sqlite_orm_with_registry(registry).await;
        sqlx::query("CREATE TABLE public_authors (id VARCHAR(32) PRIMARY KEY, name VARCHAR(255))")
            .execute(&orm.pool)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE public_books (id VARCHAR(32) PRIMARY KEY, title VARCHAR(255), author_id VARCHAR(32))")
            .execute(&orm.pool)
            .await
            .unwrap();
        orm
    }

    #[tokio::test]
    async fn fetch_many_materialises_a_has_many_include() {
        let orm = related_sqlite_orm().await;
        let authors = author_schema();
        let books = book_schema();

        orm.insert(&authors, Record::new().with("id", Value::Text("a1".into())).with("name", Value::Text("Le Guin".into())))
            .await
            .unwrap();
        orm.insert(
            &books,
            Record::new()
                .with("id", Value::Text("b1".into()))
                .with("title", Value::Text("The Dispossessed".into()))
                .with("author_id", Value::Text("a1".into())),
        )
        .await
        .unwrap();
        orm.insert(
            &books,
            Record::new()
                .with("id", Value::Text("b2".into()))
                .with("title", Value::Text("The Left Hand of Darkness".into()))
                .with("author_id", Value::Text("a1".into())),
        )
        .await
        .unwrap();

        let fetched = orm.fetch_many(&authors, Query::new().include("books")).await.unwrap();
        assert_eq!(fetched.len(), 1);
        let related = fetched[0].relationship("books").unwrap();
        assert_eq!(related.len(), 2);
    }

    #[tokio::test]
    async fn fetch_many_materialises_a_has_one_include() {
        let orm = related_sqlite_orm().await;
        let authors = author_schema();
        let books = book_schema();

        orm.insert(&authors, Record::new().with("id", Value::Text("a1".into())).with("name", Value::Text("Le Guin".into())))
            .await
            .unwrap();
        orm.insert(
            &books,
            Record::new()
                .with("id", Value::Text("b1".into()))
                .with("title", Value::Text("The Dispossessed".into()))
                .with("author_id", Value::Text("a1".into())),
        )
        .await
        .unwrap();

        let fetched = orm.fetch_many(&books, Query::new().include("author")).await.unwrap();
        assert_eq!(fetched.len(), 1);
        let related = fetched[0].relationship("author").unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].get("name"), Some(&Value::Text("Le Guin".into())));
    }
}
