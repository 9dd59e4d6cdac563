//! Tenant-namespace-aware database handle (spec §4.4, §2).
//!
//! `DbHandle` is the thing installed into the ambient [`silo_core::Context`]
//! frame for the lifetime of one request. Every tenant gets its own schema
//! (Postgres/MySQL) or attached database file (SQLite) under one physical
//! database — `ensure_namespace` creates it lazily on first use, the same
//! way the original runtime created a tenant's Postgres schema the first
//! time a request for that tenant arrived, rather than requiring an
//! upfront per-tenant provisioning step.
//!
//! Built on `sqlx::Any` rather than a generic `DB: Database` parameter:
//! SILO decides its driver from configuration at startup (§4.3's
//! `DATABASE_URL`), not at compile time, and `sqlx::Any` is the mechanism
//! sqlx gives for that — one pool type, runtime-dispatched to whichever
//! driver the URL scheme names, with `.bind()` working uniformly over the
//! handful of primitive types every backend agrees on.
//!
//! Namespace creation and migration application are serialized per
//! namespace with an entry in `locks`, so two requests for a brand-new
//! tenant arriving at the same instant don't race to `CREATE SCHEMA` twice.

use std::sync::Arc;

use dashmap::DashMap;
use silo_data::query::Dialect;
use silo_data::EntityRegistry;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{SqlxError, SqlxResult};
use crate::migration::MigrationFile;

fn quote_identifier(dialect: Dialect, name: &str) -> String {
    match dialect {
        Dialect::MySql => format!("`{name}`"),
        _ => format!("\"{name}\""),
    }
}

pub(crate) fn qualify(dialect: Dialect, namespace: &str, table: &str) -> String {
    match dialect {
        Dialect::Postgres | Dialect::MySql => format!(
            "{}.{}",
            quote_identifier(dialect, namespace),
            quote_identifier(dialect, table)
        ),
        Dialect::Sqlite | Dialect::Generic => format!("{namespace}_{table}"),
    }
}

fn dialect_from_url(url: &str) -> Dialect {
    if url.starts_with("postgres") {
        Dialect::Postgres
    } else if url.starts_with("mysql") {
        Dialect::MySql
    } else if url.starts_with("sqlite") {
        Dialect::Sqlite
    } else {
        Dialect::Generic
    }
}

/// A database handle scoped to one physical pool, capable of addressing any
/// tenant namespace plus the shared public namespace.
#[derive(Clone)]
pub struct DbHandle {
    pool: AnyPool,
    dialect: Dialect,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    registry: Arc<EntityRegistry>,
}

impl DbHandle {
    /// Connects to `database_url`, inferring the dialect from its scheme
    /// (`postgres://`, `mysql://`, `sqlite://`). Installs the default sqlx
    /// drivers on first call in a process, which `sqlx::any` requires
    /// before any `AnyPool` can be opened. `registry` is consulted by
    /// [`crate::orm::TenantScopedOrm::fetch_many`] to resolve `Query::include`
    /// relationship targets to their schema.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        registry: Arc<EntityRegistry>,
    ) -> SqlxResult<Self> {
        sqlx::any::install_default_drivers();
        let dialect = dialect_from_url(database_url);
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(SqlxError::from)?;
        Ok(Self::new(pool, dialect, registry))
    }

    pub fn new(pool: AnyPool, dialect: Dialect, registry: Arc<EntityRegistry>) -> Self {
        Self {
            pool,
            dialect,
            locks: Arc::new(DashMap::new()),
            registry,
        }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Binds this handle to one namespace, returning a
    /// [`crate::orm::TenantScopedOrm`] that implements [`silo_data::Orm`]
    /// against it. Cheap — `AnyPool` is a shared handle, so this just
    /// clones a pool reference, a namespace string, and the registry `Arc`.
    pub fn scoped(&self, namespace: impl Into<String>) -> crate::orm::TenantScopedOrm {
        crate::orm::TenantScopedOrm::new(
            self.pool.clone(),
            self.dialect,
            namespace.into(),
            self.registry.clone(),
        )
    }

    fn lock_for(&self, namespace: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Creates `namespace` if it does not already exist, and ensures it has
    /// a `migrations` bookkeeping table. Safe to call on every request;
    /// cheap once the namespace already exists because the `CREATE ... IF
    /// NOT EXISTS` statements are no-ops.
    pub async fn ensure_namespace(&self, namespace: &str) -> SqlxResult<()> {
        let lock = self.lock_for(namespace);
        let _guard = lock.lock().await;

        let quoted = quote_identifier(self.dialect, namespace);
        let create_namespace_sql = match self.dialect {
            Dialect::Postgres => format!("CREATE SCHEMA IF NOT EXISTS {quoted}"),
            Dialect::MySql => format!("CREATE DATABASE IF NOT EXISTS {quoted}"),
            Dialect::Sqlite | Dialect::Generic => String::new(),
        };
        if !create_namespace_sql.is_empty() {
            sqlx::query(&create_namespace_sql)
                .execute(&self.pool)
                .await
                .map_err(SqlxError::from)?;
        }

        let migrations_table = self.qualify(namespace, "migrations");
        let create_migrations_sql = format!(
            "CREATE TABLE IF NOT EXISTS {migrations_table} (version VARCHAR(32) PRIMARY KEY, name VARCHAR(255) NOT NULL)"
        );
        sqlx::query(&create_migrations_sql)
            .execute(&self.pool)
            .await
            .map_err(SqlxError::from)?;

        debug!(namespace, "namespace ensured");
        Ok(())
    }

    /// Fully qualifies `table` under `namespace` according to dialect — a
    /// schema-qualified name for Postgres/MySQL, or a per-tenant prefix for
    /// SQLite, which has no schema concept of its own.
    pub fn qualify(&self, namespace: &str, table: &str) -> String {
        qualify(self.dialect, namespace, table)
    }

    async fn has_applied(&self, namespace: &str, version: &str) -> SqlxResult<bool> {
        let migrations_table = self.qualify(namespace, "migrations");
        let sql = format!("SELECT version FROM {migrations_table} WHERE version = ?");
        let row: Option<(String,)> = sqlx::query_as(&sql)
            .bind(version.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlxError::from)?;
        Ok(row.is_some())
    }

    async fn record_migration(&self, namespace: &str, version: &str, name: &str) -> SqlxResult<()> {
        let migrations_table = self.qualify(namespace, "migrations");
        let sql = format!("INSERT INTO {migrations_table} (version, name) VALUES (?, ?)");
        sqlx::query(&sql)
            .bind(version.to_string())
            .bind(name.to_string())
            .execute(&self.pool)
            .await
            .map_err(SqlxError::from)?;
        Ok(())
    }

    /// Applies every not-yet-applied statement from `migration` against
    /// `namespace`, using its tenant-scoped statements for a tenant
    /// namespace or its public statements for the shared namespace.
    pub async fn apply_migration(
        &self,
        namespace: &str,
        migration: &MigrationFile,
        public: bool,
    ) -> SqlxResult<()> {
        self.ensure_namespace(namespace).await?;

        let lock = self.lock_for(namespace);
        let _guard = lock.lock().await;

        if self.has_applied(namespace, &migration.version).await? {
            return Ok(());
        }

        let statements = if public {
            &migration.public_up
        } else {
            &migration.tenant_up
        };
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(SqlxError::from)?;
        }
        self.record_migration(namespace, &migration.version, &migration.name)
            .await?;
        info!(namespace, version = %migration.version, "applied migration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualify_uses_schema_dot_table_for_postgres() {
        assert_eq!(qualify(Dialect::Postgres, "acme", "orders"), "\"acme\".\"orders\"");
    }

    #[test]
    fn qualify_prefixes_for_sqlite() {
        assert_eq!(qualify(Dialect::Sqlite, "acme", "orders"), "acme_orders");
    }

    #[test]
    fn dialect_from_url_recognizes_known_schemes() {
        assert!(matches!(dialect_from_url("postgres://localhost/db"), Dialect::Postgres));
        assert!(matches!(dialect_from_url("mysql://localhost/db"), Dialect::MySql));
        assert!(matches!(dialect_from_url("sqlite://file.db"), Dialect::Sqlite));
        assert!(matches!(dialect_from_url("oracle://localhost/db"), Dialect::Generic));
    }
}
