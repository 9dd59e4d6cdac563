//! Migration generation and application (spec §4.3/§4.3-ADDED).
//!
//! Grounded on `migration_cli.py`/`migrate.py`: a thin wrapper over
//! `silo-data-sqlx::migration`'s `MigrationGenerator`/`DbHandle`. Kept as a
//! library module, not just CLI-command bodies, because [`generate`] needs
//! an [`EntityRegistry`] populated with the caller's own entities — a
//! generic `silo` binary has no way to know what those are, so a host
//! application either calls straight into this module from its own
//! `main.rs` (as `demos/example-app`'s `prepare_migrations` does) or embeds
//! [`generate`] in a small dedicated binary. `apply` needs no such registry
//! and so is fully driven by the bundled `silo` binary directly.

use std::sync::Arc;

use silo_data::EntityRegistry;
use silo_data_sqlx::migration::{MigrationFile, MigrationGenerator};
use silo_data_sqlx::{DbHandle, SqlxError};

/// Diffs `registry`'s desired schema against the on-disk cumulative schema
/// under `migrations_dir`, writing a new migration file if anything
/// changed. Returns `None` if the schema is already up to date.
pub async fn generate(
    migrations_dir: impl Into<std::path::PathBuf>,
    public_tables: Vec<&'static str>,
    registry: &EntityRegistry,
    name: &str,
) -> Result<Option<MigrationFile>, SqlxError> {
    let generator = MigrationGenerator::new(migrations_dir, public_tables);
    generator.generate(name, registry).await
}

/// Applies every migration file under `migrations_dir` to `namespace`,
/// connecting to `database_url` directly (outside the request path — for CI
/// or an ops runbook, not per-request lazy migration). Returns the number of
/// migration files considered; `DbHandle::apply_migration` is a no-op for
/// versions already recorded against the namespace.
pub async fn apply(
    database_url: &str,
    migrations_dir: impl Into<std::path::PathBuf>,
    namespace: &str,
    public: bool,
) -> Result<usize, SqlxError> {
    let db = DbHandle::connect(database_url, 5, Arc::new(EntityRegistry::new())).await?;
    let generator = MigrationGenerator::new(migrations_dir, Vec::new());
    let migrations = generator.load_all().await?;
    for migration in &migrations {
        db.apply_migration(namespace, migration, public).await?;
    }
    Ok(migrations.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_data::field::{FieldDescriptor, FieldType};
    use silo_data::EntitySchema;

    fn schema() -> EntitySchema {
        EntitySchema::new("widgets")
            .field(FieldDescriptor::new("id", FieldType::BigInteger).primary_key())
            .field(FieldDescriptor::new("sku", FieldType::Varchar(64)).unique())
    }

    #[tokio::test]
    async fn generate_writes_a_migration_file_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let registry = EntityRegistry::new();
        registry.register(schema());

        let file = generate(dir.path(), Vec::new(), &registry, "create_widgets")
            .await
            .unwrap();
        assert!(file.is_some());
        assert!(!file.unwrap().tenant_up.is_empty());
    }

    #[tokio::test]
    async fn generate_is_a_no_op_once_schema_matches() {
        let dir = tempfile::tempdir().unwrap();
        let registry = EntityRegistry::new();
        registry.register(schema());

        generate(dir.path(), Vec::new(), &registry, "create_widgets").await.unwrap();
        let second = generate(dir.path(), Vec::new(), &registry, "create_widgets_again")
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn apply_runs_every_generated_migration_against_the_namespace() {
        sqlx::any::install_default_drivers();
        let dir = tempfile::tempdir().unwrap();
        let registry = EntityRegistry::new();
        registry.register(schema());
        generate(dir.path(), Vec::new(), &registry, "create_widgets").await.unwrap();

        let applied = apply("sqlite::memory:", dir.path(), "acme_corp", false).await.unwrap();
        assert_eq!(applied, 1);
    }
}
