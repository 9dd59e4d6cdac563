mod handlers;
mod models;

use std::collections::HashMap;
use std::sync::Arc;

use silo::prelude::*;
use silo::silo_data::audit::AuditLog;
use silo::silo_data::EntityRegistry;
use silo::silo_data_sqlx::{DbHandle, MigrationGenerator};
use silo::silo_security::{StaticTokenOracle, TokenOracle};

use models::Project;

/// Generates (if the schema drifted) and loads every migration for the
/// tenant-scoped `projects` table plus the shared `audit_logs` table.
async fn prepare_migrations(
    dir: &str,
    registry: &EntityRegistry,
) -> Result<Vec<silo::silo_data_sqlx::MigrationFile>, AppError> {
    let generator = MigrationGenerator::new(dir, vec!["audit_logs"]);
    if let Some(file) = generator
        .generate("init", registry)
        .await
        .map_err(|err| AppError::ConfigurationError(err.to_string()))?
    {
        tracing::info!(migration = %file.filename(), "generated migration");
    }

    generator
        .load_all()
        .await
        .map_err(|err| AppError::ConfigurationError(err.to_string()))
}

/// Three fixed demo tokens: two ordinary users scoped to their own tenant
/// via a custom `tenant_id` claim, one super-admin scoped to none in
/// particular. A real deployment would issue these from whatever identity
/// provider signs its users in — see `silo-security`'s `TokenOracle` trait
/// for the seam.
fn demo_token_oracle() -> Arc<dyn TokenOracle> {
    let mut tokens = HashMap::new();
    tokens.insert(
        "acme-user-token".to_string(),
        serde_json::json!({ "sub": "alice", "tenant_id": "acme", "roles": ["user"] }),
    );
    tokens.insert(
        "globex-user-token".to_string(),
        serde_json::json!({ "sub": "charlie", "tenant_id": "globex", "roles": ["user"] }),
    );
    tokens.insert(
        "root-token".to_string(),
        serde_json::json!({ "sub": "root", "roles": ["super-admin"] }),
    );
    Arc::new(StaticTokenOracle::new(tokens))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    silo::init_tracing();

    let config = SiloConfig::load("dev").unwrap_or_else(|_| SiloConfig::empty());

    let registry = Arc::new(EntityRegistry::new());
    registry.register(Project::schema());
    registry.register(AuditLog::schema());
    let migrations = prepare_migrations("migrations", &registry).await?;

    // A second connection to the same database, scoped to the `public`
    // namespace, so the admin router can read the audit trail across every
    // tenant — `Pipeline` only ever installs the *resolved* tenant's db
    // handle into `Context` (spec §4.1), never the public one.
    let database_url: String = config.get("database.url").map_err(|err| AppError::ConfigurationError(err.to_string()))?;
    let max_connections = config.get_or("database.max_connections", 10i64) as u32;
    let admin_db = DbHandle::connect(&database_url, max_connections, registry.clone())
        .await
        .map_err(|err| AppError::ServiceUnavailable(err.to_string()))?;
    let public_orm: Arc<dyn Orm> = Arc::new(admin_db.scoped("public"));

    let oracle = demo_token_oracle();

    AppBuilder::new()
        .with_config(config)
        .with_migrations(migrations)
        .with_registry(registry)
        .register_router(handlers::projects_router(oracle.clone()))
        .register_router(handlers::admin_router(oracle, public_orm))
        .serve("0.0.0.0:3000")
        .await
}
