mod handlers;
mod models;

use std::collections::HashMap;
use std::sync::Arc;

use silo::prelude::*;
use silo::silo_data::EntityRegistry;
use silo::silo_data_sqlx::MigrationGenerator;
use silo::silo_security::{StaticTokenOracle, TokenOracle};

use models::Widget;

/// Generates a migration from the current entity registry if the schema
/// has drifted since the last run, then loads every migration on disk so
/// the pipeline can apply them against a fresh tenant database.
async fn prepare_migrations(dir: &str) -> Result<Vec<silo::silo_data_sqlx::MigrationFile>, AppError> {
    let registry = EntityRegistry::new();
    registry.register(Widget::schema());
    registry.register(silo::silo_data::audit::AuditLog::schema());

    let generator = MigrationGenerator::new(dir, vec!["audit_logs"]);
    if let Some(file) = generator
        .generate("init", &registry)
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

/// A single hardcoded bearer token for the demo's one protected route — a
/// real deployment would back this with a `TokenOracle` that verifies
/// against an actual identity provider instead of a fixed map.
fn demo_token_oracle() -> Arc<dyn TokenOracle> {
    let mut tokens = HashMap::new();
    tokens.insert(
        "demo-token".to_string(),
        serde_json::json!({ "sub": "demo-user", "roles": ["viewer"] }),
    );
    Arc::new(StaticTokenOracle::new(tokens))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    silo::init_tracing();

    let config = SiloConfig::load("dev").unwrap_or_else(|_| SiloConfig::empty());
    let migrations = prepare_migrations("migrations").await?;

    AppBuilder::new()
        .with_config(config)
        .with_migrations(migrations)
        .with_default_tenant(TenantId::from("example_app"))
        .register_router(handlers::widgets_router(demo_token_oracle()))
        .serve("0.0.0.0:3000")
        .await
}
