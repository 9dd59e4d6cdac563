//! Application assembly (spec §6).
//!
//! Collects configuration and routes on a builder, then produces a runnable
//! server — the same two-phase shape as a dependency-injected builder
//! (`NoState -> T` typestate over a compile-time bean graph and an
//! `axum::Router`), minus the DI container and generic app state: a
//! [`Pipeline`] is already the fully assembled application, so `AppBuilder`
//! only wires the handful of things a `Pipeline` needs (config, db, bus,
//! migrations, routers) and owns the `hyper`/`tower` serving loop directly.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::service::TowerToHyperService;
use silo_core::{AppError, TenantId};
use silo_data::EntityRegistry;
use silo_data_sqlx::{DbHandle, MigrationFile, MigrationGenerator};
use silo_events::EventBus;
use silo_http::pipeline::Pipeline;
use silo_http::router::Router;
use silo_http::secure_headers::SecureHeaders;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

type StartupHook = Box<
    dyn FnOnce(Arc<Pipeline>) -> Pin<Box<dyn std::future::Future<Output = Result<(), AppError>> + Send>> + Send,
>;
type ShutdownHook = Box<dyn FnOnce() -> Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send>;

/// Collects everything a [`Pipeline`] needs, then builds or serves it.
///
/// ```ignore
/// AppBuilder::new()
///     .with_config(config)
///     .register_router(users::routes())
///     .load_migrations_dir("migrations", vec!["audit_logs"])?
///     .serve("0.0.0.0:3000")
///     .await?;
/// ```
pub struct AppBuilder {
    config: Option<silo_core::SiloConfig>,
    routers: Vec<Router>,
    migrations: Vec<MigrationFile>,
    registry: Option<Arc<EntityRegistry>>,
    secure_headers: Option<SecureHeaders>,
    default_tenant: Option<TenantId>,
    event_concurrency: Option<usize>,
    startup_hooks: Vec<StartupHook>,
    shutdown_hooks: Vec<ShutdownHook>,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            routers: Vec::new(),
            migrations: Vec::new(),
            registry: None,
            secure_headers: None,
            default_tenant: None,
            event_concurrency: None,
            startup_hooks: Vec::new(),
            shutdown_hooks: Vec::new(),
        }
    }

    /// Store a resolved [`SiloConfig`], read by [`build`](Self::build) for
    /// `database.url` / `database.max_connections`.
    pub fn with_config(mut self, config: silo_core::SiloConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Register one router's worth of routes.
    pub fn register_router(mut self, router: Router) -> Self {
        self.routers.push(router);
        self
    }

    /// Provide an already-loaded migration set directly.
    pub fn with_migrations(mut self, migrations: Vec<MigrationFile>) -> Self {
        self.migrations = migrations;
        self
    }

    /// Supply the entity registry the runtime `Orm` consults to resolve
    /// `Query::include` relationship targets. Defaults to an empty registry
    /// (`include` then silently materialises nothing) when not provided —
    /// hosts that only read/write entities without relationships don't need
    /// to call this.
    pub fn with_registry(mut self, registry: Arc<EntityRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Load every `*.migration.json` file under `dir`, generated ahead of
    /// time by `silo migrate new` (or the host's own `migrate::generate`
    /// call, see `silo-cli`).
    pub async fn load_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let generator = MigrationGenerator::new(dir, Vec::new());
        self.migrations = generator
            .load_all()
            .await
            .map_err(|err| AppError::ConfigurationError(err.to_string()))?;
        Ok(self)
    }

    pub fn with_secure_headers(mut self, headers: SecureHeaders) -> Self {
        self.secure_headers = Some(headers);
        self
    }

    pub fn with_default_tenant(mut self, tenant: TenantId) -> Self {
        self.default_tenant = Some(tenant);
        self
    }

    pub fn with_event_concurrency(mut self, n: usize) -> Self {
        self.event_concurrency = Some(n);
        self
    }

    /// Register a startup hook that runs once, after the pipeline (and its
    /// db pool) is assembled but before the listener starts accepting.
    pub fn on_start<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(Arc<Pipeline>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), AppError>> + Send + 'static,
    {
        self.startup_hooks.push(Box::new(move |pipeline| Box::pin(hook(pipeline))));
        self
    }

    /// Register a shutdown hook that runs after the server stops accepting
    /// connections.
    pub fn on_stop<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.shutdown_hooks.push(Box::new(move || Box::pin(hook())));
        self
    }

    /// Resolve the db pool from config, assemble the event bus (wiring the
    /// audit listener against it), and produce a ready-to-serve pipeline.
    /// Runs registered startup hooks before returning.
    pub async fn build(self) -> Result<Arc<Pipeline>, AppError> {
        let (pipeline, _shutdown_hooks) = self.build_inner().await?;
        Ok(pipeline)
    }

    async fn build_inner(self) -> Result<(Arc<Pipeline>, Vec<ShutdownHook>), AppError> {
        let config = self.config.unwrap_or_else(silo_core::SiloConfig::empty);
        let database_url: String = config
            .get("database.url")
            .map_err(|err| AppError::ConfigurationError(err.to_string()))?;
        let max_connections = config.get_or("database.max_connections", 10i64) as u32;

        let registry = self.registry.unwrap_or_else(|| Arc::new(EntityRegistry::new()));
        let db = DbHandle::connect(&database_url, max_connections, registry)
            .await
            .map_err(|err| AppError::ServiceUnavailable(err.to_string()))?;

        let bus = match self.event_concurrency {
            Some(n) => EventBus::with_concurrency(n),
            None => EventBus::new(),
        };

        let orm = Arc::new(db.scoped("public"));
        silo_data::audit::register_audit_listener(&bus, orm, silo_utils::id57::generate).await;

        let mut pipeline = Pipeline::new(self.routers, bus, db, self.migrations);
        if let Some(headers) = self.secure_headers {
            pipeline = pipeline.with_secure_headers(headers);
        }
        if let Some(tenant) = self.default_tenant {
            pipeline = pipeline.with_default_tenant(tenant);
        }
        let pipeline = Arc::new(pipeline);

        for hook in self.startup_hooks {
            hook(pipeline.clone()).await?;
        }

        Ok((pipeline, self.shutdown_hooks))
    }

    /// Assemble the application and serve it on `addr` until Ctrl-C or
    /// SIGTERM, using `hyper`'s connection machinery directly — there's no
    /// `axum::serve` here, just a `TcpListener` and a `tower_http` stack
    /// wrapping the pipeline per connection (spec §6).
    pub async fn serve(self, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
        let (pipeline, shutdown_hooks) = self.build_inner().await?;

        let addr: SocketAddr = addr.parse()?;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "server listening");

        let mut connections = tokio::task::JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let pipeline = pipeline.clone();
                    connections.spawn(async move {
                        let service = ServiceBuilder::new()
                            .layer(TraceLayer::new_for_http())
                            .layer(CompressionLayer::new())
                            .service(pipeline);
                        let io = TokioIo::new(stream);
                        if let Err(err) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, TowerToHyperService::new(service))
                            .await
                        {
                            error!(%peer, %err, "connection error");
                        }
                    });
                }
                _ = shutdown_signal() => {
                    info!("shutdown signal received, draining connections");
                    break;
                }
            }
        }

        while connections.join_next().await.is_some() {}

        for hook in shutdown_hooks {
            hook().await;
        }

        info!("server stopped");
        Ok(())
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to listen for Ctrl-C");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_config() -> silo_core::SiloConfig {
        let mut config = silo_core::SiloConfig::empty();
        config.set("database.url", silo_core::ConfigValue::String("sqlite::memory:".into()));
        config
    }

    #[tokio::test]
    async fn build_wires_a_pipeline_against_an_in_memory_db() {
        sqlx::any::install_default_drivers();
        let config = sqlite_config();
        let pipeline = AppBuilder::new().with_config(config).build().await.unwrap();
        let response = pipeline
            .handle(silo_http::request::Request::new(
                silo_http::request::RequestParts::from_wire(http::Method::GET, "/favicon.ico".to_string(), "", http::HeaderMap::new()),
                bytes::Bytes::new(),
            ))
            .await;
        assert_eq!(response.status(), http::StatusCode::OK);
    }

    #[tokio::test]
    async fn build_fails_without_a_database_url() {
        sqlx::any::install_default_drivers();
        let err = AppBuilder::new().build().await.unwrap_err();
        assert!(matches!(err, AppError::ConfigurationError(_)));
    }
}
