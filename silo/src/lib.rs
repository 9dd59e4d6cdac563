//! SILO — a multi-tenant HTTP application runtime.
//!
//! This facade crate wires the sub-crates together behind one dependency:
//! [`AppBuilder`] assembles a [`silo_core::SiloConfig`], a tenant-scoped db
//! pool, an [`silo_events::EventBus`] (with the audit listener already
//! registered against it), a migration set, and a set of
//! [`silo_http::router::Router`]s into a single
//! [`silo_http::pipeline::Pipeline`] and serves it.
//!
//! ```ignore
//! use silo::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     silo::init_tracing();
//!     let config = SiloConfig::load("dev").unwrap_or_else(|_| SiloConfig::empty());
//!
//!     AppBuilder::new()
//!         .with_config(config)
//!         .register_router(users::routes())
//!         .serve("0.0.0.0:3000")
//!         .await
//!         .unwrap();
//! }
//! ```

mod builder;

pub use builder::AppBuilder;

// Re-export sub-crates as public modules so they're accessible as
// `silo::silo_core`, `silo::silo_data`, etc. — `silo-macros`'s
// `crate_path` resolves generated code through these paths when a
// downstream crate depends on `silo` rather than the sub-crates directly.
pub extern crate silo_core;
pub extern crate silo_macros;

// Re-export everything from silo-core at the top level for convenience.
pub use silo_core::*;
pub use silo_macros::Entity;

pub use silo_data;
pub use silo_data_sqlx;
pub use silo_events;
pub use silo_http;
pub use silo_security;
pub use silo_utils;

/// Initialise the global `tracing` subscriber with a standard `fmt` layer.
///
/// Respects `RUST_LOG`, falling back to `info` when unset. Call once, at
/// the very start of `main`, before any tracing macro.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

/// Unified prelude — `use silo::prelude::*`.
pub mod prelude {
    pub use crate::{AppBuilder, Entity};
    pub use silo_core::prelude::*;
    pub use silo_data::prelude::*;
    pub use silo_data_sqlx::prelude::*;
    pub use silo_events::prelude::*;
    pub use silo_http::prelude::*;
    pub use silo_security::prelude::*;
    pub use silo_utils::prelude::*;
}
