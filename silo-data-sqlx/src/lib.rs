//! # silo-data-sqlx — sqlx backend for SILO's entity model
//!
//! This crate supplies the concrete pieces `silo-data` leaves abstract:
//!
//! | Type | Description |
//! |------|-------------|
//! | [`DbHandle`] | Tenant-namespace-aware connection handle, installed into the ambient request context |
//! | [`orm::TenantScopedOrm`] | `sqlx`-backed [`silo_data::Orm`] implementation bound to one namespace |
//! | [`migration::MigrationGenerator`] | Diffs the entity registry against a cumulative schema snapshot and emits migration files |
//! | [`Tx`] | Transaction wrapper around `sqlx::Transaction<'_, Any>` |
//! | [`SqlxError`] / [`SqlxErrorExt`] | Error bridging between `sqlx::Error` and [`silo_data::OrmError`] |
//!
//! Built on `sqlx::Any` so one binary can point at Postgres, MySQL, or
//! SQLite purely by `DATABASE_URL`, matching the rest of SILO's
//! configuration-over-compilation approach (`silo_core::SiloConfig`).

pub mod error;
pub mod handle;
pub mod migration;
pub mod orm;
pub mod tx;

pub use error::{SqlxError, SqlxErrorExt, SqlxResult};
pub use handle::DbHandle;
pub use migration::{CumulativeSchema, MigrationFile, MigrationGenerator};
pub use orm::TenantScopedOrm;
pub use tx::Tx;

/// Re-exports of the most commonly used types from both `silo-data` and this crate.
pub mod prelude {
    pub use crate::{DbHandle, SqlxError, SqlxErrorExt, Tx};
    pub use silo_data::prelude::*;
}
