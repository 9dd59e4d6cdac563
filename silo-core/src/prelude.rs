//! `silo_core` prelude — import everything a handler or ORM module needs
//! with a single `use`.
//!
//! ```ignore
//! use silo_core::prelude::*;
//!
//! async fn load_user(id: i64) -> Result<User, AppError> {
//!     let db = Context::get::<DbHandle>();
//!     User::get(&db, id).await?.ok_or_else(|| AppError::not_found(id))
//! }
//! ```

pub use crate::config::{ConfigError, ConfigProperties, FromConfigValue, SiloConfig};
pub use crate::context::{Context, ContextBuilder, ContextFrame, Principal, TenantId};
pub use crate::error::{AppError, FieldError};
