//! Transaction wrapper (spec §4.4).
//!
//! A thin `Deref`/`DerefMut` wrapper around `sqlx::Transaction<'_, Any>`,
//! committing on a successful scope and rolling back (via `Drop`) otherwise.
//! Deliberately not wired into any request-scoped dependency injection
//! container — callers just `let mut tx = handle.begin().await?` and call
//! `tx.commit()` explicitly, the same shape `sqlx` itself favors.

use std::ops::{Deref, DerefMut};

use sqlx::{Any, Transaction};

use crate::error::{SqlxError, SqlxResult};
use crate::handle::DbHandle;

pub struct Tx<'a>(Transaction<'a, Any>);

impl<'a> Deref for Tx<'a> {
    type Target = Transaction<'a, Any>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'a> DerefMut for Tx<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<'a> Tx<'a> {
    pub fn into_inner(self) -> Transaction<'a, Any> {
        self.0
    }

    pub async fn commit(self) -> SqlxResult<()> {
        self.0.commit().await.map_err(SqlxError::from)
    }

    pub async fn rollback(self) -> SqlxResult<()> {
        self.0.rollback().await.map_err(SqlxError::from)
    }
}

impl DbHandle {
    pub async fn begin(&self) -> SqlxResult<Tx<'static>> {
        let tx = self.pool().begin().await.map_err(SqlxError::from)?;
        Ok(Tx(tx))
    }
}
