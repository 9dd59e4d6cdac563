use silo_data::OrmError;

/// Errors specific to the sqlx backend: connection/pool failures, migration
/// I/O, and namespace bookkeeping, alongside the shared [`OrmError`] variants.
#[derive(Debug)]
pub enum SqlxError {
    Orm(OrmError),
    Migration(String),
    Pool(sqlx::Error),
    UnknownNamespace(String),
}

impl std::fmt::Display for SqlxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlxError::Orm(err) => write!(f, "{err}"),
            SqlxError::Migration(detail) => write!(f, "migration error: {detail}"),
            SqlxError::Pool(err) => write!(f, "database error: {err}"),
            SqlxError::UnknownNamespace(ns) => write!(f, "unknown tenant namespace '{ns}'"),
        }
    }
}

impl std::error::Error for SqlxError {}

impl From<OrmError> for SqlxError {
    fn from(err: OrmError) -> Self {
        SqlxError::Orm(err)
    }
}

/// Extension trait for converting `sqlx::Error` into [`OrmError`]. Orphan
/// rules keep us from implementing `From<sqlx::Error> for OrmError` in
/// `silo-data`, since neither type is local to that crate.
pub trait SqlxErrorExt {
    fn into_orm_error(self, table: &str) -> OrmError;
}

impl SqlxErrorExt for sqlx::Error {
    fn into_orm_error(self, table: &str) -> OrmError {
        match &self {
            sqlx::Error::RowNotFound => OrmError::NotFound(table.to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                OrmError::UniqueViolation(db_err.message().to_string())
            }
            other => OrmError::Backend(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for SqlxError {
    fn from(err: sqlx::Error) -> Self {
        SqlxError::Pool(err)
    }
}

pub type SqlxResult<T> = Result<T, SqlxError>;
