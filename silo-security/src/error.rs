//! Security-specific failures, bridged into [`silo_core::AppError`] at the
//! crate boundary so callers only ever see one error taxonomy.

use silo_core::AppError;

#[derive(Debug)]
pub enum SecurityError {
    MissingAuthHeader,
    InvalidAuthScheme,
    InvalidToken(String),
    TokenExpired,
    ValidationFailed(String),
}

impl std::fmt::Display for SecurityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityError::MissingAuthHeader => write!(f, "missing Authorization header"),
            SecurityError::InvalidAuthScheme => write!(f, "invalid authorization scheme"),
            SecurityError::InvalidToken(msg) => write!(f, "invalid token: {msg}"),
            SecurityError::TokenExpired => write!(f, "token expired"),
            SecurityError::ValidationFailed(msg) => write!(f, "token validation failed: {msg}"),
        }
    }
}

impl std::error::Error for SecurityError {}

impl From<SecurityError> for AppError {
    fn from(err: SecurityError) -> Self {
        AppError::AuthenticationFailure(err.to_string())
    }
}
