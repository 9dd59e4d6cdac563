//! The application-wide error taxonomy (spec §6/§7).
//!
//! `AppError` is hand-rolled rather than derived with `thiserror` — each
//! variant maps to exactly one HTTP status and one response body shape, and
//! that table is the part worth reading at a glance. The pipeline (in
//! `silo-http`) is the only place that turns an `AppError` into bytes on the
//! wire; this crate only knows the status and the JSON body.

use std::fmt;

use http::StatusCode;
use serde::Serialize;

/// A single field-level validation error.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    /// A translation key, not a user-facing message — the pipeline runs the
    /// translator over this before the response goes out (§4.9).
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// The full taxonomy of failures the pipeline knows how to map to a status
/// code and a response body.
#[derive(Debug)]
pub enum AppError {
    /// Structured per-field validation failures. 400.
    ValidationFailure(Vec<FieldError>),
    /// Missing or malformed bearer token. 401.
    AuthenticationFailure(String),
    /// Valid principal, insufficient role or permission. 403.
    PermissionDenied(String),
    /// No matching row. 404.
    ResourceNotFound(String),
    /// No route matched the method for an otherwise known path. 405.
    MethodNotAllowed(String),
    /// Unique-constraint violation. 409.
    DuplicateResource(String),
    /// Private field read with `allow_private == false` (§2/§4.2).
    PrivateFieldAccess(String),
    /// Caller exceeded a rate limit.
    TooManyRequests(String),
    /// Translation lookup failed for a message key (ambient i18n, §4.9).
    TranslationKeyMissing(String),
    /// Configuration was missing or failed validation at startup.
    ConfigurationError(String),
    /// An upstream dependency is unavailable. 503.
    ServiceUnavailable(String),
    /// Catch-all — logged in full and reported to the client as a bare 500.
    InternalServerError(String),
}

impl AppError {
    /// Maps a failure to its HTTP status.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationFailure(_) => StatusCode::BAD_REQUEST,
            AppError::AuthenticationFailure(_) => StatusCode::UNAUTHORIZED,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::DuplicateResource(_) => StatusCode::CONFLICT,
            AppError::PrivateFieldAccess(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::TranslationKeyMissing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Builds the JSON response body: `{"validation_errors": [...]}` for
    /// `ValidationFailure`, `{"detail": "..."}` for everything else.
    pub fn body(&self) -> serde_json::Value {
        match self {
            AppError::ValidationFailure(errors) => {
                serde_json::json!({ "validation_errors": errors })
            }
            other => serde_json::json!({ "detail": other.detail_message() }),
        }
    }

    fn detail_message(&self) -> String {
        match self {
            AppError::ValidationFailure(_) => unreachable!("handled by body()"),
            AppError::AuthenticationFailure(m)
            | AppError::PermissionDenied(m)
            | AppError::ResourceNotFound(m)
            | AppError::MethodNotAllowed(m)
            | AppError::DuplicateResource(m)
            | AppError::PrivateFieldAccess(m)
            | AppError::TooManyRequests(m)
            | AppError::TranslationKeyMissing(m)
            | AppError::ConfigurationError(m)
            | AppError::ServiceUnavailable(m)
            | AppError::InternalServerError(m) => m.clone(),
        }
    }

    /// True for failures the pipeline should fan out as an `UnhandledException`
    /// event rather than a recognised client error (§7).
    pub fn is_unhandled(&self) -> bool {
        matches!(self, AppError::InternalServerError(_))
    }

    pub fn not_found(resource: impl fmt::Display) -> Self {
        AppError::ResourceNotFound(format!("Resource not found: {resource}"))
    }

    pub fn duplicate(resource: impl fmt::Display) -> Self {
        AppError::DuplicateResource(format!("Duplicate resource found: {resource}"))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ValidationFailure(errors) => {
                write!(f, "Validation failed ({} field errors)", errors.len())
            }
            other => write!(f, "{}: {}", other.status(), other.detail_message()),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

/// Generates `From<E> for AppError` impls for error types that should always
/// map to one specific variant.
///
/// ```ignore
/// silo_core::map_error! {
///     sqlx::Error => InternalServerError,
///     serde_json::Error => InternalServerError,
/// }
/// ```
#[macro_export]
macro_rules! map_error {
    ( $( $err_ty:ty => $variant:ident ),* $(,)? ) => {
        $(
            impl From<$err_ty> for $crate::error::AppError {
                fn from(err: $err_ty) -> Self {
                    $crate::error::AppError::$variant(err.to_string())
                }
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_map_matches_spec_table() {
        assert_eq!(
            AppError::ValidationFailure(vec![]).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::AuthenticationFailure("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::PermissionDenied("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::ResourceNotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::MethodNotAllowed("x".into()).status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            AppError::DuplicateResource("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::TooManyRequests("x".into()).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::ServiceUnavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::InternalServerError("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn validation_failure_body_shape() {
        let err = AppError::ValidationFailure(vec![FieldError::new("email", "required")]);
        let body = err.body();
        assert!(body["validation_errors"].is_array());
        assert_eq!(body["validation_errors"][0]["field"], "email");
    }

    #[test]
    fn other_failures_use_detail_shape() {
        let err = AppError::not_found("user 5");
        let body = err.body();
        assert_eq!(body["detail"], "Resource not found: user 5");
    }

    #[test]
    fn duplicate_helper_formats_message() {
        let err = AppError::duplicate("username=bob");
        assert_eq!(
            err.body()["detail"],
            "Duplicate resource found: username=bob"
        );
    }

    #[test]
    fn app_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let app_err: AppError = io_err.into();
        match app_err {
            AppError::InternalServerError(msg) => assert!(msg.contains("file missing")),
            other => panic!("expected InternalServerError, got {other:?}"),
        }
    }
}
