//! The outbound response record (spec §4.7 step 7).
//!
//! Grounded on `application.py`'s `send_response`: a status code, a body,
//! and a content type, assembled here as a plain struct rather than an
//! ASGI two-message protocol — `silo-http`'s pipeline flattens the
//! response-start/response-body pair into one `http::Response` once the
//! handler returns, since `hyper`'s `Service` already gives us that framing
//! for free.

use bytes::Bytes;
use http::{HeaderValue, StatusCode};
use serde::Serialize;
use silo_core::AppError;

/// A handler's return value before the pipeline layers security headers and
/// `Set-Cookie`s on top of it.
pub struct Response {
    pub status: StatusCode,
    pub content_type: HeaderValue,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, content_type: HeaderValue, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }

    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Self, AppError> {
        let body = serde_json::to_vec(value)
            .map_err(|err| AppError::InternalServerError(format!("failed to encode response: {err}")))?;
        Ok(Self::new(status, HeaderValue::from_static("application/json"), body))
    }

    pub fn ok_json<T: Serialize>(value: &T) -> Result<Self, AppError> {
        Self::json(StatusCode::OK, value)
    }

    pub fn created_json<T: Serialize>(value: &T) -> Result<Self, AppError> {
        Self::json(StatusCode::CREATED, value)
    }

    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT, HeaderValue::from_static("text/plain"), Bytes::new())
    }

    pub fn text(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self::new(status, HeaderValue::from_static("text/plain"), body)
    }

    pub fn from_app_error(err: &AppError) -> Self {
        let body = serde_json::to_vec(&err.body()).unwrap_or_else(|_| b"{}".to_vec());
        Self::new(err.status(), HeaderValue::from_static("application/json"), body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_json_encodes_the_value_and_sets_status() {
        let response = Response::ok_json(&serde_json::json!({"id": 1})).unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body.as_ref(), br#"{"id":1}"#);
    }

    #[test]
    fn from_app_error_uses_the_error_status_and_body() {
        let err = AppError::not_found("widget 9");
        let response = Response::from_app_error(&err);
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(String::from_utf8_lossy(&response.body).contains("widget 9"));
    }
}
